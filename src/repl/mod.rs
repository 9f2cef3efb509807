//! The Maude REPL behind pipes: spawning, prompt-delimited reads, teardown.

mod io;
mod process;
mod reader;


use std::time::Duration;
use thiserror::Error;

pub(crate) use io::{wait_readable, Readiness};
pub use process::{ReplProcess, REPL_ARGS};
pub(crate) use reader::find_marker;
pub use reader::{PromptReader, ReadResult};

/// Failures talking to the REPL subprocess.
#[derive(Debug, Error)]
pub enum ReplError {
    #[error("failed to spawn REPL {path}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("REPL path contains a NUL byte: {0}")]
    InvalidPath(String),
    #[error("failed to write to REPL")]
    Write(#[source] std::io::Error),
    #[error("REPL did not become ready: {0}")]
    NotReady(String),
    #[error("REPL already stopped")]
    Stopped,
}

/// Command channel to a REPL, one command in flight at a time.
pub trait ReplSession {
    /// Send one command line (a newline is appended when missing), giving up
    /// once `timeout` passes without the REPL draining its input.
    fn write_command(&mut self, command: &[u8], timeout: Duration) -> Result<(), ReplError>;
    /// Collect output up to the next prompt.
    fn read_until_prompt(&mut self, max_bytes: usize, timeout: Duration) -> ReadResult;
    fn is_alive(&mut self) -> bool;
    /// Tear the REPL down; safe to call more than once.
    fn stop(&mut self);
}
