//! Command-line parsing and validation helpers.

mod defaults;
#[cfg(test)]
mod tests;
mod validation;

use crate::dist::{NodeName, DEFAULT_EPMD_PORT};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

pub use defaults::*;

/// Diagnostic output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// CLI options for the bridge. Positionals follow the order the supervising
/// node passes them in.
#[derive(Debug, Parser, Clone)]
#[command(
    name = "maude_bridge",
    about = "Bridge an Erlang node to a Maude REPL subprocess",
    author,
    version
)]
pub struct BridgeConfig {
    /// Alive name this bridge registers as (without `@host`)
    pub node_name: String,

    /// Distribution cookie shared with the peer node
    pub cookie: String,

    /// Path to the Maude executable
    pub repl_path: PathBuf,

    /// Full name of the peer node (`name@host`)
    pub peer_node: String,

    /// Connection attempts before giving up
    #[arg(long = "connect-attempts", default_value_t = DEFAULT_CONNECT_ATTEMPTS)]
    pub connect_attempts: u32,

    /// Time limit for each connection attempt (milliseconds)
    #[arg(long = "connect-timeout-ms", default_value_t = DEFAULT_CONNECT_TIMEOUT_MS)]
    pub connect_timeout_ms: u64,

    /// First delay between connection attempts (milliseconds)
    #[arg(long = "backoff-base-ms", default_value_t = DEFAULT_BACKOFF_BASE_MS)]
    pub backoff_base_ms: u64,

    /// Upper bound on the delay between connection attempts (milliseconds)
    #[arg(long = "backoff-max-ms", default_value_t = DEFAULT_BACKOFF_MAX_MS)]
    pub backoff_max_ms: u64,

    /// Time limit for a single REPL command (milliseconds)
    #[arg(long = "command-timeout-ms", default_value_t = DEFAULT_COMMAND_TIMEOUT_MS)]
    pub command_timeout_ms: u64,

    /// Time limit for the REPL's first prompt (milliseconds)
    #[arg(long = "ready-timeout-ms", default_value_t = DEFAULT_READY_TIMEOUT_MS)]
    pub ready_timeout_ms: u64,

    /// Event loop wake-up interval (milliseconds)
    #[arg(long = "poll-interval-ms", default_value_t = DEFAULT_POLL_INTERVAL_MS)]
    pub poll_interval_ms: u64,

    /// Largest REPL output returned in one reply (bytes)
    #[arg(long = "max-output-bytes", default_value_t = DEFAULT_MAX_OUTPUT_BYTES)]
    pub max_output_bytes: usize,

    /// Prompt text that marks the end of a REPL response
    #[arg(long, default_value = DEFAULT_PROMPT)]
    pub prompt: String,

    /// Port of the local port mapper daemon
    #[arg(long = "epmd-port", env = "ERL_EPMD_PORT", default_value_t = DEFAULT_EPMD_PORT)]
    pub epmd_port: u16,

    /// Log filter directive (e.g. `info`, `maude_bridge=debug`)
    #[arg(long = "log-level", env = "MAUDE_BRIDGE_LOG", default_value = DEFAULT_LOG_LEVEL)]
    pub log_level: String,

    /// Diagnostic output format
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Append diagnostics to this file instead of stderr
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Allow logging command and output text (debug level only)
    #[arg(
        long = "log-content",
        env = "MAUDE_BRIDGE_LOG_CONTENT",
        default_value_t = false
    )]
    pub log_content: bool,
}

impl BridgeConfig {
    /// Peer node name, split into alive and host parts.
    pub fn peer_node_name(&self) -> NodeName {
        NodeName::parse(&self.peer_node)
    }

    /// Our own node name, on the same host as the peer.
    pub fn local_node(&self) -> NodeName {
        NodeName::new(self.node_name.clone(), self.peer_node_name().host)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
