//! Maude REPL subprocess management.
//!
//! Spawns the REPL behind a pair of pipes (stdout and stderr share one), writes
//! commands to its stdin, and tears it down with quit → SIGTERM → SIGKILL.

use super::io::{close_fd, set_nonblocking, write_line};
use super::reader::{PromptReader, ReadResult};
use super::{ReplError, ReplSession};
use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::path::Path;
use std::ptr;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Arguments that silence the banner and force interactive mode on a pipe.
pub const REPL_ARGS: [&str; 4] = ["-no-banner", "-no-wrap", "-no-advise", "-interactive"];

const QUIT_COMMAND: &[u8] = b"quit\n";
const QUIT_GRACE: Duration = Duration::from_millis(100);
const TERM_GRACE: Duration = Duration::from_millis(500);
const READY_QUIET_WINDOW: Duration = Duration::from_millis(100);
const READY_DRAIN_LIMIT: Duration = Duration::from_secs(1);

/// Exit code used by the forked child when `execvp` fails.
const EXEC_FAILED_STATUS: libc::c_int = 127;

/// A running REPL child with its pipe ends.
pub struct ReplProcess {
    pid: libc::pid_t,
    stdin_fd: RawFd,
    reader: PromptReader,
    stopped: bool,
    reaped: bool,
}

impl ReplProcess {
    /// Fork and exec the REPL at `path`, returning once the child exists.
    ///
    /// Readiness is a separate step: see [`ReplProcess::wait_for_ready`].
    pub fn start(path: &Path, prompt: &str) -> Result<Self, ReplError> {
        let program = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| ReplError::InvalidPath(path.display().to_string()))?;
        let mut argv: Vec<CString> = Vec::with_capacity(REPL_ARGS.len() + 1);
        argv.push(CString::new("maude").map_err(|_| ReplError::InvalidPath("maude".into()))?);
        for arg in REPL_ARGS {
            argv.push(CString::new(arg).map_err(|_| ReplError::InvalidPath(arg.into()))?);
        }

        let spawn_err = |source: io::Error| ReplError::Spawn {
            path: path.display().to_string(),
            source,
        };
        // SAFETY: program/argv are valid CStrings prepared before fork; the returned
        // descriptors are owned by the new ReplProcess.
        let (pid, stdin_fd, stdout_fd) =
            unsafe { spawn_repl_child(&program, &argv) }.map_err(spawn_err)?;

        // SAFETY: both descriptors were just returned by pipe2(2) and are open.
        let configured =
            unsafe { set_nonblocking(stdout_fd).and_then(|_| set_nonblocking(stdin_fd)) };
        let mut process = Self {
            pid,
            stdin_fd,
            reader: PromptReader::new(stdout_fd, prompt.as_bytes()),
            stopped: false,
            reaped: false,
        };
        if let Err(err) = configured {
            process.stop();
            return Err(spawn_err(err));
        }
        info!(pid, path = %path.display(), "started REPL");
        Ok(process)
    }

    pub fn pid(&self) -> libc::pid_t {
        self.pid
    }

    /// Nudge the REPL with an empty line and wait for its first prompt.
    ///
    /// Any output that trails the prompt inside a short quiet window is
    /// discarded so the first request starts on a clean stream.
    pub fn wait_for_ready(&mut self, timeout: Duration, max_bytes: usize) -> Result<(), ReplError> {
        self.write_command(b"", timeout)?;
        match self.reader.read_until_prompt(max_bytes, timeout) {
            ReadResult::Complete(_) => {
                let drained = self.reader.drain_quiet(READY_QUIET_WINDOW, READY_DRAIN_LIMIT);
                debug!(drained, "REPL ready");
                Ok(())
            }
            ReadResult::Timeout(partial) => Err(ReplError::NotReady(format!(
                "no prompt within {} ms ({} bytes of output)",
                timeout.as_millis(),
                partial.len()
            ))),
            ReadResult::Eof => Err(ReplError::NotReady(format!(
                "REPL closed its output before the first prompt (alive: {})",
                self.is_alive()
            ))),
            ReadResult::IoError(err) => Err(ReplError::NotReady(format!("read failed: {err}"))),
        }
    }

    /// Whether the child is still running; reaps and remembers it if it exited.
    pub fn is_alive(&mut self) -> bool {
        if self.reaped {
            return false;
        }
        let mut status = 0;
        // SAFETY: pid is our own child; WNOHANG never blocks.
        let ret = unsafe { libc::waitpid(self.pid, &mut status, libc::WNOHANG) };
        if ret == 0 {
            return true;
        }
        self.reaped = true;
        false
    }

    fn wait_for_exit(&mut self, timeout: Duration) -> bool {
        let start = Instant::now();
        loop {
            if !self.is_alive() {
                return true;
            }
            if start.elapsed() >= timeout {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    fn signal(&self, signal: libc::c_int, name: &str) {
        // SAFETY: pid is our own unreaped child.
        if unsafe { libc::kill(self.pid, signal) } != 0 {
            debug!(pid = self.pid, "{name} to REPL failed: {}", io::Error::last_os_error());
        }
    }
}

impl ReplSession for ReplProcess {
    fn write_command(&mut self, command: &[u8], timeout: Duration) -> Result<(), ReplError> {
        if self.stopped {
            return Err(ReplError::Stopped);
        }
        write_line(self.stdin_fd, command, timeout).map_err(ReplError::Write)
    }

    fn read_until_prompt(&mut self, max_bytes: usize, timeout: Duration) -> ReadResult {
        if self.stopped {
            return ReadResult::Eof;
        }
        self.reader.read_until_prompt(max_bytes, timeout)
    }

    fn is_alive(&mut self) -> bool {
        ReplProcess::is_alive(self)
    }

    /// Quit, then SIGTERM, then SIGKILL; always closes both pipes. Runs once.
    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        if self.is_alive() {
            if let Err(err) = write_line(self.stdin_fd, QUIT_COMMAND, QUIT_GRACE) {
                debug!("failed to send quit to REPL: {err}");
            }
            if !self.wait_for_exit(QUIT_GRACE) {
                self.signal(libc::SIGTERM, "SIGTERM");
                if !self.wait_for_exit(TERM_GRACE) {
                    warn!(pid = self.pid, "REPL ignored SIGTERM; killing");
                    self.signal(libc::SIGKILL, "SIGKILL");
                    let mut status = 0;
                    // SAFETY: pid is our own child; SIGKILL guarantees it exits.
                    if unsafe { libc::waitpid(self.pid, &mut status, 0) } < 0 {
                        debug!("waitpid after SIGKILL failed: {}", io::Error::last_os_error());
                    }
                    self.reaped = true;
                }
            }
        }

        // SAFETY: both descriptors are owned by this process handle and closed exactly once.
        unsafe {
            close_fd(self.stdin_fd);
            close_fd(self.reader.fd());
        }
        self.stdin_fd = -1;
        info!(pid = self.pid, "stopped REPL");
    }
}

impl Drop for ReplProcess {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Create the stdin/stdout pipes, fork, and exec the REPL in the child.
///
/// Both pipes are close-on-exec from creation; `dup2` clears the flag on the
/// child's stdio copies only.
///
/// # Safety
///
/// `program` and `argv` must be valid C strings; the returned descriptors
/// (`stdin` write end, `stdout` read end) must eventually be closed.
unsafe fn spawn_repl_child(
    program: &CString,
    argv: &[CString],
) -> io::Result<(libc::pid_t, RawFd, RawFd)> {
    let mut stdin_pipe: [RawFd; 2] = [-1; 2];
    let mut stdout_pipe: [RawFd; 2] = [-1; 2];
    if libc::pipe2(stdin_pipe.as_mut_ptr(), libc::O_CLOEXEC) != 0 {
        return Err(io::Error::last_os_error());
    }
    if libc::pipe2(stdout_pipe.as_mut_ptr(), libc::O_CLOEXEC) != 0 {
        let err = io::Error::last_os_error();
        close_fd(stdin_pipe[0]);
        close_fd(stdin_pipe[1]);
        return Err(err);
    }

    let mut argv_ptrs: Vec<*const libc::c_char> = argv.iter().map(|s| s.as_ptr()).collect();
    argv_ptrs.push(ptr::null());

    let pid = libc::fork();
    if pid < 0 {
        let err = io::Error::last_os_error();
        for fd in stdin_pipe.into_iter().chain(stdout_pipe) {
            close_fd(fd);
        }
        return Err(err);
    }

    if pid == 0 {
        child_exec(stdin_pipe, stdout_pipe, program, &argv_ptrs);
    }

    close_fd(stdin_pipe[0]);
    close_fd(stdout_pipe[1]);
    Ok((pid, stdin_pipe[1], stdout_pipe[0]))
}

/// Child side after `fork()`: wire the pipes onto stdio and exec.
///
/// # Safety
///
/// Must only be called in the child process. Never returns: either `execvp`
/// replaces the image or the child exits with status 127.
unsafe fn child_exec(
    stdin_pipe: [RawFd; 2],
    stdout_pipe: [RawFd; 2],
    program: &CString,
    argv: &[*const libc::c_char],
) -> ! {
    if libc::dup2(stdin_pipe[0], libc::STDIN_FILENO) < 0
        || libc::dup2(stdout_pipe[1], libc::STDOUT_FILENO) < 0
        || libc::dup2(stdout_pipe[1], libc::STDERR_FILENO) < 0
    {
        libc::_exit(EXEC_FAILED_STATUS);
    }
    close_fd(stdin_pipe[0]);
    close_fd(stdin_pipe[1]);
    close_fd(stdout_pipe[0]);
    close_fd(stdout_pipe[1]);

    libc::execvp(program.as_ptr(), argv.as_ptr());
    libc::_exit(EXEC_FAILED_STATUS);
}
