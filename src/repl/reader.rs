use super::io::{read_chunk, should_retry_io_error, wait_readable, Readiness};
use std::io::{self, ErrorKind};
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const READ_CHUNK_BYTES: usize = 4096;

/// Outcome of collecting one response unit from the REPL.
#[derive(Debug)]
pub enum ReadResult {
    /// Prompt observed; payload is everything before it, trimmed.
    Complete(Vec<u8>),
    /// Deadline passed without a prompt; carries whatever was collected.
    Timeout(Vec<u8>),
    /// The REPL closed its output stream.
    Eof,
    IoError(io::Error),
}

/// Accumulates REPL output and splits it on the prompt marker.
///
/// The buffer belongs to exactly one call of [`PromptReader::read_until_prompt`];
/// it is empty again whenever that call returns.
pub struct PromptReader {
    fd: RawFd,
    marker: Vec<u8>,
    buffer: Vec<u8>,
}

impl PromptReader {
    pub fn new(fd: RawFd, marker: impl Into<Vec<u8>>) -> Self {
        Self {
            fd,
            marker: marker.into(),
            buffer: Vec::with_capacity(READ_CHUNK_BYTES),
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Read until the prompt marker appears, the deadline passes, or the
    /// stream ends.
    ///
    /// Output past `max_bytes` is still drained so the next request starts
    /// right after the prompt, but only the first `max_bytes` are returned.
    pub fn read_until_prompt(&mut self, max_bytes: usize, timeout: Duration) -> ReadResult {
        self.buffer.clear();
        let result = self.collect(max_bytes, timeout);
        self.buffer.clear();
        result
    }

    fn collect(&mut self, max_bytes: usize, timeout: Duration) -> ReadResult {
        let deadline = Instant::now() + timeout;
        // Bytes that could still hold the start of a marker split across reads.
        let carry = self.marker.len().saturating_sub(1);
        let mut chunk = [0u8; READ_CHUNK_BYTES];
        let mut truncated = false;

        loop {
            let now = Instant::now();
            if now >= deadline {
                let mut partial = std::mem::take(&mut self.buffer);
                partial.truncate(max_bytes);
                debug!(bytes = partial.len(), "REPL read timed out");
                return ReadResult::Timeout(partial);
            }
            match wait_readable(self.fd, deadline - now) {
                Ok(Readiness::Ready) => {}
                Ok(Readiness::TimedOut) => continue,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return ReadResult::IoError(err),
            }

            let n = match read_chunk(self.fd, &mut chunk) {
                Ok(0) => return ReadResult::Eof,
                Ok(n) => n,
                Err(err) if should_retry_io_error(&err) => continue,
                Err(err) => return ReadResult::IoError(err),
            };

            let prev_len = self.buffer.len();
            self.buffer.extend_from_slice(&chunk[..n]);
            let search_from = prev_len.saturating_sub(carry);
            if let Some(pos) = find_marker(&self.buffer[search_from..], &self.marker) {
                let end = (search_from + pos).min(max_bytes);
                if truncated || search_from + pos > max_bytes {
                    warn!(limit = max_bytes, "REPL output truncated");
                }
                return ReadResult::Complete(trim_payload(&self.buffer[..end]).to_vec());
            }

            if self.buffer.len() > max_bytes + carry {
                // Keep the retained prefix plus just enough tail to match a split marker.
                let tail_start = self.buffer.len() - carry;
                self.buffer.copy_within(tail_start.., max_bytes);
                self.buffer.truncate(max_bytes + carry);
                truncated = true;
            }
        }
    }

    /// Discard output until nothing arrives for `quiet`, giving up after `limit`.
    ///
    /// Returns the number of bytes thrown away.
    pub fn drain_quiet(&mut self, quiet: Duration, limit: Duration) -> usize {
        let deadline = Instant::now() + limit;
        let mut chunk = [0u8; READ_CHUNK_BYTES];
        let mut drained = 0usize;
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let wait = quiet.min(deadline - now);
            match wait_readable(self.fd, wait) {
                Ok(Readiness::Ready) => {}
                Ok(Readiness::TimedOut) => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
            match read_chunk(self.fd, &mut chunk) {
                Ok(0) => break,
                Ok(n) => drained += n,
                Err(err) if should_retry_io_error(&err) => continue,
                Err(_) => break,
            }
        }
        self.buffer.clear();
        drained
    }
}

/// Position of the first occurrence of `needle` in `haystack`.
pub(crate) fn find_marker(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Strip leading and trailing spaces, carriage returns and line feeds.
pub(crate) fn trim_payload(bytes: &[u8]) -> &[u8] {
    let is_blank = |b: &u8| matches!(b, b' ' | b'\r' | b'\n');
    let start = bytes.iter().position(|b| !is_blank(b)).unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !is_blank(b))
        .map_or(start, |idx| idx + 1);
    &bytes[start..end]
}
