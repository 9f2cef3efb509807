use super::protocol::{decode_request, ErrorReason, Request, Response};
use crate::repl::{find_marker, ReadResult, ReplSession};
use crate::ShutdownFlag;
use std::time::Duration;
use tracing::{debug, warn};

/// Substrings Maude uses to flag problems while loading a file.
const LOAD_FAILURE_MARKERS: [&[u8]; 2] = [b"Error", b"Warning"];

/// Per-request limits.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub command_timeout: Duration,
    pub max_output_bytes: usize,
    /// Log command and output text at debug level.
    pub log_content: bool,
}

/// Decode a raw message and run it; malformed input becomes an error reply.
pub fn handle_message<R: ReplSession>(
    repl: &mut R,
    shutdown: &ShutdownFlag,
    settings: &DispatchSettings,
    payload: &[u8],
) -> Response {
    match decode_request(payload) {
        Ok(request) => dispatch(repl, shutdown, settings, request),
        Err(err) => {
            warn!(code = err.code(), "rejecting message: {err}");
            Response::code(err.code())
        }
    }
}

/// Run one request against the REPL and build its reply.
pub fn dispatch<R: ReplSession>(
    repl: &mut R,
    shutdown: &ShutdownFlag,
    settings: &DispatchSettings,
    request: Request,
) -> Response {
    match request {
        Request::Ping => Response::Pong,
        Request::Stop => {
            debug!("stop requested by peer");
            shutdown.request();
            Response::Ack
        }
        Request::Execute(command) => {
            if settings.log_content {
                debug!(command = %String::from_utf8_lossy(&command), "execute");
            }
            if let Err(err) = repl.write_command(&command, settings.command_timeout) {
                warn!("failed to send command to REPL: {err}");
                return Response::code("send_failed");
            }
            match run_until_prompt(repl, settings, "read_failed") {
                Ok(output) => Response::Ok(output),
                Err(response) => response,
            }
        }
        Request::LoadFile(path) => {
            let mut command = b"load ".to_vec();
            command.extend_from_slice(&path);
            debug!(path = %String::from_utf8_lossy(&path), "load_file");
            if let Err(err) = repl.write_command(&command, settings.command_timeout) {
                warn!("failed to send load to REPL: {err}");
                return Response::code("load_send_failed");
            }
            match run_until_prompt(repl, settings, "load_read_failed") {
                Ok(output) if reports_load_failure(&output) => {
                    Response::Error(ErrorReason::Detail(output))
                }
                Ok(_) => Response::Ack,
                Err(response) => response,
            }
        }
        Request::Unrecognized => Response::code("unknown_command"),
    }
}

fn run_until_prompt<R: ReplSession>(
    repl: &mut R,
    settings: &DispatchSettings,
    read_failed: &'static str,
) -> Result<Vec<u8>, Response> {
    match repl.read_until_prompt(settings.max_output_bytes, settings.command_timeout) {
        ReadResult::Complete(output) => {
            if settings.log_content {
                debug!(output = %String::from_utf8_lossy(&output), "REPL output");
            } else {
                debug!(bytes = output.len(), "REPL output");
            }
            Ok(output)
        }
        ReadResult::Timeout(partial) => {
            warn!(
                timeout_ms = settings.command_timeout.as_millis() as u64,
                partial_bytes = partial.len(),
                "REPL did not return to its prompt"
            );
            Err(Response::code("timeout"))
        }
        ReadResult::Eof => {
            warn!(alive = repl.is_alive(), "REPL closed its output");
            Err(Response::code("eof"))
        }
        ReadResult::IoError(err) => {
            warn!("reading REPL output failed: {err}");
            Err(Response::code(read_failed))
        }
    }
}

fn reports_load_failure(output: &[u8]) -> bool {
    LOAD_FAILURE_MARKERS
        .iter()
        .any(|marker| find_marker(output, marker).is_some())
}
