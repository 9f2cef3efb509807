//! Typed request/response messages exchanged with the peer node.

use eetf::{Atom, Binary, Term, Tuple};
use std::io::Cursor;
use thiserror::Error;
use tracing::debug;

/// First byte of every encoded external term.
pub const TERM_VERSION: u8 = 131;

// ============================================================================
// Peer -> bridge
// ============================================================================

/// A decoded request from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// `{execute, Command}`: run one REPL command.
    Execute(Vec<u8>),
    /// `ping` or `{ping, ...}`.
    Ping,
    /// `stop` or `{stop, ...}`: reply, then shut down.
    Stop,
    /// `{load_file, Path}`: `load` a source file into the REPL.
    LoadFile(Vec<u8>),
    /// A tuple whose tag is not a known command.
    Unrecognized,
}

/// Why an inbound message could not become a [`Request`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("message does not start with the external term version byte")]
    Version,
    #[error("message is neither a known atom nor a command tuple")]
    Format,
    #[error("command tuple does not start with an atom")]
    Command,
    #[error("execute expects a binary command")]
    Binary,
    #[error("load_file expects a binary path")]
    Path,
}

impl DecodeError {
    /// Reason atom sent back to the peer.
    pub fn code(&self) -> &'static str {
        match self {
            DecodeError::Version => "decode_version_failed",
            DecodeError::Format => "invalid_message_format",
            DecodeError::Command => "decode_command_failed",
            DecodeError::Binary => "decode_binary_failed",
            DecodeError::Path => "decode_path_failed",
        }
    }
}

/// Decode an encoded message term into a request.
pub fn decode_request(payload: &[u8]) -> Result<Request, DecodeError> {
    if payload.first() != Some(&TERM_VERSION) {
        return Err(DecodeError::Version);
    }
    let term = Term::decode(Cursor::new(payload)).map_err(|_| DecodeError::Format)?;
    request_from_term(term)
}

/// Accepts both a bare atom and a tagged tuple.
pub fn request_from_term(term: Term) -> Result<Request, DecodeError> {
    match term {
        Term::Atom(Atom { name }) => match name.as_str() {
            "ping" => Ok(Request::Ping),
            "stop" => Ok(Request::Stop),
            _ => Err(DecodeError::Format),
        },
        Term::Tuple(Tuple { elements }) => {
            let mut elements = elements.into_iter();
            let Some(Term::Atom(Atom { name })) = elements.next() else {
                return Err(DecodeError::Command);
            };
            match name.as_str() {
                "execute" => match elements.next() {
                    Some(Term::Binary(Binary { bytes })) => Ok(Request::Execute(bytes)),
                    _ => Err(DecodeError::Binary),
                },
                "load_file" => match elements.next() {
                    Some(Term::Binary(Binary { bytes })) => Ok(Request::LoadFile(bytes)),
                    _ => Err(DecodeError::Path),
                },
                "ping" => Ok(Request::Ping),
                "stop" => Ok(Request::Stop),
                _ => {
                    debug!(command = %name, "unknown command");
                    Ok(Request::Unrecognized)
                }
            }
        }
        _ => Err(DecodeError::Format),
    }
}

// ============================================================================
// Bridge -> peer
// ============================================================================

/// Reason carried by an error reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorReason {
    /// Short symbolic code, sent as an atom.
    Code(&'static str),
    /// Diagnostic text from the REPL, sent as a binary.
    Detail(Vec<u8>),
}

/// A reply to the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `{ok, Output}`
    Ok(Vec<u8>),
    /// bare `ok`
    Ack,
    /// bare `pong`
    Pong,
    /// `{error, Reason}`
    Error(ErrorReason),
}

impl Response {
    pub fn code(code: &'static str) -> Self {
        Response::Error(ErrorReason::Code(code))
    }

    pub fn to_term(&self) -> Term {
        match self {
            Response::Ok(bytes) => pair("ok", binary(bytes.clone())),
            Response::Ack => atom("ok"),
            Response::Pong => atom("pong"),
            Response::Error(ErrorReason::Code(code)) => pair("error", atom(code)),
            Response::Error(ErrorReason::Detail(bytes)) => pair("error", binary(bytes.clone())),
        }
    }
}

fn atom(name: &str) -> Term {
    Term::Atom(Atom {
        name: name.to_string(),
    })
}

fn binary(bytes: Vec<u8>) -> Term {
    Term::Binary(Binary { bytes })
}

fn pair(tag: &str, value: Term) -> Term {
    Term::Tuple(Tuple {
        elements: vec![atom(tag), value],
    })
}
