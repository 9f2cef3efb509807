//! An established distribution connection: framing, ticks, control messages.

use super::epmd::{lookup_node_port, EpmdError};
use super::handshake::{perform_handshake, HandshakeError, PeerInfo};
use super::node::NodeName;
use crate::repl::{wait_readable, Readiness};
use eetf::{Atom, FixInteger, Term, Tuple};
use std::fs::File;
use std::io::{self, Cursor, ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::os::unix::io::AsRawFd;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Frame prefix for messages sent without the atom cache.
pub const PASS_THROUGH: u8 = 112;

/// Largest frame accepted from the peer.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Socket deadline for the rest of a frame once its first byte is readable,
/// and for reply writes. Matches the peer's default tick interval.
pub const FRAME_IO_TIMEOUT: Duration = Duration::from_secs(60);

pub const CTRL_SEND: i32 = 2;
pub const CTRL_REG_SEND: i32 = 6;
pub const CTRL_SEND_TT: i32 = 12;
pub const CTRL_REG_SEND_TT: i32 = 16;
pub const CTRL_SEND_SENDER: i32 = 22;

#[derive(Debug, Error)]
pub enum OpenError {
    #[error(transparent)]
    Epmd(#[from] EpmdError),
    #[error("failed to connect to {node} on port {port}")]
    Connect {
        node: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("handshake with {node} failed")]
    Handshake {
        node: String,
        #[source]
        source: HandshakeError,
    },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("peer closed the connection")]
    Closed,
    #[error("connection I/O failed")]
    Io(#[from] io::Error),
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("failed to encode reply: {0}")]
    Encode(String),
}

/// One unit pulled off the connection.
#[derive(Debug)]
pub enum Inbound {
    /// Nothing arrived before the wait expired.
    Timeout,
    /// Keep-alive from the peer (already answered).
    Tick,
    /// A control message the bridge has no use for.
    Ignored,
    /// A message for the bridge. `payload` is the still-encoded message term;
    /// `reply_to` is the sender when the control message names one.
    Message {
        reply_to: Option<Term>,
        payload: Vec<u8>,
    },
}

/// The messaging side of the bridge.
pub trait Session {
    fn receive(&mut self, timeout: Duration) -> Result<Inbound, SessionError>;
    fn reply(&mut self, to: &Term, message: &Term) -> Result<(), SessionError>;
    fn close(&mut self);
}

/// A hidden-node connection to one peer.
#[derive(Debug)]
pub struct DistConnection {
    stream: TcpStream,
    local: NodeName,
    peer: PeerInfo,
    sequence: u64,
    closed: bool,
}

impl DistConnection {
    /// Look the peer up in EPMD, connect, and complete the handshake.
    ///
    /// `timeout` bounds every network step of this attempt.
    pub fn open(
        local: &NodeName,
        peer: &NodeName,
        cookie: &str,
        epmd_port: u16,
        timeout: Duration,
    ) -> Result<Self, OpenError> {
        let node = lookup_node_port(&peer.host, epmd_port, &peer.alive, timeout)?;
        let connect_err = |source: io::Error| OpenError::Connect {
            node: peer.to_string(),
            port: node.port,
            source,
        };
        let mut stream = connect_tcp(&peer.host, node.port, timeout).map_err(connect_err)?;
        stream
            .set_read_timeout(Some(timeout))
            .and_then(|_| stream.set_write_timeout(Some(timeout)))
            .and_then(|_| stream.set_nodelay(true))
            .map_err(connect_err)?;

        let info = perform_handshake(&mut stream, local, cookie, random_u32(), random_u32())
            .map_err(|source| OpenError::Handshake {
                node: peer.to_string(),
                source,
            })?;
        stream
            .set_read_timeout(Some(FRAME_IO_TIMEOUT))
            .and_then(|_| stream.set_write_timeout(Some(FRAME_IO_TIMEOUT)))
            .map_err(connect_err)?;
        info!(local = %local, peer = %info.name, "connected to peer node");
        Ok(Self {
            stream,
            local: local.clone(),
            peer: info,
            sequence: 0,
            closed: false,
        })
    }

    pub fn local(&self) -> &NodeName {
        &self.local
    }

    pub fn peer(&self) -> &PeerInfo {
        &self.peer
    }

    /// Number of messages delivered so far.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    fn read_frame(&mut self) -> Result<Option<Vec<u8>>, SessionError> {
        let mut len = [0u8; 4];
        read_exact_or_closed(&mut self.stream, &mut len)?;
        let len = u32::from_be_bytes(len) as usize;
        if len == 0 {
            return Ok(None);
        }
        if len > MAX_FRAME_BYTES {
            return Err(SessionError::Malformed(format!(
                "frame of {len} bytes exceeds limit"
            )));
        }
        let mut frame = vec![0u8; len];
        read_exact_or_closed(&mut self.stream, &mut frame)?;
        Ok(Some(frame))
    }
}

impl Session for DistConnection {
    fn receive(&mut self, timeout: Duration) -> Result<Inbound, SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        match wait_readable(self.stream.as_raw_fd(), timeout) {
            Ok(Readiness::Ready) => {}
            Ok(Readiness::TimedOut) => return Ok(Inbound::Timeout),
            // A signal woke us; let the caller look at its shutdown flag.
            Err(err) if err.kind() == ErrorKind::Interrupted => return Ok(Inbound::Timeout),
            Err(err) => return Err(SessionError::Io(err)),
        }

        let Some(frame) = self.read_frame()? else {
            self.stream.write_all(&[0u8; 4])?;
            return Ok(Inbound::Tick);
        };
        let inbound = parse_frame(&frame);
        if let Inbound::Message { payload, .. } = &inbound {
            self.sequence += 1;
            debug!(sequence = self.sequence, bytes = payload.len(), "message received");
        }
        Ok(inbound)
    }

    fn reply(&mut self, to: &Term, message: &Term) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        let frame = encode_send_frame(to, message)?;
        self.stream.write_all(&frame)?;
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(err) = self.stream.shutdown(Shutdown::Both) {
            debug!("socket shutdown failed: {err}");
        }
        info!(peer = %self.peer.name, delivered = self.sequence, "closed peer connection");
    }
}

fn read_exact_or_closed(stream: &mut impl Read, buf: &mut [u8]) -> Result<(), SessionError> {
    stream.read_exact(buf).map_err(|err| match err.kind() {
        ErrorKind::UnexpectedEof => SessionError::Closed,
        _ => SessionError::Io(err),
    })
}

/// Split a non-tick frame into its control message and payload.
pub(crate) fn parse_frame(frame: &[u8]) -> Inbound {
    let Some((&PASS_THROUGH, rest)) = frame.split_first() else {
        warn!(tag = ?frame.first(), "dropping frame with unknown prefix");
        return Inbound::Ignored;
    };
    let mut cursor = Cursor::new(rest);
    let control = match Term::decode(&mut cursor) {
        Ok(term) => term,
        Err(err) => {
            warn!("dropping frame with undecodable control message: {err:?}");
            return Inbound::Ignored;
        }
    };
    let payload = rest
        .get(cursor.position() as usize..)
        .unwrap_or_default()
        .to_vec();
    classify_control(control, payload)
}

fn classify_control(control: Term, payload: Vec<u8>) -> Inbound {
    let Term::Tuple(Tuple { elements }) = control else {
        return Inbound::Ignored;
    };
    let op = match elements.first() {
        Some(Term::FixInteger(FixInteger { value })) => *value,
        _ => return Inbound::Ignored,
    };
    let reply_to = match op {
        CTRL_REG_SEND | CTRL_REG_SEND_TT | CTRL_SEND_SENDER => elements.get(1).cloned(),
        CTRL_SEND | CTRL_SEND_TT => None,
        other => {
            debug!(op = other, "ignoring control message");
            return Inbound::Ignored;
        }
    };
    if payload.is_empty() {
        warn!(op, "send control message without a payload");
        return Inbound::Ignored;
    }
    Inbound::Message { reply_to, payload }
}

/// Length-prefixed `SEND` frame carrying `message` to `to`.
pub(crate) fn encode_send_frame(to: &Term, message: &Term) -> Result<Vec<u8>, SessionError> {
    let control = Term::from(Tuple::from(vec![
        Term::from(FixInteger::from(CTRL_SEND)),
        Term::from(Atom::from("")),
        to.clone(),
    ]));
    let mut frame = vec![0u8; 4];
    frame.push(PASS_THROUGH);
    control
        .encode(&mut frame)
        .map_err(|err| SessionError::Encode(format!("{err:?}")))?;
    message
        .encode(&mut frame)
        .map_err(|err| SessionError::Encode(format!("{err:?}")))?;
    let len = u32::try_from(frame.len() - 4)
        .map_err(|_| SessionError::Encode("reply too large".to_string()))?;
    frame[..4].copy_from_slice(&len.to_be_bytes());
    Ok(frame)
}

/// Connect to the first address of `host:port` that answers within `timeout`.
pub(crate) fn connect_tcp(host: &str, port: u16, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_err = None;
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => {
                stream.set_read_timeout(Some(timeout))?;
                stream.set_write_timeout(Some(timeout))?;
                return Ok(stream);
            }
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(ErrorKind::NotFound, format!("no addresses for {host}"))
    }))
}

/// Challenge and creation values; `/dev/urandom` with a clock fallback.
fn random_u32() -> u32 {
    let mut bytes = [0u8; 4];
    if let Ok(mut file) = File::open("/dev/urandom") {
        if file.read_exact(&mut bytes).is_ok() {
            return u32::from_ne_bytes(bytes).max(1);
        }
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos ^ std::process::id()).max(1)
}
