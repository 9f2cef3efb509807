//! Distribution handshake (version 6) from the connecting side.

use super::node::NodeName;
use md5::{Digest, Md5};
use std::io::{self, Read, Write};
use thiserror::Error;
use tracing::debug;

pub const DFLAG_EXTENDED_REFERENCES: u64 = 0x4;
pub const DFLAG_FUN_TAGS: u64 = 0x10;
pub const DFLAG_NEW_FUN_TAGS: u64 = 0x80;
pub const DFLAG_EXTENDED_PIDS_PORTS: u64 = 0x100;
pub const DFLAG_EXPORT_PTR_TAG: u64 = 0x200;
pub const DFLAG_BIT_BINARIES: u64 = 0x400;
pub const DFLAG_NEW_FLOATS: u64 = 0x800;
pub const DFLAG_UTF8_ATOMS: u64 = 0x1_0000;
pub const DFLAG_MAP_TAG: u64 = 0x2_0000;
pub const DFLAG_BIG_CREATION: u64 = 0x4_0000;
pub const DFLAG_HANDSHAKE_23: u64 = 0x100_0000;
pub const DFLAG_UNLINK_ID: u64 = 0x200_0000;
pub const DFLAG_V4_NC: u64 = 1 << 34;

/// Capabilities advertised by the bridge. `DFLAG_PUBLISHED` is left out so the
/// bridge joins as a hidden node.
pub const BRIDGE_FLAGS: u64 = DFLAG_EXTENDED_REFERENCES
    | DFLAG_FUN_TAGS
    | DFLAG_NEW_FUN_TAGS
    | DFLAG_EXTENDED_PIDS_PORTS
    | DFLAG_EXPORT_PTR_TAG
    | DFLAG_BIT_BINARIES
    | DFLAG_NEW_FLOATS
    | DFLAG_UTF8_ATOMS
    | DFLAG_MAP_TAG
    | DFLAG_BIG_CREATION
    | DFLAG_HANDSHAKE_23
    | DFLAG_UNLINK_ID
    | DFLAG_V4_NC;

const TAG_NAME_V6: u8 = b'N';
const TAG_NAME_V5: u8 = b'n';
const TAG_STATUS: u8 = b's';
const TAG_CHALLENGE_REPLY: u8 = b'r';
const TAG_CHALLENGE_ACK: u8 = b'a';

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("handshake I/O failed")]
    Io(#[from] io::Error),
    #[error("peer rejected connection: {0}")]
    Rejected(String),
    #[error("unexpected handshake message tag {0:#04x}")]
    UnexpectedMessage(u8),
    #[error("truncated handshake message")]
    Truncated,
    #[error("peer digest does not match cookie")]
    DigestMismatch,
    #[error("local node name too long")]
    NameTooLong,
}

/// What the peer told us about itself during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub name: String,
    pub flags: u64,
    pub creation: u32,
}

/// `MD5(cookie ++ decimal(challenge))`.
pub fn digest(cookie: &str, challenge: u32) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(cookie.as_bytes());
    hasher.update(challenge.to_string().as_bytes());
    let mut out = [0u8; 16];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Run the connecting side of the handshake on a freshly opened stream.
pub fn perform_handshake<S: Read + Write>(
    stream: &mut S,
    local: &NodeName,
    cookie: &str,
    creation: u32,
    our_challenge: u32,
) -> Result<PeerInfo, HandshakeError> {
    write_message(stream, &name_message(local, creation)?)?;

    let status = read_message(stream)?;
    match status.split_first() {
        Some((&TAG_STATUS, rest)) => {
            let status = String::from_utf8_lossy(rest);
            if status != "ok" && status != "ok_simultaneous" {
                return Err(HandshakeError::Rejected(status.into_owned()));
            }
            debug!(%status, "handshake status");
        }
        Some((&tag, _)) => return Err(HandshakeError::UnexpectedMessage(tag)),
        None => return Err(HandshakeError::Truncated),
    }

    let (peer, peer_challenge) = parse_challenge(&read_message(stream)?)?;

    let mut reply = Vec::with_capacity(21);
    reply.push(TAG_CHALLENGE_REPLY);
    reply.extend_from_slice(&our_challenge.to_be_bytes());
    reply.extend_from_slice(&digest(cookie, peer_challenge));
    write_message(stream, &reply)?;

    let ack = read_message(stream)?;
    match ack.split_first() {
        Some((&TAG_CHALLENGE_ACK, rest)) if rest.len() == 16 => {
            if rest != digest(cookie, our_challenge).as_slice() {
                return Err(HandshakeError::DigestMismatch);
            }
        }
        Some((&TAG_CHALLENGE_ACK, _)) | None => return Err(HandshakeError::Truncated),
        Some((&tag, _)) => return Err(HandshakeError::UnexpectedMessage(tag)),
    }
    debug!(peer = %peer.name, flags = peer.flags, "handshake complete");
    Ok(peer)
}

fn name_message(local: &NodeName, creation: u32) -> Result<Vec<u8>, HandshakeError> {
    let name = local.to_string();
    let name_len = u16::try_from(name.len()).map_err(|_| HandshakeError::NameTooLong)?;
    let mut msg = Vec::with_capacity(15 + name.len());
    msg.push(TAG_NAME_V6);
    msg.extend_from_slice(&BRIDGE_FLAGS.to_be_bytes());
    msg.extend_from_slice(&creation.to_be_bytes());
    msg.extend_from_slice(&name_len.to_be_bytes());
    msg.extend_from_slice(name.as_bytes());
    Ok(msg)
}

/// Parse the peer's challenge, either the v6 `N` form or the legacy v5 `n` form.
fn parse_challenge(msg: &[u8]) -> Result<(PeerInfo, u32), HandshakeError> {
    let (&tag, body) = msg.split_first().ok_or(HandshakeError::Truncated)?;
    let mut cursor = Fields(body);
    match tag {
        TAG_NAME_V6 => {
            let flags = cursor.u64()?;
            let challenge = cursor.u32()?;
            let creation = cursor.u32()?;
            let name_len = cursor.u16()? as usize;
            let name = cursor.bytes(name_len)?;
            Ok((
                PeerInfo {
                    name: String::from_utf8_lossy(name).into_owned(),
                    flags,
                    creation,
                },
                challenge,
            ))
        }
        TAG_NAME_V5 => {
            let _version = cursor.u16()?;
            let flags = cursor.u32()? as u64;
            let challenge = cursor.u32()?;
            Ok((
                PeerInfo {
                    name: String::from_utf8_lossy(cursor.0).into_owned(),
                    flags,
                    creation: 0,
                },
                challenge,
            ))
        }
        other => Err(HandshakeError::UnexpectedMessage(other)),
    }
}

struct Fields<'a>(&'a [u8]);

impl<'a> Fields<'a> {
    fn bytes(&mut self, n: usize) -> Result<&'a [u8], HandshakeError> {
        if self.0.len() < n {
            return Err(HandshakeError::Truncated);
        }
        let (head, rest) = self.0.split_at(n);
        self.0 = rest;
        Ok(head)
    }

    fn u16(&mut self) -> Result<u16, HandshakeError> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, HandshakeError> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, HandshakeError> {
        let b = self.bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_be_bytes(raw))
    }
}

/// Handshake messages carry a 2-byte big-endian length prefix.
pub(crate) fn write_message(stream: &mut impl Write, body: &[u8]) -> io::Result<()> {
    let len = u16::try_from(body.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "handshake message too long"))?;
    let mut frame = Vec::with_capacity(body.len() + 2);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(body);
    stream.write_all(&frame)?;
    stream.flush()
}

pub(crate) fn read_message(stream: &mut impl Read) -> io::Result<Vec<u8>> {
    let mut len = [0u8; 2];
    stream.read_exact(&mut len)?;
    let mut body = vec![0u8; u16::from_be_bytes(len) as usize];
    stream.read_exact(&mut body)?;
    Ok(body)
}
