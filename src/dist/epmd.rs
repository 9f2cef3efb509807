//! EPMD port lookup (`PORT_PLEASE2_REQ`).

use super::connection::connect_tcp;
use std::io::{self, Read, Write};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_EPMD_PORT: u16 = 4369;

const PORT_PLEASE2_REQ: u8 = b'z';
const PORT2_RESP: u8 = b'w';

#[derive(Debug, Error)]
pub enum EpmdError {
    #[error("epmd at {host}:{port} unreachable")]
    Unreachable {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("epmd exchange failed")]
    Io(#[from] io::Error),
    #[error("node {0} is not registered with epmd (result {1})")]
    NotRegistered(String, u8),
    #[error("unexpected epmd response tag {0}")]
    UnexpectedResponse(u8),
    #[error("node name too long for epmd: {0}")]
    NameTooLong(String),
}

/// What EPMD knows about a registered node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodePort {
    pub port: u16,
    pub node_type: u8,
    pub protocol: u8,
    pub highest_version: u16,
    pub lowest_version: u16,
}

/// Ask the EPMD on `host:epmd_port` which port `alive` listens on.
pub fn lookup_node_port(
    host: &str,
    epmd_port: u16,
    alive: &str,
    timeout: Duration,
) -> Result<NodePort, EpmdError> {
    let mut stream =
        connect_tcp(host, epmd_port, timeout).map_err(|source| EpmdError::Unreachable {
            host: host.to_string(),
            port: epmd_port,
            source,
        })?;
    stream.write_all(&port_please_request(alive)?)?;
    let node = read_port_response(&mut stream, alive)?;
    debug!(alive, port = node.port, "epmd lookup succeeded");
    Ok(node)
}

pub(crate) fn port_please_request(alive: &str) -> Result<Vec<u8>, EpmdError> {
    let len = u16::try_from(alive.len() + 1)
        .map_err(|_| EpmdError::NameTooLong(alive.to_string()))?;
    let mut request = Vec::with_capacity(alive.len() + 3);
    request.extend_from_slice(&len.to_be_bytes());
    request.push(PORT_PLEASE2_REQ);
    request.extend_from_slice(alive.as_bytes());
    Ok(request)
}

pub(crate) fn read_port_response(
    reader: &mut impl Read,
    alive: &str,
) -> Result<NodePort, EpmdError> {
    let mut head = [0u8; 2];
    reader.read_exact(&mut head)?;
    if head[0] != PORT2_RESP {
        return Err(EpmdError::UnexpectedResponse(head[0]));
    }
    if head[1] != 0 {
        return Err(EpmdError::NotRegistered(alive.to_string(), head[1]));
    }
    let mut body = [0u8; 8];
    reader.read_exact(&mut body)?;
    Ok(NodePort {
        port: u16::from_be_bytes([body[0], body[1]]),
        node_type: body[2],
        protocol: body[3],
        highest_version: u16::from_be_bytes([body[4], body[5]]),
        lowest_version: u16::from_be_bytes([body[6], body[7]]),
    })
}
