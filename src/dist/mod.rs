//! Erlang distribution plumbing: EPMD lookup, handshake, and the framed
//! connection the bridge receives requests on.

mod connection;
mod epmd;
mod handshake;
mod node;

#[cfg(test)]
mod tests;

pub use connection::{
    DistConnection, Inbound, OpenError, Session, SessionError, FRAME_IO_TIMEOUT, MAX_FRAME_BYTES,
};
pub use epmd::{lookup_node_port, EpmdError, NodePort, DEFAULT_EPMD_PORT};
pub use handshake::{digest, perform_handshake, HandshakeError, PeerInfo, BRIDGE_FLAGS};
pub use node::{NodeName, DEFAULT_HOST};
