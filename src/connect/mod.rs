//! Startup connection to the peer node with bounded retries.
//!
//! The peer's listener may come up after the bridge does, so each failed
//! attempt is followed by a doubling, capped delay before the next one.

mod backoff;


use crate::config::BridgeConfig;
use crate::dist::{DistConnection, NodeName, OpenError};
use std::fmt::Display;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

pub use backoff::Backoff;

/// How hard to try before giving up.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Bound on every network step of a single attempt.
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            max_attempts: config.connect_attempts,
            base_delay: config.backoff_base(),
            max_delay: config.backoff_max(),
            attempt_timeout: config.connect_timeout(),
        }
    }
}

#[derive(Debug, Error)]
#[error("could not connect to {target} after {attempts} attempts: {last_error}")]
pub struct ConnectError {
    pub target: String,
    pub attempts: u32,
    pub last_error: String,
}

/// One way of making a connection attempt.
pub trait Connector {
    type Connection;
    type Error: Display;

    fn attempt(&mut self, timeout: Duration) -> Result<Self::Connection, Self::Error>;
    fn target(&self) -> String;
}

/// Try `connector` up to `policy.max_attempts` times, sleeping between failures.
pub fn connect_with_retry<C: Connector>(
    connector: &mut C,
    policy: &RetryPolicy,
    mut sleep: impl FnMut(Duration),
) -> Result<C::Connection, ConnectError> {
    let attempts = policy.max_attempts.max(1);
    let mut backoff = Backoff::new(policy.base_delay, policy.max_delay);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match connector.attempt(policy.attempt_timeout) {
            Ok(connection) => {
                info!(peer = %connector.target(), attempt, "connected");
                return Ok(connection);
            }
            Err(err) => {
                warn!(peer = %connector.target(), attempt, "connection attempt failed: {err}");
                last_error = err.to_string();
            }
        }
        if attempt < attempts {
            sleep(backoff.next_delay());
        }
    }

    Err(ConnectError {
        target: connector.target(),
        attempts,
        last_error,
    })
}

/// Connects to the peer over the distribution protocol.
pub struct DistConnector {
    local: NodeName,
    peer: NodeName,
    cookie: String,
    epmd_port: u16,
}

impl DistConnector {
    pub fn new(local: NodeName, peer: NodeName, cookie: String, epmd_port: u16) -> Self {
        Self {
            local,
            peer,
            cookie,
            epmd_port,
        }
    }
}

impl Connector for DistConnector {
    type Connection = DistConnection;
    type Error = ErrorChain<OpenError>;

    fn attempt(&mut self, timeout: Duration) -> Result<DistConnection, Self::Error> {
        DistConnection::open(&self.local, &self.peer, &self.cookie, self.epmd_port, timeout)
            .map_err(ErrorChain)
    }

    fn target(&self) -> String {
        self.peer.to_string()
    }
}

/// Displays an error followed by its `source()` chain.
#[derive(Debug)]
pub struct ErrorChain<E>(pub E);

impl<E: std::error::Error> Display for ErrorChain<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(err) = source {
            write!(f, ": {err}")?;
            source = err.source();
        }
        Ok(())
    }
}

/// Connect to the configured peer, sleeping on the calling thread between attempts.
pub fn connect(config: &BridgeConfig) -> Result<DistConnection, ConnectError> {
    let mut connector = DistConnector::new(
        config.local_node(),
        config.peer_node_name(),
        config.cookie.clone(),
        config.epmd_port,
    );
    connect_with_retry(&mut connector, &RetryPolicy::from_config(config), thread::sleep)
}
