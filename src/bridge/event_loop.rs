use super::dispatch::{handle_message, DispatchSettings};
use crate::dist::{Inbound, Session, SessionError};
use crate::repl::ReplSession;
use crate::ShutdownFlag;
use std::time::Duration;
use tracing::{debug, error, info, warn};

// ============================================================================
// Loop state
// ============================================================================

#[derive(Debug, Clone)]
pub struct LoopSettings {
    /// Longest wait for an inbound frame before re-checking the shutdown flag.
    pub poll_interval: Duration,
    pub dispatch: DispatchSettings,
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// `stop` message or termination signal.
    Shutdown,
    /// The peer connection failed.
    ConnectionLost,
}

/// Everything the loop owns: the peer session, the REPL, and the stop flag.
pub struct BridgeContext<S: Session, R: ReplSession> {
    session: S,
    repl: R,
    shutdown: ShutdownFlag,
    settings: LoopSettings,
}

impl<S: Session, R: ReplSession> BridgeContext<S, R> {
    pub fn new(session: S, repl: R, shutdown: ShutdownFlag, settings: LoopSettings) -> Self {
        Self {
            session,
            repl,
            shutdown,
            settings,
        }
    }

    /// Serve requests until shutdown or connection loss, then tear down.
    pub fn run(mut self) -> LoopExit {
        let exit = self.serve();
        self.terminate();
        exit
    }

    fn serve(&mut self) -> LoopExit {
        info!("bridge event loop running");
        loop {
            if self.shutdown.is_requested() {
                info!("shutdown requested");
                return LoopExit::Shutdown;
            }
            match self.session.receive(self.settings.poll_interval) {
                Ok(Inbound::Timeout) | Ok(Inbound::Ignored) => {}
                Ok(Inbound::Tick) => debug!("tick"),
                Ok(Inbound::Message {
                    reply_to: None,
                    payload,
                }) => {
                    warn!(bytes = payload.len(), "dropping message without a reply address");
                }
                Ok(Inbound::Message {
                    reply_to: Some(to),
                    payload,
                }) => {
                    let response = handle_message(
                        &mut self.repl,
                        &self.shutdown,
                        &self.settings.dispatch,
                        &payload,
                    );
                    if let Err(err) = self.session.reply(&to, &response.to_term()) {
                        error!("failed to send reply: {err}");
                        return LoopExit::ConnectionLost;
                    }
                }
                Err(SessionError::Closed) => {
                    warn!("peer closed the connection");
                    return LoopExit::ConnectionLost;
                }
                Err(err) => {
                    error!("connection error: {err}");
                    return LoopExit::ConnectionLost;
                }
            }
        }
    }

    /// Stop the REPL, then close the connection.
    fn terminate(&mut self) {
        self.repl.stop();
        self.session.close();
    }
}

/// Run the loop over an already connected session and a ready REPL.
pub fn run_event_loop<S: Session, R: ReplSession>(
    session: S,
    repl: R,
    shutdown: ShutdownFlag,
    settings: LoopSettings,
) -> LoopExit {
    BridgeContext::new(session, repl, shutdown, settings).run()
}
