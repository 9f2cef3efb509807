use super::dispatch::DispatchSettings;
use super::event_loop::{run_event_loop, LoopExit, LoopSettings};
use crate::config::BridgeConfig;
use crate::connect::connect;
use crate::repl::{ReplProcess, ReplSession};
use crate::ShutdownFlag;
use anyhow::{Context, Result};
use std::io::{self, Write};
use tracing::info;

/// Line printed on stdout once the bridge is serving.
pub const READY_LINE: &str = "READY";

impl LoopSettings {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            dispatch: DispatchSettings {
                command_timeout: config.command_timeout(),
                max_output_bytes: config.max_output_bytes,
                log_content: config.log_content,
            },
        }
    }
}

/// Start the REPL, connect to the peer, announce readiness, and serve.
///
/// Any error returned here happened during startup; the REPL is already
/// stopped by the time it reaches the caller.
pub fn run_bridge(config: &BridgeConfig, shutdown: ShutdownFlag) -> Result<LoopExit> {
    let mut repl = ReplProcess::start(&config.repl_path, &config.prompt)
        .context("failed to start the REPL")?;
    if let Err(err) = repl.wait_for_ready(config.ready_timeout(), config.max_output_bytes) {
        repl.stop();
        return Err(err).context("REPL never reached its prompt");
    }

    let session = match connect(config) {
        Ok(session) => session,
        Err(err) => {
            repl.stop();
            return Err(err.into());
        }
    };

    announce_ready().context("failed to write READY")?;
    info!(
        local = %session.local(),
        peer = %session.peer().name,
        repl_pid = repl.pid(),
        "bridge ready"
    );
    Ok(run_event_loop(
        session,
        repl,
        shutdown,
        LoopSettings::from_config(config),
    ))
}

fn announce_ready() -> io::Result<()> {
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{READY_LINE}")?;
    stdout.flush()
}
