//! Maude bridge entrypoint: a hidden Erlang node that serves REPL requests.
//!
//! Exit status is 0 after a `stop` request or a termination signal and 1 for
//! any startup failure or a lost peer connection.

use clap::Parser;
use maude_bridge::bridge::{run_bridge, LoopExit};
use maude_bridge::config::BridgeConfig;
use maude_bridge::{init_logging, install_panic_hook, ShutdownFlag};
use std::process::ExitCode;
use tracing::{error, info};

fn main() -> ExitCode {
    let mut config = match BridgeConfig::try_parse() {
        Ok(config) => config,
        Err(err) if !err.use_stderr() => err.exit(),
        Err(err) => {
            let _ = err.print();
            return ExitCode::FAILURE;
        }
    };
    if let Err(err) = config.validate() {
        eprintln!("maude_bridge: {err:#}");
        return ExitCode::FAILURE;
    }
    if let Err(err) = init_logging(&config) {
        eprintln!("maude_bridge: {err:#}");
        return ExitCode::FAILURE;
    }
    install_panic_hook();

    let shutdown = ShutdownFlag::new();
    if let Err(err) = shutdown.register_signals() {
        error!("{err}");
        return ExitCode::FAILURE;
    }

    match run_bridge(&config, shutdown) {
        Ok(LoopExit::Shutdown) => {
            info!("bridge stopped");
            ExitCode::SUCCESS
        }
        Ok(LoopExit::ConnectionLost) => {
            error!("bridge exiting after losing the peer connection");
            ExitCode::FAILURE
        }
        Err(err) => {
            error!("startup failed: {err:#}");
            ExitCode::FAILURE
        }
    }
}
