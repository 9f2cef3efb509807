use super::defaults::{
    MAX_CONNECT_ATTEMPTS, MAX_MAX_OUTPUT_BYTES, MAX_POLL_INTERVAL_MS, MIN_MAX_OUTPUT_BYTES,
    MIN_POLL_INTERVAL_MS,
};
use super::BridgeConfig;
use anyhow::{bail, Result};
use tracing_subscriber::EnvFilter;

impl BridgeConfig {
    /// Check CLI values and normalize names.
    pub fn validate(&mut self) -> Result<()> {
        self.node_name = self.node_name.trim().to_string();
        if self.node_name.is_empty() {
            bail!("node name must not be empty");
        }
        if self.node_name.contains('@') {
            bail!(
                "node name must not contain '@' (the host comes from the peer node), got {}",
                self.node_name
            );
        }
        if self.cookie.is_empty() {
            bail!("cookie must not be empty");
        }
        if self.peer_node.trim().is_empty() || self.peer_node.starts_with('@') {
            bail!("peer node must be `name` or `name@host`, got {:?}", self.peer_node);
        }
        if self.repl_path.as_os_str().is_empty() {
            bail!("REPL path must not be empty");
        }

        if !(1..=MAX_CONNECT_ATTEMPTS).contains(&self.connect_attempts) {
            bail!(
                "--connect-attempts must be between 1 and {MAX_CONNECT_ATTEMPTS}, got {}",
                self.connect_attempts
            );
        }
        if self.connect_timeout_ms == 0 {
            bail!("--connect-timeout-ms must be greater than 0");
        }
        if self.backoff_base_ms == 0 {
            bail!("--backoff-base-ms must be greater than 0");
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            bail!(
                "--backoff-max-ms ({}) cannot be below --backoff-base-ms ({})",
                self.backoff_max_ms,
                self.backoff_base_ms
            );
        }
        if self.command_timeout_ms == 0 {
            bail!("--command-timeout-ms must be greater than 0");
        }
        if self.ready_timeout_ms == 0 {
            bail!("--ready-timeout-ms must be greater than 0");
        }
        if !(MIN_POLL_INTERVAL_MS..=MAX_POLL_INTERVAL_MS).contains(&self.poll_interval_ms) {
            bail!(
                "--poll-interval-ms must be between {MIN_POLL_INTERVAL_MS} and {MAX_POLL_INTERVAL_MS}, got {}",
                self.poll_interval_ms
            );
        }
        if !(MIN_MAX_OUTPUT_BYTES..=MAX_MAX_OUTPUT_BYTES).contains(&self.max_output_bytes) {
            bail!(
                "--max-output-bytes must be between {MIN_MAX_OUTPUT_BYTES} and {MAX_MAX_OUTPUT_BYTES}, got {}",
                self.max_output_bytes
            );
        }
        if self.prompt.is_empty() {
            bail!("--prompt must not be empty");
        }
        if let Err(err) = EnvFilter::try_new(&self.log_level) {
            bail!("--log-level {:?} is not a valid filter: {err}", self.log_level);
        }
        Ok(())
    }
}
