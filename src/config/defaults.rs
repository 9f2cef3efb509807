pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 5;
pub const MAX_CONNECT_ATTEMPTS: u32 = 100;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 100;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 2_000;
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_READY_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
pub const MIN_POLL_INTERVAL_MS: u64 = 10;
pub const MAX_POLL_INTERVAL_MS: u64 = 60_000;
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 64 * 1024;
pub const MIN_MAX_OUTPUT_BYTES: usize = 1024;
pub const MAX_MAX_OUTPUT_BYTES: usize = 64 * 1024 * 1024;
pub const DEFAULT_PROMPT: &str = "Maude>";
pub const DEFAULT_LOG_LEVEL: &str = "info";
