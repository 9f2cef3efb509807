pub mod bridge;
pub mod config;
pub mod connect;
pub mod dist;
mod logging;
pub mod repl;
mod shutdown;

pub use logging::{init_logging, install_panic_hook};
pub use shutdown::{ShutdownError, ShutdownFlag};
