//! Shared runtime plumbing for the Dantherm service
//!
//! - logging with a reloadable filter and daily rolling files
//! - layered configuration loading (defaults, file, environment)
//! - shutdown signal handling

pub mod config_loader;
pub mod logging;
pub mod shutdown;

pub use config_loader::{env_flag, load_config_from_file, load_layered};
pub use logging::{get_log_level, init_with_config, set_log_level, LogConfig};
pub use shutdown::wait_for_shutdown;

// Re-export common dependencies
pub use serde;
pub use serde_json;
pub use tokio;
