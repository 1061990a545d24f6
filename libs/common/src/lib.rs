//! `modlink` basic library
//!
//! Provides infrastructure shared by the modlink crates:
//! - logging initialisation
//! - layered configuration loading (file + environment)
//! - shutdown signal handling

pub mod config_loader;
pub mod logging;
pub mod shutdown;

pub use config_loader::{load_config, ConfigLoadError};
pub use logging::{init_logging, LoggingConfig};
pub use shutdown::{wait_for_shutdown_or, ShutdownTrigger};
