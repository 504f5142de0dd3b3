//! # stowage-log
//!
//! `tracing` subscriber setup shared by the stowage binaries.
//!
//! ```rust,no_run
//! let _guard = stowage_log::init_with(stowage_log::Config::from_env())?;
//! tracing::info!(bundles = 3, "Cache ready");
//! # Ok::<(), stowage_log::LogError>(())
//! ```

mod builder;
mod config;
mod core;

pub use builder::{LoggerBuilder, LoggerGuard};
pub use config::{Config, DisplayConfig, Format, WriterConfig};
pub use crate::core::{LogError, LogResult};

/// Initialize from the environment, or the development/production preset
/// when no filter variable is set.
///
/// # Errors
/// See [`LoggerBuilder::build`].
pub fn auto_init() -> LogResult<LoggerGuard> {
    if std::env::var_os("STOWAGE_LOG").is_some() || std::env::var_os("RUST_LOG").is_some() {
        init_with(Config::from_env())
    } else if cfg!(debug_assertions) {
        init_with(Config::development())
    } else {
        init_with(Config::production())
    }
}

/// Initialize with default configuration
///
/// # Errors
/// See [`LoggerBuilder::build`].
pub fn init() -> LogResult<LoggerGuard> {
    init_with(Config::default())
}

/// Initialize with custom configuration
///
/// # Errors
/// See [`LoggerBuilder::build`].
pub fn init_with(config: Config) -> LogResult<LoggerGuard> {
    LoggerBuilder::from_config(config).build()
}
