//! Error handling for stowage-log

/// Result type for logger operations
pub type LogResult<T> = Result<T, LogError>;

/// Errors raised while setting up logging
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// The filter directive could not be parsed
    #[error("Invalid filter: {0}")]
    Filter(String),

    /// A configuration value is not recognised
    #[error("Configuration error: {0}")]
    Config(String),

    /// A global subscriber is already installed
    #[error("A global logger is already initialized")]
    AlreadyInitialized,
}
