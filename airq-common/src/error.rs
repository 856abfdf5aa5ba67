//! Common error types for airq

use thiserror::Error;

/// Common result type for airq operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors shared by every airq crate
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error (missing credentials, bad config file)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Config file exists but is not valid TOML for [`crate::config::SyncConfig`]
    #[error("Config parse error in {path}: {message}")]
    TomlParse { path: String, message: String },

    /// Invalid user input or argument
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Configuration and argument problems are usage errors, not runtime failures.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::TomlParse { .. } | Error::InvalidInput(_)
        )
    }
}
