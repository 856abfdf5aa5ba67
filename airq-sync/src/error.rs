//! Error types for airq-sync
//!
//! Taxonomy:
//! - configuration / argument problems → exit code 2
//! - authentication, transport, schema, validation → exit code 1
//!
//! Setup failures (login, range fetch) abort the whole operation. Inside a backfill's
//! per-record loop a single record's error is counted and logged instead.

use airq_common::HourBucket;
use thiserror::Error;

/// Process exit code for a successful run
pub const EXIT_OK: u8 = 0;
/// Process exit code for a runtime failure
pub const EXIT_FAILURE: u8 = 1;
/// Process exit code for invalid arguments or configuration
pub const EXIT_USAGE: u8 = 2;

/// Sync pipeline error
#[derive(Debug, Error)]
pub enum SyncError {
    /// Login failed, or authorization failed again after the one permitted re-authentication
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Non-success HTTP status, timeout or unreadable response body
    #[error("Transport error: {0}")]
    Transport(String),

    /// Response body is readable but lacks the expected shape
    #[error("Schema error: {0}")]
    Schema(String),

    /// A record is missing a required key or carries a blank string
    #[error("Validation error: {0}")]
    Validation(String),

    /// Range end is not after its start once both are floored to the hour
    #[error("Invalid range: end {end} must be later than start {start} (after hour floor)")]
    InvalidRange { start: HourBucket, end: HourBucket },

    /// The upstream source has nothing for the requested hour
    #[error("No source data for hour {0}")]
    NoSourceData(HourBucket),

    /// Shared error (configuration, I/O, argument parsing)
    #[error(transparent)]
    Common(#[from] airq_common::Error),
}

impl SyncError {
    pub fn exit_code(&self) -> u8 {
        match self {
            SyncError::InvalidRange { .. } => EXIT_USAGE,
            SyncError::Common(e) if e.is_usage_error() => EXIT_USAGE,
            _ => EXIT_FAILURE,
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SyncError::Transport(format!("request timed out: {}", err))
        } else if err.is_decode() {
            SyncError::Schema(format!("unreadable response body: {}", err))
        } else {
            SyncError::Transport(err.to_string())
        }
    }
}

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;
