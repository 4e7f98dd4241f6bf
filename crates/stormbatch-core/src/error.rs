//! Error types for `stormbatch` core library.

use thiserror::Error;

/// Result type alias using `stormbatch` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while resolving configuration.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or unreadable settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
