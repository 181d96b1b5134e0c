//! Error types for the key/value backends

use thiserror::Error;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by storage backends.
///
/// These never leave [`crate::TranscriptStore`], which degrades them to empty results.
#[derive(Error, Debug)]
pub enum Error {
    /// SQLite database error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend cannot be used (poisoned lock, failed migration, ...)
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl Error {
    /// Create an unavailable error with a message
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}

impl From<Error> for murmur_core::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Unavailable(msg) => murmur_core::Error::storage(msg),
            other => murmur_core::Error::storage(other.to_string()),
        }
    }
}
