use crate::session_id::SessionIdError;

use thiserror::Error;

/// Result type alias for murmur-core
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by every murmur crate
#[derive(Debug, Error)]
pub enum Error {
    /// Non-success HTTP status, network failure, or a connection dropped before completion
    #[error("transport error: {0}")]
    Transport(String),

    /// A successful response that carries no readable body
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Malformed byte sequence in a streamed frame
    #[error("decode error: {0}")]
    Decode(String),

    /// Backing storage unavailable
    #[error("storage unavailable: {0}")]
    Storage(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Parse/serialization errors
    #[error("parse error: {0}")]
    Parse(String),

    /// I/O error for file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A send request refused by the conversation controller
    #[error("send rejected: {0}")]
    Rejected(#[from] SendRejection),

    /// Invalid session identifier
    #[error("invalid session id: {0}")]
    SessionId(#[from] SessionIdError),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a transport error with a message
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a protocol error with a message
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a storage error with a message
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Only transport failures are worth another attempt; protocol errors are surfaced immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Parse(err.to_string())
    }
}

/// Reasons a conversation refuses a new message
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SendRejection {
    /// Another exchange is still streaming
    #[error("a reply is already streaming for this conversation")]
    Busy,

    /// Message was empty after trimming
    #[error("message is empty")]
    EmptyMessage,

    /// Conversation has not finished initializing
    #[error("conversation is not ready")]
    NotReady,
}
