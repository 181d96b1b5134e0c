use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Request body for the chat generation endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPrompt {
    pub prompt: String,
}

impl ChatPrompt {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self { prompt: prompt.into() }
    }
}

/// Request body for the translation stream endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationRequest {
    pub text: String,
    pub source_language: String,
    pub target_language: String,
}

impl TranslationRequest {
    pub fn new(text: impl Into<String>, source_language: impl Into<String>, target_language: impl Into<String>) -> Self {
        Self { text: text.into(), source_language: source_language.into(), target_language: target_language.into() }
    }
}

/// Events surfaced while consuming a stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// One decoded frame; `text` is everything accumulated so far in this attempt
    Delta { frame: String, text: String },
    /// The stream completed with its full text
    Done(String),
    /// The previous attempt failed and another one starts after `delay`
    Reconnecting { attempt: u32, delay: Duration, reason: String },
}

/// Lifecycle of a single request/response cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamState {
    #[default]
    Idle,
    Connecting,
    Active,
    Completed,
    Errored,
}

impl StreamState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamState::Idle => "idle",
            StreamState::Connecting => "connecting",
            StreamState::Active => "active",
            StreamState::Completed => "completed",
            StreamState::Errored => "errored",
        }
    }
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a stream that did not error ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Terminal sentinel or natural end of body
    Completed(String),
    /// Cancelled; carries the text accumulated up to that point
    Cancelled(String),
}

impl StreamOutcome {
    pub fn text(&self) -> &str {
        match self {
            StreamOutcome::Completed(text) | StreamOutcome::Cancelled(text) => text,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            StreamOutcome::Completed(text) | StreamOutcome::Cancelled(text) => text,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, StreamOutcome::Cancelled(_))
    }
}

/// Token for cancelling streaming operations
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: CancellationToken,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Idempotent
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Resolves once the token is cancelled
    pub async fn cancelled(&self) {
        self.inner.cancelled().await
    }
}
