//! Transcript data model shared by the store, the reconciler and the chat controller.
//!
//! A [`Transcript`] serializes as a plain JSON array of `{role, content, timestamp}` objects.
//! That array is the stored form; the remote history endpoint wraps it as the `messages` field
//! of a `{session_id, messages, count}` object.

use serde::{Deserialize, Serialize};

/// Who authored a transcript entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle of an entry inside a live transcript. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryStatus {
    /// Placeholder waiting for the first delta (the in-progress marker)
    Pending,
    /// Content is growing as deltas arrive
    Streaming,
    /// Committed; immutable from here on
    #[default]
    Complete,
}

/// A single message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub content: String,
    /// Seconds since the Unix epoch (fractional)
    pub timestamp: f64,
    #[serde(skip)]
    pub status: EntryStatus,
}

impl TranscriptEntry {
    pub fn user(content: impl Into<String>, timestamp: f64) -> Self {
        Self { role: Role::User, content: content.into(), timestamp, status: EntryStatus::Complete }
    }

    pub fn assistant(content: impl Into<String>, timestamp: f64) -> Self {
        Self { role: Role::Assistant, content: content.into(), timestamp, status: EntryStatus::Complete }
    }

    /// Empty assistant entry carrying the in-progress marker
    pub fn placeholder(timestamp: f64) -> Self {
        Self { role: Role::Assistant, content: String::new(), timestamp, status: EntryStatus::Pending }
    }

    pub fn is_in_progress(&self) -> bool {
        self.status == EntryStatus::Pending
    }

    pub fn is_complete(&self) -> bool {
        self.status == EntryStatus::Complete
    }
}

/// Ordered sequence of entries for one session.
///
/// Timestamps never decrease along the sequence: [`Transcript::push`] clamps an entry that
/// would go back in time to the previous entry's timestamp.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap entries as received (from storage or the history endpoint) without reordering
    pub fn from_entries(entries: Vec<TranscriptEntry>) -> Self {
        Self { entries }
    }

    /// Append an entry, returning its index
    pub fn push(&mut self, mut entry: TranscriptEntry) -> usize {
        if let Some(last) = self.entries.last()
            && entry.timestamp < last.timestamp
        {
            entry.timestamp = last.timestamp;
        }
        self.entries.push(entry);
        self.entries.len() - 1
    }

    /// Timestamp of the last entry, `0.0` for an empty transcript
    pub fn last_timestamp(&self) -> f64 {
        self.entries.last().map(|e| e.timestamp).unwrap_or(0.0)
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&TranscriptEntry> {
        self.entries.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut TranscriptEntry> {
        self.entries.get_mut(index)
    }

    pub fn last(&self) -> Option<&TranscriptEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether timestamps are non-decreasing (remote data is not guaranteed to be)
    pub fn is_ordered(&self) -> bool {
        self.entries.windows(2).all(|w| w[0].timestamp <= w[1].timestamp)
    }

    /// Copy holding only completed entries; this is what gets persisted
    pub fn committed(&self) -> Transcript {
        Self { entries: self.entries.iter().filter(|e| e.is_complete()).cloned().collect() }
    }
}

/// Current wall-clock time as fractional seconds since the epoch
pub fn now_timestamp() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}
