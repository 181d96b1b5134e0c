use crate::kv::KeyValueStore;
use murmur_core::{SessionId, Transcript};
use std::sync::Arc;

/// Durable key prefix for per-session transcripts
pub const TRANSCRIPT_KEY_PREFIX: &str = "chat_messages_";

/// Volatile key holding the pending draft
pub const DRAFT_KEY: &str = "temp_message";

/// Durable key remembering the last conversation
pub const SESSION_ID_KEY: &str = "chat_session_id";

/// Transcript and draft persistence over two scoped key/value stores.
///
/// Every operation is total: backend failures are logged and read back as empty or absent.
#[derive(Clone)]
pub struct TranscriptStore {
    durable: Arc<dyn KeyValueStore>,
    volatile: Arc<dyn KeyValueStore>,
}

impl TranscriptStore {
    pub fn new(durable: Arc<dyn KeyValueStore>, volatile: Arc<dyn KeyValueStore>) -> Self {
        Self { durable, volatile }
    }

    pub fn transcript_key(session_id: &SessionId) -> String {
        format!("{}{}", TRANSCRIPT_KEY_PREFIX, session_id)
    }

    /// Stored transcript, empty when absent or unreadable
    pub fn read_durable(&self, session_id: &SessionId) -> Transcript {
        let key = Self::transcript_key(session_id);
        let raw = match self.durable.get(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Transcript::new(),
            Err(e) => {
                tracing::warn!(session = %session_id, error = %e, "durable store unavailable; starting empty");
                return Transcript::new();
            }
        };

        match serde_json::from_str::<Transcript>(&raw) {
            Ok(transcript) => transcript,
            Err(e) => {
                tracing::warn!(session = %session_id, error = %e, "stored transcript is unreadable; starting empty");
                Transcript::new()
            }
        }
    }

    /// Replace the stored transcript with the committed entries of `transcript`
    pub fn write_durable(&self, session_id: &SessionId, transcript: &Transcript) {
        let committed = transcript.committed();
        let raw = match serde_json::to_string(&committed) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(session = %session_id, error = %e, "failed to serialize transcript");
                return;
            }
        };

        match self.durable.set(&Self::transcript_key(session_id), &raw) {
            Ok(()) => tracing::debug!(session = %session_id, entries = committed.len(), "transcript persisted"),
            Err(e) => tracing::warn!(session = %session_id, error = %e, "failed to persist transcript"),
        }
    }

    pub fn remove_durable(&self, session_id: &SessionId) {
        if let Err(e) = self.durable.remove(&Self::transcript_key(session_id)) {
            tracing::warn!(session = %session_id, error = %e, "failed to remove transcript");
        }
    }

    /// Sessions with a stored transcript
    pub fn stored_sessions(&self) -> Vec<SessionId> {
        match self.durable.keys_with_prefix(TRANSCRIPT_KEY_PREFIX) {
            Ok(keys) => keys
                .iter()
                .filter_map(|key| key.strip_prefix(TRANSCRIPT_KEY_PREFIX))
                .filter_map(|id| SessionId::parse(id).ok())
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to list stored sessions");
                Vec::new()
            }
        }
    }

    pub fn read_draft(&self) -> Option<String> {
        match self.volatile.get(DRAFT_KEY) {
            Ok(draft) => draft,
            Err(e) => {
                tracing::warn!(error = %e, "draft store unavailable");
                None
            }
        }
    }

    pub fn write_draft(&self, text: &str) {
        if let Err(e) = self.volatile.set(DRAFT_KEY, text) {
            tracing::warn!(error = %e, "failed to save draft");
        }
    }

    pub fn clear_draft(&self) {
        if let Err(e) = self.volatile.remove(DRAFT_KEY) {
            tracing::warn!(error = %e, "failed to clear draft");
        }
    }

    /// Last remembered conversation, if any and still valid
    pub fn read_session_id(&self) -> Option<SessionId> {
        let raw = match self.durable.get(SESSION_ID_KEY) {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read session id");
                return None;
            }
        };

        match SessionId::parse(raw) {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring stored session id");
                None
            }
        }
    }

    pub fn write_session_id(&self, session_id: &SessionId) {
        if let Err(e) = self.durable.set(SESSION_ID_KEY, session_id.as_str()) {
            tracing::warn!(error = %e, "failed to remember session id");
        }
    }
}

impl std::fmt::Debug for TranscriptStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscriptStore").finish_non_exhaustive()
    }
}
