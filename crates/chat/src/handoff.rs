//! Submitting from an entry point that cannot show the reply.
//!
//! The text is parked as the pending draft and the session's transcript is brought up to date,
//! so the next [`ChatOrchestrator::initialize`](crate::ChatOrchestrator::initialize) for that
//! session sends it.

use crate::reconcile::Reconciler;
use murmur_core::{Result, SendRejection, SessionId};
use murmur_store::TranscriptStore;
use tracing::instrument;

/// Remembered session id, or a freshly generated one that is remembered from now on
pub fn current_session_id(store: &TranscriptStore) -> SessionId {
    if let Some(session_id) = store.read_session_id() {
        return session_id;
    }
    let session_id = SessionId::generate();
    store.write_session_id(&session_id);
    tracing::info!(session = %session_id, "started new session");
    session_id
}

/// Park `text` as the draft for `session_id` and persist the reconciled transcript
#[instrument(skip_all, fields(session = %session_id))]
pub async fn hand_off(store: &TranscriptStore, reconciler: &Reconciler, session_id: &SessionId, text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(SendRejection::EmptyMessage.into());
    }

    store.write_draft(text);
    let local = store.read_durable(session_id);
    let transcript = reconciler.reconcile(session_id, local).await;
    store.write_durable(session_id, &transcript);
    store.write_session_id(session_id);
    tracing::debug!(entries = transcript.len(), "draft handed off");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::NoRemoteHistory;
    use murmur_store::MemoryKv;
    use std::sync::Arc;

    fn store() -> TranscriptStore {
        TranscriptStore::new(Arc::new(MemoryKv::new()), Arc::new(MemoryKv::new()))
    }

    #[test]
    fn test_current_session_id_is_stable() {
        let store = store();
        let first = current_session_id(&store);
        let second = current_session_id(&store);
        assert_eq!(first, second);
        assert_eq!(store.read_session_id(), Some(first));
    }

    #[tokio::test]
    async fn test_hand_off_writes_draft() {
        let store = store();
        let reconciler = Reconciler::new(Arc::new(NoRemoteHistory));
        let session_id = SessionId::parse("land").unwrap();

        hand_off(&store, &reconciler, &session_id, "retry me").await.unwrap();
        assert_eq!(store.read_draft(), Some("retry me".to_string()));
        assert_eq!(store.read_session_id(), Some(session_id));
    }

    #[tokio::test]
    async fn test_blank_hand_off_is_rejected() {
        let store = store();
        let reconciler = Reconciler::new(Arc::new(NoRemoteHistory));
        let session_id = SessionId::parse("land").unwrap();

        let err = hand_off(&store, &reconciler, &session_id, "  ").await.unwrap_err();
        assert!(matches!(err, murmur_core::Error::Rejected(SendRejection::EmptyMessage)));
        assert_eq!(store.read_draft(), None);
    }
}
