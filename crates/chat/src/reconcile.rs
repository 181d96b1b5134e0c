//! Local/remote transcript reconciliation.
//!
//! Whole-transcript last-writer-wins on the timestamp of the final entry. Equal timestamps keep
//! the local copy, so a concurrent remote write with the same timestamp is discarded.

use murmur_core::{EndpointConfig, Error, Result, SessionId, Transcript, TranscriptEntry};
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;

/// Source of server-side conversation history
#[async_trait::async_trait]
pub trait HistoryFetcher: Send + Sync {
    /// `Ok(None)` when the server does not know the session
    async fn fetch(&self, session_id: &SessionId) -> Result<Option<Transcript>>;
}

/// Body of a successful history lookup; `session_id` and `count` are ignored
#[derive(Debug, Deserialize)]
struct HistoryResponse {
    messages: Vec<TranscriptEntry>,
}

/// GETs the configured history path
#[derive(Debug, Clone)]
pub struct HttpHistoryFetcher {
    client: reqwest::Client,
    endpoint: EndpointConfig,
}

impl HttpHistoryFetcher {
    pub fn new(endpoint: EndpointConfig) -> Self {
        Self { client: reqwest::Client::new(), endpoint }
    }

    pub fn with_client(client: reqwest::Client, endpoint: EndpointConfig) -> Self {
        Self { client, endpoint }
    }
}

#[async_trait::async_trait]
impl HistoryFetcher for HttpHistoryFetcher {
    async fn fetch(&self, session_id: &SessionId) -> Result<Option<Transcript>> {
        let url = self.endpoint.history_url(session_id);
        let response = self
            .client
            .get(&url)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| Error::transport(format!("history request to {} failed: {}", url, e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(Error::transport(format!("HTTP {}", status.as_u16())));
        }

        let body: HistoryResponse =
            response.json().await.map_err(|e| Error::Parse(format!("invalid history response: {}", e)))?;
        Ok(Some(Transcript::from_entries(body.messages)))
    }
}

/// Fetcher for setups without a history endpoint
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRemoteHistory;

#[async_trait::async_trait]
impl HistoryFetcher for NoRemoteHistory {
    async fn fetch(&self, _session_id: &SessionId) -> Result<Option<Transcript>> {
        Ok(None)
    }
}

/// Picks the authoritative transcript for a session
#[derive(Clone)]
pub struct Reconciler {
    fetcher: Arc<dyn HistoryFetcher>,
}

impl Reconciler {
    pub fn new(fetcher: Arc<dyn HistoryFetcher>) -> Self {
        Self { fetcher }
    }

    /// Never fails: a fetch error is logged and treated as absent remote history.
    #[instrument(skip_all, fields(session = %session_id, local_entries = local.len()))]
    pub async fn reconcile(&self, session_id: &SessionId, local: Transcript) -> Transcript {
        let remote = match self.fetcher.fetch(session_id).await {
            Ok(remote) => remote,
            Err(e) => {
                tracing::warn!(error = %e, "history fetch failed; keeping local transcript");
                None
            }
        };

        match remote {
            Some(remote) => choose(local, remote),
            None => {
                tracing::debug!("no remote history");
                local
            }
        }
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler").finish_non_exhaustive()
    }
}

/// Remote wins only with a strictly later final timestamp
pub fn choose(local: Transcript, remote: Transcript) -> Transcript {
    let (local_last, remote_last) = (local.last_timestamp(), remote.last_timestamp());
    if remote_last > local_last {
        tracing::info!(local_last, remote_last, entries = remote.len(), "remote transcript is newer");
        remote
    } else {
        tracing::debug!(local_last, remote_last, "keeping local transcript");
        local
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedHistory {
        remote: Mutex<Option<Transcript>>,
        calls: AtomicUsize,
    }

    impl FixedHistory {
        fn new(remote: Option<Transcript>) -> Arc<Self> {
            Arc::new(Self { remote: Mutex::new(remote), calls: AtomicUsize::new(0) })
        }
    }

    #[async_trait::async_trait]
    impl HistoryFetcher for FixedHistory {
        async fn fetch(&self, _session_id: &SessionId) -> Result<Option<Transcript>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.remote.lock().unwrap().clone())
        }
    }

    struct FailingHistory;

    #[async_trait::async_trait]
    impl HistoryFetcher for FailingHistory {
        async fn fetch(&self, _session_id: &SessionId) -> Result<Option<Transcript>> {
            Err(Error::transport("HTTP 500"))
        }
    }

    fn sid() -> SessionId {
        SessionId::parse("k2Xq").unwrap()
    }

    fn transcript(entries: &[(&str, f64)]) -> Transcript {
        let mut transcript = Transcript::new();
        for (i, (content, ts)) in entries.iter().enumerate() {
            if i % 2 == 0 {
                transcript.push(TranscriptEntry::user(*content, *ts));
            } else {
                transcript.push(TranscriptEntry::assistant(*content, *ts));
            }
        }
        transcript
    }

    #[tokio::test]
    async fn test_absent_remote_returns_local() {
        let local = transcript(&[("Hello", 1.0), ("Hi", 2.0)]);
        let reconciler = Reconciler::new(FixedHistory::new(None));
        assert_eq!(reconciler.reconcile(&sid(), local.clone()).await, local);
    }

    #[tokio::test]
    async fn test_newer_remote_wins_wholesale() {
        let local = transcript(&[("Hello", 1.0), ("Hi", 2.0)]);
        let remote = transcript(&[("Other", 1.5), ("Reply", 3.0)]);
        let reconciler = Reconciler::new(FixedHistory::new(Some(remote.clone())));
        assert_eq!(reconciler.reconcile(&sid(), local).await, remote);
    }

    #[tokio::test]
    async fn test_older_remote_loses() {
        let local = transcript(&[("Hello", 5.0)]);
        let remote = transcript(&[("Stale", 1.0), ("Old", 2.0)]);
        let reconciler = Reconciler::new(FixedHistory::new(Some(remote)));
        assert_eq!(reconciler.reconcile(&sid(), local.clone()).await, local);
    }

    /// Ties keep the local copy even when the remote content differs.
    #[tokio::test]
    async fn test_equal_timestamps_favor_local() {
        let local = transcript(&[("Hello", 1.0), ("local", 7.0)]);
        let remote = transcript(&[("Hello", 1.0), ("remote", 7.0)]);
        let reconciler = Reconciler::new(FixedHistory::new(Some(remote)));
        assert_eq!(reconciler.reconcile(&sid(), local.clone()).await, local);
    }

    #[tokio::test]
    async fn test_empty_local_takes_nonempty_remote() {
        let remote = transcript(&[("Hello", 1.0)]);
        let reconciler = Reconciler::new(FixedHistory::new(Some(remote.clone())));
        assert_eq!(reconciler.reconcile(&sid(), Transcript::new()).await, remote);
    }

    #[tokio::test]
    async fn test_empty_remote_never_wins() {
        let reconciler = Reconciler::new(FixedHistory::new(Some(Transcript::new())));
        assert!(reconciler.reconcile(&sid(), Transcript::new()).await.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_degrades_to_local() {
        let local = transcript(&[("Hello", 1.0)]);
        let reconciler = Reconciler::new(Arc::new(FailingHistory));
        assert_eq!(reconciler.reconcile(&sid(), local.clone()).await, local);
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let local = transcript(&[("Hello", 1.0)]);
        let remote = transcript(&[("Hello", 1.0), ("Hi", 4.0)]);
        let history = FixedHistory::new(Some(remote));
        let reconciler = Reconciler::new(history.clone());

        let first = reconciler.reconcile(&sid(), local.clone()).await;
        let second = reconciler.reconcile(&sid(), local).await;
        assert_eq!(first, second);
        assert_eq!(history.calls.load(Ordering::SeqCst), 2);

        let again = reconciler.reconcile(&sid(), first.clone()).await;
        assert_eq!(again, first);
    }

    #[tokio::test]
    async fn test_no_remote_history_fetcher() {
        let result = NoRemoteHistory.fetch(&sid()).await;
        assert!(tokio_test::assert_ok!(result).is_none());
    }

    #[tokio::test]
    async fn test_http_fetcher_unreachable_is_transport_error() {
        let fetcher = HttpHistoryFetcher::new(EndpointConfig::new("http://127.0.0.1:1"));
        let err = fetcher.fetch(&sid()).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_history_response_shape() {
        let body = r#"{"session_id": "k2Xq", "messages": [{"role": "user", "content": "Hello", "timestamp": 1.5}], "count": 1}"#;
        let parsed: HistoryResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.messages.len(), 1);
        assert_eq!(parsed.messages[0].content, "Hello");
    }
}
