use crate::session::StreamSession;
use crate::types::{CancelToken, StreamEvent, StreamOutcome};
use murmur_core::{Error, ReconnectConfig, Result};
use serde::Serialize;
use std::time::Duration;
use tracing::instrument;

/// Backoff policy for [`ReconnectingStream`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Total attempts, the first one included
    pub budget: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { base_delay_ms: 1000, max_delay_ms: 30_000, budget: 5 }
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self { base_delay_ms: config.base_delay_ms, max_delay_ms: config.max_delay_ms, budget: config.budget.max(1) }
    }

    /// `min(base * 2^attempt, max)`, where `attempt` counts failures before this one
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        let delay_ms = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }

    /// Whether another attempt fits after `failures` failed ones
    pub fn should_retry(&self, failures: u32) -> bool {
        failures < self.budget
    }
}

/// Retry bookkeeping, reset on completion or [`ReconnectingStream::restart`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconnectState {
    pub attempt_count: u32,
    pub budget: u32,
}

/// A [`StreamSession`] that retries transport failures with exponential backoff.
///
/// Each attempt starts from scratch, so deltas carry the accumulated text of the current
/// attempt only. Protocol errors are surfaced without retrying.
#[derive(Debug)]
pub struct ReconnectingStream {
    session: StreamSession,
    endpoint: String,
    payload: serde_json::Value,
    policy: ReconnectPolicy,
    attempt_count: u32,
    cancel: CancelToken,
}

impl ReconnectingStream {
    pub fn new<P: Serialize + ?Sized>(
        session: StreamSession, endpoint: impl Into<String>, payload: &P, policy: ReconnectPolicy, cancel: CancelToken,
    ) -> Result<Self> {
        Ok(Self {
            session,
            endpoint: endpoint.into(),
            payload: serde_json::to_value(payload)?,
            policy,
            attempt_count: 0,
            cancel,
        })
    }

    pub fn state(&self) -> ReconnectState {
        ReconnectState { attempt_count: self.attempt_count, budget: self.policy.budget }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Abort the current attempt and any scheduled retry
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Reset the attempt count, re-arming a cancelled stream
    pub fn restart(&mut self) {
        self.attempt_count = 0;
        if self.cancel.is_cancelled() {
            self.cancel = CancelToken::new();
        }
    }

    /// Consume the stream until it completes, is cancelled, or runs out of attempts.
    ///
    /// `on_event` sees [`StreamEvent::Delta`] for every frame and [`StreamEvent::Reconnecting`]
    /// before each retry delay.
    #[instrument(skip_all, fields(endpoint = %self.endpoint, budget = self.policy.budget))]
    pub async fn run<F>(&mut self, mut on_event: F) -> Result<StreamOutcome>
    where
        F: FnMut(&StreamEvent),
    {
        let mut last_text = String::new();

        loop {
            if self.cancel.is_cancelled() {
                return Ok(StreamOutcome::Cancelled(last_text));
            }

            let error = match self.attempt(&mut on_event).await {
                Ok(outcome @ StreamOutcome::Completed(_)) => {
                    if self.attempt_count > 0 {
                        tracing::info!(retries = self.attempt_count, "stream recovered");
                    }
                    self.attempt_count = 0;
                    return Ok(outcome);
                }
                Ok(outcome) => return Ok(outcome),
                Err((e, partial)) => {
                    last_text = partial;
                    e
                }
            };

            if !error.is_retryable() {
                tracing::warn!(error = %error, "stream failed without retry");
                return Err(error);
            }

            self.attempt_count += 1;
            if !self.policy.should_retry(self.attempt_count) {
                tracing::warn!(attempts = self.attempt_count, error = %error, "reconnect budget exhausted");
                return Err(error);
            }

            let delay = self.policy.delay_for_attempt(self.attempt_count - 1);
            tracing::warn!(
                attempt = self.attempt_count,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "stream dropped; reconnecting"
            );
            on_event(&StreamEvent::Reconnecting { attempt: self.attempt_count, delay, reason: error.to_string() });

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tracing::debug!("cancelled during backoff");
                    return Ok(StreamOutcome::Cancelled(last_text));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One attempt; on failure returns the error with whatever text the attempt accumulated
    async fn attempt<F>(&self, on_event: &mut F) -> std::result::Result<StreamOutcome, (Error, String)>
    where
        F: FnMut(&StreamEvent),
    {
        let mut handle = self
            .session
            .open(&self.endpoint, &self.payload, self.cancel.clone())
            .await
            .map_err(|e| (e, String::new()))?;

        while let Some(event) = handle.next_event().await {
            match event {
                Ok(StreamEvent::Done(text)) => return Ok(StreamOutcome::Completed(text)),
                Ok(event) => on_event(&event),
                Err(e) => return Err((e, handle.text().to_string())),
            }
        }
        Ok(StreamOutcome::Cancelled(handle.text().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::FrameMode;
    use crate::mock::{ScriptedResponse, ScriptedTransport};
    use crate::types::{ChatPrompt, TranslationRequest};
    use std::sync::Arc;

    fn fast_policy(budget: u32) -> ReconnectPolicy {
        ReconnectPolicy { base_delay_ms: 1, max_delay_ms: 4, budget }
    }

    fn reconnecting(transport: Arc<ScriptedTransport>, budget: u32) -> ReconnectingStream {
        let session = StreamSession::new(transport, FrameMode::Sse);
        let prompt = ChatPrompt::new("x");
        ReconnectingStream::new(session, "http://test/stream", &prompt, fast_policy(budget), CancelToken::new()).unwrap()
    }

    #[test]
    fn test_delay_doubles_then_caps() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for_attempt(0).as_millis(), 1000);
        assert_eq!(policy.delay_for_attempt(1).as_millis(), 2000);
        assert_eq!(policy.delay_for_attempt(4).as_millis(), 16000);
        assert_eq!(policy.delay_for_attempt(5).as_millis(), 30000);
        assert_eq!(policy.delay_for_attempt(64).as_millis(), 30000);
    }

    #[test]
    fn test_should_retry() {
        let policy = ReconnectPolicy { budget: 3, ..Default::default() };
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn test_from_config() {
        let config = ReconnectConfig { enabled: true, base_delay_ms: 250, max_delay_ms: 4000, budget: 0 };
        let policy = ReconnectPolicy::from_config(&config);
        assert_eq!(policy.base_delay_ms, 250);
        assert_eq!(policy.max_delay_ms, 4000);
        assert_eq!(policy.budget, 1);
    }

    #[tokio::test]
    async fn test_recovers_after_failures() {
        let transport = ScriptedTransport::shared(vec![
            ScriptedResponse::Refuse { message: "down".to_string() },
            ScriptedResponse::Status { code: 503 },
            ScriptedResponse::Drop { chunks: vec!["data: He\n".into()] },
            ScriptedResponse::sse(&["He", "llo"]),
        ]);
        let mut stream = reconnecting(transport.clone(), 5);

        let mut retries = Vec::new();
        let mut last_text = String::new();
        let outcome = stream
            .run(|event| match event {
                StreamEvent::Reconnecting { attempt, .. } => retries.push(*attempt),
                StreamEvent::Delta { text, .. } => last_text = text.clone(),
                StreamEvent::Done(_) => {}
            })
            .await
            .unwrap();

        assert_eq!(outcome, StreamOutcome::Completed("Hello".to_string()));
        assert_eq!(last_text, "Hello");
        assert_eq!(retries, vec![1, 2, 3]);
        assert_eq!(transport.request_count(), 4);
        assert_eq!(stream.state().attempt_count, 0);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let responses = (0..10).map(|_| ScriptedResponse::Status { code: 500 }).collect();
        let transport = ScriptedTransport::shared(responses);
        let mut stream = reconnecting(transport.clone(), 5);

        let err = stream.run(|_| {}).await.unwrap_err();
        assert_eq!(err.to_string(), "transport error: HTTP 500");
        assert_eq!(transport.request_count(), 5);
        assert_eq!(stream.state(), ReconnectState { attempt_count: 5, budget: 5 });
    }

    #[tokio::test]
    async fn test_protocol_error_not_retried() {
        let transport = ScriptedTransport::shared(vec![ScriptedResponse::Empty, ScriptedResponse::sse(&["ok"])]);
        let mut stream = reconnecting(transport.clone(), 5);

        let err = stream.run(|_| {}).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff_suppresses_retry() {
        let transport = ScriptedTransport::shared(vec![
            ScriptedResponse::Drop { chunks: vec!["data: part\n".into()] },
            ScriptedResponse::sse(&["never"]),
        ]);
        let session = StreamSession::new(transport.clone(), FrameMode::Sse);
        let policy = ReconnectPolicy { base_delay_ms: 60_000, max_delay_ms: 60_000, budget: 5 };
        let mut stream =
            ReconnectingStream::new(session, "http://test", &ChatPrompt::new("x"), policy, CancelToken::new()).unwrap();

        let cancel = stream.cancel_token();
        let outcome = stream
            .run(|event| {
                if matches!(event, StreamEvent::Reconnecting { .. }) {
                    cancel.cancel();
                }
            })
            .await
            .unwrap();

        assert_eq!(outcome, StreamOutcome::Cancelled("part".to_string()));
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_before_run() {
        let transport = ScriptedTransport::shared(vec![ScriptedResponse::sse(&["x"])]);
        let mut stream = reconnecting(transport.clone(), 5);
        stream.cancel();

        let outcome = stream.run(|_| {}).await.unwrap();
        assert!(outcome.is_cancelled());
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_restart_resets_and_rearms() {
        let transport = ScriptedTransport::shared(vec![
            ScriptedResponse::Status { code: 500 },
            ScriptedResponse::Status { code: 500 },
            ScriptedResponse::sse(&["again"]),
        ]);
        let mut stream = reconnecting(transport, 2);

        assert!(stream.run(|_| {}).await.is_err());
        assert_eq!(stream.state().attempt_count, 2);

        stream.cancel();
        stream.restart();
        assert_eq!(stream.state().attempt_count, 0);

        let outcome = stream.run(|_| {}).await.unwrap();
        assert_eq!(outcome, StreamOutcome::Completed("again".to_string()));
    }

    #[tokio::test]
    async fn test_translation_payload() {
        let transport = ScriptedTransport::shared(vec![ScriptedResponse::sse(&["Hello"])]);
        let session = StreamSession::new(transport.clone(), FrameMode::Sse);
        let request = TranslationRequest::new("안녕", "ko", "en");
        let url = "http://test/api/translate/stream-sse";
        let mut stream = ReconnectingStream::new(session, url, &request, fast_policy(5), CancelToken::new()).unwrap();

        assert_eq!(stream.run(|_| {}).await.unwrap().text(), "Hello");
        assert_eq!(
            transport.requests()[0].body,
            serde_json::json!({"text": "안녕", "source_language": "ko", "target_language": "en"})
        );
    }
}
