use crate::reconcile::Reconciler;
use murmur_core::logging::{PrivacyConfig, redact_content};
use murmur_core::{
    EntryStatus, Error, Result, SendRejection, SessionId, Transcript, TranscriptEntry, now_timestamp,
};
use murmur_store::TranscriptStore;
use murmur_stream::{
    CancelToken, ChatPrompt, ReconnectPolicy, ReconnectingStream, StreamEvent, StreamOutcome, StreamSession,
};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::instrument;

/// Shown in place of a reply that failed
pub const FAILURE_MESSAGE: &str = "Sorry, something went wrong while generating a reply. Please try again.";

/// Conversation lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Initializing,
    Ready,
    Sending,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Initializing => "initializing",
            Phase::Ready => "ready",
            Phase::Sending => "sending",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Events published for live rendering; `index` is the entry's position in the transcript
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// Optimistic user entry appended
    UserMessage { index: usize, content: String },
    /// Assistant entry now holds `text` (the whole reply so far)
    AssistantDelta { index: usize, text: String },
    /// Reply completed with its final text
    AssistantDone { index: usize, text: String },
    /// Reply failed; the entry now holds [`FAILURE_MESSAGE`]
    AssistantFailed { index: usize, error: String },
    /// Connection lost; retrying after `delay`
    Reconnecting { attempt: u32, delay: Duration },
    /// Reply stopped by the user, keeping the partial `text`
    Stopped { index: usize, text: String },
    /// Conversation state discarded
    Cleared,
}

/// How a send ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Final reply text
    Completed(String),
    /// Error description; the transcript shows [`FAILURE_MESSAGE`]
    Failed(String),
    /// Partial reply text at the moment of cancellation
    Cancelled(String),
}

impl SendOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, SendOutcome::Completed(_))
    }
}

#[derive(Debug, Default)]
struct ChatState {
    phase: Phase,
    transcript: Transcript,
    /// Bumped by clear; replies started under an older generation are discarded
    generation: u64,
    cancel: Option<CancelToken>,
}

/// One accepted send, carried through the stream callbacks
#[derive(Debug)]
struct PendingReply {
    prompt: String,
    reply_index: usize,
    generation: u64,
    cancel: CancelToken,
}

/// Drives one conversation: initialization, sends, stops and resets.
///
/// At most one reply streams at a time. Clones share the same conversation state, so a clone
/// can stop or clear a send that another task is awaiting.
#[derive(Clone)]
pub struct ChatOrchestrator {
    session_id: SessionId,
    chat_url: String,
    session: StreamSession,
    store: TranscriptStore,
    reconciler: Reconciler,
    reconnect: Option<ReconnectPolicy>,
    events: Option<mpsc::UnboundedSender<ChatEvent>>,
    privacy: PrivacyConfig,
    state: Arc<Mutex<ChatState>>,
}

impl ChatOrchestrator {
    pub fn new(
        session_id: SessionId, chat_url: impl Into<String>, session: StreamSession, store: TranscriptStore,
        reconciler: Reconciler,
    ) -> Self {
        Self {
            session_id,
            chat_url: chat_url.into(),
            session,
            store,
            reconciler,
            reconnect: None,
            events: None,
            privacy: PrivacyConfig::default(),
            state: Arc::new(Mutex::new(ChatState::default())),
        }
    }

    /// Retry dropped replies with backoff instead of failing on the first transport error
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = Some(policy);
        self
    }

    /// Publish [`ChatEvent`]s on `tx`
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<ChatEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Control how message text appears in logs
    pub fn with_privacy(mut self, privacy: PrivacyConfig) -> Self {
        self.privacy = privacy;
        self
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    /// Snapshot of the live transcript, in-progress reply included
    pub fn transcript(&self) -> Transcript {
        self.lock().transcript.clone()
    }

    /// Load, reconcile and persist the transcript, then send any pending draft.
    ///
    /// Only acts from `Idle`. Returns the outcome of the draft send when there was one; the draft
    /// is cleared only when that send completes.
    #[instrument(skip_all, fields(session = %self.session_id))]
    pub async fn initialize(&self) -> Result<Option<SendOutcome>> {
        let generation = {
            let mut state = self.lock();
            if state.phase != Phase::Idle {
                tracing::debug!(phase = %state.phase, "already initialized");
                return Ok(None);
            }
            state.phase = Phase::Initializing;
            state.generation
        };

        let local = self.store.read_durable(&self.session_id);
        let transcript = self.reconciler.reconcile(&self.session_id, local).await;
        let draft = self.store.read_draft();

        let pending = {
            let mut state = self.lock();
            if state.generation != generation {
                tracing::debug!("cleared during initialization");
                return Ok(None);
            }

            self.store.write_durable(&self.session_id, &transcript);
            self.store.write_session_id(&self.session_id);
            tracing::info!(entries = transcript.len(), "conversation ready");
            state.transcript = transcript;
            state.phase = Phase::Ready;

            match draft {
                Some(draft) if !draft.trim().is_empty() => {
                    tracing::info!(draft = %redact_content(&draft, &self.privacy), "sending pending draft");
                    Some(self.begin_send(&mut state, &draft)?)
                }
                Some(_) => {
                    self.store.clear_draft();
                    None
                }
                None => None,
            }
        };

        let Some(pending) = pending else {
            return Ok(None);
        };

        let outcome = self.stream_reply(pending).await;
        if outcome.is_completed() {
            self.store.clear_draft();
        } else {
            tracing::warn!("draft kept for a later retry");
        }
        Ok(Some(outcome))
    }

    /// Send `text` and wait for the reply.
    ///
    /// Rejected (without touching the transcript) when the text is blank, a reply is already
    /// streaming, or the conversation is not initialized. Stream failures do not surface as
    /// errors: they end in [`SendOutcome::Failed`] with the failure message in the transcript.
    #[instrument(skip_all, fields(session = %self.session_id))]
    pub async fn send(&self, text: &str) -> Result<SendOutcome> {
        let pending = {
            let mut state = self.lock();
            self.begin_send(&mut state, text)?
        };
        Ok(self.stream_reply(pending).await)
    }

    /// Stop the streaming reply, keeping its partial text. Returns whether a reply was streaming.
    pub fn stop(&self) -> bool {
        let state = self.lock();
        match (&state.phase, &state.cancel) {
            (Phase::Sending, Some(cancel)) => {
                tracing::info!(session = %self.session_id, "stopping reply");
                cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Discard the in-memory conversation, cancelling any streaming reply. Back to `Idle`.
    pub fn clear(&self) {
        {
            let mut state = self.lock();
            state.generation += 1;
            if let Some(cancel) = state.cancel.take() {
                cancel.cancel();
            }
            state.transcript = Transcript::new();
            state.phase = Phase::Idle;
        }
        tracing::info!(session = %self.session_id, "conversation cleared");
        self.emit(ChatEvent::Cleared);
    }

    /// [`clear`](Self::clear), then drop the stored transcript as well
    pub fn forget(&self) {
        self.clear();
        self.store.remove_durable(&self.session_id);
    }

    fn begin_send(&self, state: &mut ChatState, text: &str) -> Result<PendingReply> {
        let content = text.trim();
        if content.is_empty() {
            return Err(SendRejection::EmptyMessage.into());
        }
        match state.phase {
            Phase::Ready => {}
            Phase::Sending => return Err(SendRejection::Busy.into()),
            Phase::Idle | Phase::Initializing => return Err(SendRejection::NotReady.into()),
        }

        let now = now_timestamp();
        let user_index = state.transcript.push(TranscriptEntry::user(content, now));
        let reply_index = state.transcript.push(TranscriptEntry::placeholder(now));
        let cancel = CancelToken::new();
        state.cancel = Some(cancel.clone());
        state.phase = Phase::Sending;

        self.store.write_durable(&self.session_id, &state.transcript);
        tracing::info!(message = %redact_content(content, &self.privacy), "message sent");
        self.emit(ChatEvent::UserMessage { index: user_index, content: content.to_string() });

        Ok(PendingReply { prompt: content.to_string(), reply_index, generation: state.generation, cancel })
    }

    async fn stream_reply(&self, pending: PendingReply) -> SendOutcome {
        let prompt = ChatPrompt::new(pending.prompt.as_str());

        let result = match &self.reconnect {
            Some(policy) => {
                match ReconnectingStream::new(
                    self.session.clone(),
                    self.chat_url.as_str(),
                    &prompt,
                    policy.clone(),
                    pending.cancel.clone(),
                ) {
                    Ok(mut stream) => stream.run(|event| self.on_stream_event(&pending, event)).await,
                    Err(e) => Err(e),
                }
            }
            None => match self.session.open(&self.chat_url, &prompt, pending.cancel.clone()).await {
                Ok(mut handle) => handle.run(|_, text| self.apply_delta(&pending, text)).await,
                Err(e) => Err(e),
            },
        };

        self.finish(&pending, result)
    }

    fn on_stream_event(&self, pending: &PendingReply, event: &StreamEvent) {
        match event {
            StreamEvent::Delta { text, .. } => self.apply_delta(pending, text),
            StreamEvent::Reconnecting { attempt, delay, .. } => {
                if !self.is_stale(pending) {
                    self.emit(ChatEvent::Reconnecting { attempt: *attempt, delay: *delay });
                }
            }
            StreamEvent::Done(_) => {}
        }
    }

    /// Replace the reply's content with the accumulated `text`
    fn apply_delta(&self, pending: &PendingReply, text: &str) {
        let mut state = self.lock();
        if state.generation != pending.generation || pending.cancel.is_cancelled() {
            return;
        }
        if let Some(entry) = state.transcript.get_mut(pending.reply_index) {
            entry.content = text.to_string();
            entry.status = EntryStatus::Streaming;
            self.emit(ChatEvent::AssistantDelta { index: pending.reply_index, text: text.to_string() });
        }
    }

    /// Commit the reply, persist, and return to `Ready`
    fn finish(&self, pending: &PendingReply, result: Result<StreamOutcome>) -> SendOutcome {
        let mut state = self.lock();
        if state.generation != pending.generation {
            tracing::debug!("conversation cleared; dropping reply");
            let partial = result.map(StreamOutcome::into_text).unwrap_or_default();
            return SendOutcome::Cancelled(partial);
        }

        let index = pending.reply_index;
        let outcome = match result {
            Ok(StreamOutcome::Completed(text)) => SendOutcome::Completed(text),
            Ok(StreamOutcome::Cancelled(_)) => {
                let partial = state.transcript.get(index).map(|e| e.content.clone()).unwrap_or_default();
                SendOutcome::Cancelled(partial)
            }
            Err(e) => {
                tracing::error!(session = %self.session_id, error = %e, "reply failed");
                SendOutcome::Failed(e.to_string())
            }
        };

        let content = match &outcome {
            SendOutcome::Completed(text) | SendOutcome::Cancelled(text) => text.clone(),
            SendOutcome::Failed(_) => FAILURE_MESSAGE.to_string(),
        };
        if let Some(entry) = state.transcript.get_mut(index) {
            entry.content = content;
            entry.status = EntryStatus::Complete;
        }
        state.phase = Phase::Ready;
        state.cancel = None;
        self.store.write_durable(&self.session_id, &state.transcript);

        match &outcome {
            SendOutcome::Completed(text) => {
                tracing::info!(chars = text.chars().count(), "reply completed");
                self.emit(ChatEvent::AssistantDone { index, text: text.clone() });
            }
            SendOutcome::Cancelled(text) => {
                tracing::info!(chars = text.chars().count(), "reply stopped");
                self.emit(ChatEvent::Stopped { index, text: text.clone() });
            }
            SendOutcome::Failed(error) => self.emit(ChatEvent::AssistantFailed { index, error: error.clone() }),
        }
        outcome
    }

    fn is_stale(&self, pending: &PendingReply) -> bool {
        self.lock().generation != pending.generation || pending.cancel.is_cancelled()
    }

    fn emit(&self, event: ChatEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChatState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for ChatOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatOrchestrator")
            .field("session_id", &self.session_id)
            .field("chat_url", &self.chat_url)
            .field("reconnect", &self.reconnect)
            .finish_non_exhaustive()
    }
}

/// Rejection reason when `err` is a refused send
pub fn rejection(err: &Error) -> Option<SendRejection> {
    match err {
        Error::Rejected(reason) => Some(*reason),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::NoRemoteHistory;
    use murmur_store::MemoryKv;
    use murmur_stream::{FrameMode, ScriptedResponse, ScriptedTransport};

    fn orchestrator(responses: Vec<ScriptedResponse>) -> ChatOrchestrator {
        let store = TranscriptStore::new(Arc::new(MemoryKv::new()), Arc::new(MemoryKv::new()));
        let session = StreamSession::new(ScriptedTransport::shared(responses), FrameMode::Sse);
        ChatOrchestrator::new(
            SessionId::parse("t1").unwrap(),
            "http://test/api/chat/t1",
            session,
            store,
            Reconciler::new(Arc::new(NoRemoteHistory)),
        )
    }

    #[tokio::test]
    async fn test_send_before_initialize_is_rejected() {
        let chat = orchestrator(vec![]);
        let err = chat.send("Hello").await.unwrap_err();
        assert_eq!(rejection(&err), Some(SendRejection::NotReady));
        assert!(chat.transcript().is_empty());
    }

    #[tokio::test]
    async fn test_blank_message_is_rejected() {
        let chat = orchestrator(vec![]);
        chat.initialize().await.unwrap();

        let err = chat.send("   \n").await.unwrap_err();
        assert_eq!(rejection(&err), Some(SendRejection::EmptyMessage));
        assert_eq!(chat.phase(), Phase::Ready);
    }

    #[tokio::test]
    async fn test_initialize_only_from_idle() {
        let chat = orchestrator(vec![]);
        assert_eq!(chat.phase(), Phase::Idle);
        assert_eq!(chat.initialize().await.unwrap(), None);
        assert_eq!(chat.phase(), Phase::Ready);
        assert_eq!(chat.initialize().await.unwrap(), None);
        assert_eq!(chat.phase(), Phase::Ready);
    }

    #[tokio::test]
    async fn test_message_is_trimmed() {
        let chat = orchestrator(vec![ScriptedResponse::sse(&["ok"])]);
        chat.initialize().await.unwrap();

        chat.send("  Hello  ").await.unwrap();
        assert_eq!(chat.transcript().entries()[0].content, "Hello");
    }

    #[tokio::test]
    async fn test_events_follow_the_reply() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let chat = orchestrator(vec![ScriptedResponse::sse(&["Hi", "there"])]).with_events(tx);
        chat.initialize().await.unwrap();
        chat.send("Hello").await.unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(
            events,
            vec![
                ChatEvent::UserMessage { index: 0, content: "Hello".to_string() },
                ChatEvent::AssistantDelta { index: 1, text: "Hi".to_string() },
                ChatEvent::AssistantDelta { index: 1, text: "Hithere".to_string() },
                ChatEvent::AssistantDone { index: 1, text: "Hithere".to_string() },
            ]
        );
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_noop() {
        let chat = orchestrator(vec![]);
        assert!(!chat.stop());
        chat.initialize().await.unwrap();
        assert!(!chat.stop());
    }

    #[tokio::test]
    async fn test_clear_resets_to_idle() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let chat = orchestrator(vec![ScriptedResponse::sse(&["Hi"])]).with_events(tx);
        chat.initialize().await.unwrap();
        chat.send("Hello").await.unwrap();

        chat.clear();
        assert_eq!(chat.phase(), Phase::Idle);
        assert!(chat.transcript().is_empty());

        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            last = Some(event);
        }
        assert_eq!(last, Some(ChatEvent::Cleared));
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::Sending.to_string(), "sending");
        assert_eq!(Phase::default(), Phase::Idle);
    }
}
