use crate::decoder::{Frame, FrameMode, decode_stream};
use crate::transport::Transport;
use crate::types::{CancelToken, StreamEvent, StreamOutcome, StreamState};
use futures::StreamExt;
use murmur_core::{Error, Result};
use serde::Serialize;
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::instrument;

type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame>> + Send>>;

/// Opens single request/response cycles against a transport
#[derive(Clone)]
pub struct StreamSession {
    transport: Arc<dyn Transport>,
    mode: FrameMode,
}

impl StreamSession {
    pub fn new(transport: Arc<dyn Transport>, mode: FrameMode) -> Self {
        Self { transport, mode }
    }

    pub fn mode(&self) -> FrameMode {
        self.mode
    }

    /// Issue one request and return a handle over its frames.
    ///
    /// Fails with a transport error on a non-success status and with a protocol error when a
    /// successful response has no body. If `cancel` fires while the request is in flight the
    /// handle comes back already finished, with no text.
    #[instrument(skip_all, fields(endpoint = %endpoint))]
    pub async fn open<P: Serialize + ?Sized>(
        &self, endpoint: &str, payload: &P, cancel: CancelToken,
    ) -> Result<StreamHandle> {
        let body = serde_json::to_value(payload)?;
        tracing::debug!(state = %StreamState::Connecting, "opening stream");

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("cancelled before response");
                return Ok(StreamHandle::cancelled(cancel));
            }
            response = self.transport.post(endpoint, &body) => response?,
        };

        if !response.is_success() {
            tracing::warn!(status = response.status, "non-success status from stream endpoint");
            return Err(Error::transport(format!("HTTP {}", response.status)));
        }

        let Some(body) = response.body else {
            return Err(Error::protocol("response body is missing"));
        };

        Ok(StreamHandle {
            frames: Some(decode_stream(self.mode, body)),
            text: String::new(),
            state: StreamState::Connecting,
            cancel,
            finished: false,
        })
    }
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession").field("mode", &self.mode).finish()
    }
}

/// One in-flight response.
///
/// Yields a [`StreamEvent::Delta`] per frame and at most one [`StreamEvent::Done`]. Once the
/// cancel token fires, no further events are produced.
pub struct StreamHandle {
    frames: Option<FrameStream>,
    text: String,
    state: StreamState,
    cancel: CancelToken,
    finished: bool,
}

impl StreamHandle {
    fn cancelled(cancel: CancelToken) -> Self {
        Self { frames: None, text: String::new(), state: StreamState::Idle, cancel, finished: true }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Text accumulated so far
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Stop reading; idempotent, and a no-op after completion
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Next event, or `None` once the stream has finished or been cancelled
    pub async fn next_event(&mut self) -> Option<Result<StreamEvent>> {
        if self.finished || self.cancel.is_cancelled() {
            self.finish();
            return None;
        }
        let frames = self.frames.as_mut()?;

        let next = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            item = frames.next() => Some(item),
        };

        // Late results are dropped once cancelled
        let Some(item) = next.filter(|_| !self.cancel.is_cancelled()) else {
            tracing::debug!(chars = self.text.len(), "stream cancelled");
            self.finish();
            return None;
        };

        match item {
            Some(Ok(Frame::Data(frame))) => {
                self.text.push_str(&frame);
                self.state = StreamState::Active;
                tracing::debug!(bytes = frame.len(), "delta");
                Some(Ok(StreamEvent::Delta { frame, text: self.text.clone() }))
            }
            Some(Ok(Frame::Done)) | None => {
                self.finish();
                self.state = StreamState::Completed;
                tracing::debug!(chars = self.text.len(), "stream completed");
                Some(Ok(StreamEvent::Done(self.text.clone())))
            }
            Some(Err(e)) => {
                self.finish();
                self.state = StreamState::Errored;
                tracing::debug!(error = %e, "stream errored");
                Some(Err(e))
            }
        }
    }

    /// Drive the stream to its end, reporting each delta as `(frame, accumulated_text)`
    pub async fn run<F>(&mut self, mut on_delta: F) -> Result<StreamOutcome>
    where
        F: FnMut(&str, &str),
    {
        while let Some(event) = self.next_event().await {
            match event? {
                StreamEvent::Delta { frame, text } => on_delta(&frame, &text),
                StreamEvent::Done(text) => return Ok(StreamOutcome::Completed(text)),
                StreamEvent::Reconnecting { .. } => {}
            }
        }

        if self.state == StreamState::Completed {
            Ok(StreamOutcome::Completed(self.text.clone()))
        } else {
            Ok(StreamOutcome::Cancelled(self.text.clone()))
        }
    }

    /// Release the body; dropping it closes the connection
    fn finish(&mut self) {
        self.finished = true;
        self.frames = None;
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("state", &self.state)
            .field("text_len", &self.text.len())
            .field("finished", &self.finished)
            .finish()
    }
}
