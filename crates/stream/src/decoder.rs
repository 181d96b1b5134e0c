//! Incremental frame decoding for streamed response bodies.
//!
//! Bytes arrive in arbitrary fragments. [`ChunkDecoder`] buffers exactly what it needs to keep
//! UTF-8 sequences and SSE lines intact, so the frames it produces depend only on the bytes
//! received and never on where the network split them.

use bytes::Bytes;
use futures::StreamExt;
use murmur_core::{Framing, Result};
use std::pin::Pin;
use tokio_stream::Stream;

/// Line prefix marking an SSE data line
pub const DATA_PREFIX: &str = "data: ";

/// Payload that ends the logical content of an SSE stream
pub const DONE_SENTINEL: &str = "[DONE]";

/// How frames are delimited in the response body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameMode {
    /// `data: <payload>` lines; other lines are ignored
    #[default]
    Sse,
    /// Each decoded chunk is a frame; only stream close ends the content.
    ///
    /// A malformed UTF-8 sequence is cut out and the rest of the chunk is still emitted.
    Raw,
}

impl From<Framing> for FrameMode {
    fn from(framing: Framing) -> Self {
        match framing {
            Framing::Sse => FrameMode::Sse,
            Framing::Raw => FrameMode::Raw,
        }
    }
}

/// One logical unit extracted from the body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data(String),
    /// The terminal sentinel was received
    Done,
}

/// Stateful byte-to-frame decoder
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    mode: FrameMode,
    pending: Vec<u8>,
    dropped: usize,
}

impl ChunkDecoder {
    pub fn new(mode: FrameMode) -> Self {
        Self { mode, pending: Vec::new(), dropped: 0 }
    }

    pub fn mode(&self) -> FrameMode {
        self.mode
    }

    /// Number of malformed lines or byte sequences skipped so far
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Feed the next fragment, returning every frame it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.pending.extend_from_slice(chunk);

        match self.mode {
            FrameMode::Sse => {
                let mut frames = Vec::new();
                while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = self.pending.drain(..=pos).collect();
                    if let Some(frame) = self.decode_line(&line[..pos]) {
                        frames.push(frame);
                    }
                }
                frames
            }
            FrameMode::Raw => {
                let text = self.decode_prefix();
                if text.is_empty() { Vec::new() } else { vec![Frame::Data(text)] }
            }
        }
    }

    /// Flush whatever is left once the body has ended
    pub fn finish(&mut self) -> Vec<Frame> {
        if self.pending.is_empty() {
            return Vec::new();
        }

        let rest = std::mem::take(&mut self.pending);
        match self.mode {
            FrameMode::Sse => self.decode_line(&rest).into_iter().collect(),
            FrameMode::Raw => {
                tracing::warn!(bytes = rest.len(), "stream ended inside a UTF-8 sequence; dropping tail");
                self.dropped += 1;
                Vec::new()
            }
        }
    }

    fn decode_line(&mut self, line: &[u8]) -> Option<Frame> {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let line = match std::str::from_utf8(line) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "dropping line with invalid UTF-8");
                self.dropped += 1;
                return None;
            }
        };

        let payload = line.strip_prefix(DATA_PREFIX)?;
        if payload.trim() == DONE_SENTINEL {
            return Some(Frame::Done);
        }
        Some(Frame::Data(payload.to_string()))
    }

    /// Decode the longest valid prefix, keeping an incomplete trailing sequence for the next push
    fn decode_prefix(&mut self) -> String {
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(len) => {
                            tracing::warn!(bytes = len, "skipping malformed UTF-8 sequence");
                            self.dropped += 1;
                            self.pending.drain(..valid + len);
                        }
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                    }
                }
            }
        }
    }
}

/// Lazily decode a byte stream into frames.
///
/// The first body error ends the sequence after being yielded.
pub fn decode_stream<S>(mode: FrameMode, body: S) -> Pin<Box<dyn Stream<Item = Result<Frame>> + Send>>
where
    S: Stream<Item = Result<Bytes>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut decoder = ChunkDecoder::new(mode);
        tokio::pin!(body);

        while let Some(item) = body.next().await {
            match item {
                Ok(chunk) => {
                    for frame in decoder.push(&chunk) {
                        yield Ok(frame);
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }

        for frame in decoder.finish() {
            yield Ok(frame);
        }
    };

    Box::pin(stream)
}
