use crate::transport::{ByteStream, Transport, TransportResponse};
use bytes::Bytes;
use futures::StreamExt;
use murmur_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A body fragment, either text or raw bytes (for split multi-byte sequences)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScriptChunk {
    Text(String),
    Bytes(Vec<u8>),
}

impl ScriptChunk {
    fn to_bytes(&self) -> Bytes {
        match self {
            ScriptChunk::Text(text) => Bytes::from(text.clone().into_bytes()),
            ScriptChunk::Bytes(bytes) => Bytes::from(bytes.clone()),
        }
    }
}

impl From<&str> for ScriptChunk {
    fn from(text: &str) -> Self {
        ScriptChunk::Text(text.to_string())
    }
}

/// Scripted outcome of one request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ScriptedResponse {
    /// 200 with the given body fragments, then a clean close
    Stream {
        chunks: Vec<ScriptChunk>,
        #[serde(default)]
        delay_ms: u64,
    },
    /// Non-success status
    Status { code: u16 },
    /// 200 without a body
    Empty,
    /// 200, the given fragments, then the connection drops
    Drop {
        #[serde(default)]
        chunks: Vec<ScriptChunk>,
    },
    /// 200, the given fragments, then the connection stays open forever
    Hang {
        #[serde(default)]
        chunks: Vec<ScriptChunk>,
    },
    /// The request never reaches the server
    Refuse {
        #[serde(default = "default_refuse_message")]
        message: String,
    },
}

fn default_refuse_message() -> String {
    "connection refused".to_string()
}

impl ScriptedResponse {
    /// SSE body with one `data:` line per payload, followed by the sentinel
    pub fn sse<S: AsRef<str>>(payloads: &[S]) -> Self {
        let mut chunks: Vec<ScriptChunk> =
            payloads.iter().map(|p| ScriptChunk::Text(format!("data: {}\n", p.as_ref()))).collect();
        chunks.push("data: [DONE]\n".into());
        ScriptedResponse::Stream { chunks, delay_ms: 0 }
    }

    pub fn chunks<S: AsRef<str>>(chunks: &[S]) -> Self {
        ScriptedResponse::Stream { chunks: chunks.iter().map(|c| c.as_ref().into()).collect(), delay_ms: 0 }
    }
}

/// Request seen by [`ScriptedTransport`]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub url: String,
    pub body: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ScriptFile {
    responses: Vec<ScriptedResponse>,
}

/// Transport replaying scripted responses in order, for runs without a backend
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    responses: Vec<ScriptedResponse>,
    current: AtomicUsize,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<ScriptedResponse>) -> Self {
        Self { responses, current: AtomicUsize::new(0), requests: Mutex::new(Vec::new()) }
    }

    pub fn shared(responses: Vec<ScriptedResponse>) -> Arc<Self> {
        Arc::new(Self::new(responses))
    }

    /// Parse a script of `[[responses]]` tables
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        let script: ScriptFile =
            toml::from_str(toml_str).map_err(|e| Error::Parse(format!("invalid response script: {}", e)))?;
        Ok(Self::new(script.responses))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Requests received so far, in order
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn request_count(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    fn next_response(&self) -> Option<ScriptedResponse> {
        let index = self.current.fetch_add(1, Ordering::SeqCst);
        self.responses.get(index).cloned()
    }

    fn body_of(chunks: &[ScriptChunk]) -> impl tokio_stream::Stream<Item = Result<Bytes>> + Send + 'static {
        let chunks: Vec<Result<Bytes>> = chunks.iter().map(|c| Ok(c.to_bytes())).collect();
        futures::stream::iter(chunks)
    }
}

fn boxed<S>(stream: S) -> Option<ByteStream>
where
    S: tokio_stream::Stream<Item = Result<Bytes>> + Send + 'static,
{
    Some(Box::pin(stream))
}

#[async_trait::async_trait]
impl Transport for ScriptedTransport {
    async fn post(&self, url: &str, body: &serde_json::Value) -> Result<TransportResponse> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(RecordedRequest { url: url.to_string(), body: body.clone() });
        }

        let Some(response) = self.next_response() else {
            tracing::warn!(url, "no more scripted responses");
            return Err(Error::transport("no more scripted responses"));
        };

        let (status, body): (u16, Option<ByteStream>) = match response {
            ScriptedResponse::Stream { chunks, delay_ms } if delay_ms > 0 => {
                let delay = Duration::from_millis(delay_ms);
                let stream = async_stream::stream! {
                    for chunk in chunks {
                        tokio::time::sleep(delay).await;
                        yield Ok(chunk.to_bytes());
                    }
                };
                (200, boxed(stream))
            }
            ScriptedResponse::Stream { chunks, .. } => (200, boxed(Self::body_of(&chunks))),
            ScriptedResponse::Status { code } => (code, boxed(futures::stream::empty())),
            ScriptedResponse::Empty => (200, None),
            ScriptedResponse::Drop { chunks } => {
                let dropped = futures::stream::once(async { Err(Error::transport("connection dropped")) });
                (200, boxed(Self::body_of(&chunks).chain(dropped)))
            }
            ScriptedResponse::Hang { chunks } => (200, boxed(Self::body_of(&chunks).chain(futures::stream::pending()))),
            ScriptedResponse::Refuse { message } => return Err(Error::transport(message)),
        };

        Ok(TransportResponse { status, body })
    }
}
