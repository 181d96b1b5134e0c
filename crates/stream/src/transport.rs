use bytes::Bytes;
use futures::StreamExt;
use murmur_core::{Error, Result};
use std::pin::Pin;
use tokio_stream::Stream;

/// Response body as a stream of byte fragments
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Status line plus the (possibly absent) streamed body
pub struct TransportResponse {
    pub status: u16,
    pub body: Option<ByteStream>,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("body", &self.body.is_some())
            .finish()
    }
}

/// Outbound request seam; a network failure before a status arrives is a transport error
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn post(&self, url: &str, body: &serde_json::Value) -> Result<TransportResponse>;
}

/// reqwest-backed transport
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn post(&self, url: &str, body: &serde_json::Value) -> Result<TransportResponse> {
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(body)
            .send()
            .await
            .map_err(|e| Error::transport(format!("request to {} failed: {}", url, e)))?;

        let status = response.status().as_u16();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| Error::transport(format!("connection dropped: {}", e))));

        Ok(TransportResponse { status, body: Some(Box::pin(body)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_success_range() {
        assert!(TransportResponse { status: 200, body: None }.is_success());
        assert!(TransportResponse { status: 204, body: None }.is_success());
        assert!(!TransportResponse { status: 404, body: None }.is_success());
        assert!(!TransportResponse { status: 503, body: None }.is_success());
    }

    #[test]
    fn test_response_debug_hides_body() {
        let response = TransportResponse { status: 200, body: None };
        assert_eq!(format!("{:?}", response), "TransportResponse { status: 200, body: false }");
    }

    #[tokio::test]
    async fn test_http_transport_unreachable_is_transport_error() {
        let transport = HttpTransport::new();
        let result = transport.post("http://127.0.0.1:1/api/chat/x", &serde_json::json!({"prompt": "hi"})).await;
        let err = result.unwrap_err();
        assert!(err.is_retryable());
    }
}
