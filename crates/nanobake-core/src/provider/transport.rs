//! HTTP transport for the generation API
//!
//! The engine talks to mirrors through the [`Transport`] trait so the
//! failover logic can be driven without a network.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use reqwest::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use crate::config::GenerationConfig;
use crate::error::{Error, Result};

/// Header carrying the provider credential
pub const API_KEY_HEADER: &str = "x-goog-api-key";

/// Body of a response, delivered chunk by chunk
pub type ByteStream = BoxStream<'static, Result<Vec<u8>>>;

/// Status plus a not-yet-consumed body
pub struct StreamingResponse {
    pub status: u16,
    pub body: ByteStream,
}

impl fmt::Debug for StreamingResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl StreamingResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Drain the whole body, keeping at most `keep_bytes` of it as text
    pub async fn drain_text(mut self, keep_bytes: usize) -> Result<String> {
        let mut kept = Vec::new();
        while let Some(chunk) = self.body.next().await {
            let chunk = chunk?;
            if kept.len() < keep_bytes {
                let take = (keep_bytes - kept.len()).min(chunk.len());
                kept.extend_from_slice(&chunk[..take]);
            }
        }
        Ok(String::from_utf8_lossy(&kept).into_owned())
    }
}

/// Streamed JSON POST with the credential in a header
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `body` to `url`; `timeout` overrides the client-wide total timeout
    async fn post(
        &self,
        url: &str,
        api_key: &str,
        body: Vec<u8>,
        timeout: Option<Duration>,
    ) -> Result<StreamingResponse>;
}

/// `reqwest`-backed transport
#[derive(Clone)]
pub struct HttpTransport {
    http_client: HttpClient,
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport").finish_non_exhaustive()
    }
}

impl HttpTransport {
    /// Build a client with separate connect and total (read) timeouts
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Result<Self> {
        let http_client = HttpClient::builder()
            .connect_timeout(connect_timeout)
            .timeout(read_timeout)
            .build()
            .map_err(Error::NetworkError)?;

        Ok(Self { http_client })
    }

    pub fn from_config(config: &GenerationConfig) -> Result<Self> {
        Self::new(config.connect_timeout(), config.read_timeout())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(
        &self,
        url: &str,
        api_key: &str,
        body: Vec<u8>,
        timeout: Option<Duration>,
    ) -> Result<StreamingResponse> {
        debug!(url = %url, body_bytes = body.len(), "Sending generateContent request");

        let mut request = self
            .http_client
            .post(url)
            .header(API_KEY_HEADER, api_key)
            .header(CONTENT_TYPE, "application/json")
            .body(body);

        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(Error::NetworkError)?;
        let status = response.status().as_u16();

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(Error::NetworkError))
            .boxed();

        Ok(StreamingResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn response(status: u16, chunks: Vec<&'static str>) -> StreamingResponse {
        StreamingResponse {
            status,
            body: stream::iter(chunks.into_iter().map(|c| Ok(c.as_bytes().to_vec()))).boxed(),
        }
    }

    #[tokio::test]
    async fn test_drain_text_truncates() {
        let resp = response(500, vec!["abc", "defgh", "ij"]);
        assert!(!resp.is_success());
        assert_eq!(resp.drain_text(6).await.unwrap(), "abcdef");
    }

    #[tokio::test]
    async fn test_drain_text_short_body() {
        let resp = response(404, vec!["not found"]);
        assert_eq!(resp.drain_text(300).await.unwrap(), "not found");
    }

    #[test]
    fn test_transport_builds() {
        let transport = HttpTransport::from_config(&GenerationConfig::default());
        assert!(transport.is_ok());
    }

    #[test]
    fn test_transport_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HttpTransport>();
    }
}
