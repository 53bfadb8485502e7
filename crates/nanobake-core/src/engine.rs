//! Generation engine
//!
//! Runs one job to a terminal state: walks the endpoint set in priority
//! order, streams each response while publishing a size-based progress
//! estimate, classifies the decoded body, and stops at the first image.
//! Every per-endpoint failure is absorbed; only the last reason survives as
//! the job's error.

use std::fmt;
use std::sync::Arc;

use futures_util::StreamExt;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use crate::classify::{Classification, classify};
use crate::endpoints::{Endpoint, EndpointSet};
use crate::error::Error;
use crate::job::{
    GeneratedImage, JobId, JobStatus, PROGRESS_ATTEMPT_STARTED, PROGRESS_PARSING,
    streaming_progress,
};
use crate::provider::{GenerateContentRequest, GenerateContentResponse, Transport};
use crate::store::JobStore;

/// Characters of an error body kept for diagnostics
const ERROR_BODY_CHARS: usize = 300;

/// Bytes read into memory from an error body (worst case 4 bytes per char)
const ERROR_BODY_KEEP_BYTES: usize = ERROR_BODY_CHARS * 4;

/// Job error when no attempt recorded anything more specific
pub const ALL_ENDPOINTS_FAILED: &str = "All endpoints failed";

/// Everything the engine needs to run one job
pub struct JobInput {
    pub id: JobId,
    /// Upstream model name
    pub model: String,
    pub payload: GenerateContentRequest,
    pub credential: Zeroizing<String>,
}

impl fmt::Debug for JobInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobInput")
            .field("id", &self.id)
            .field("model", &self.model)
            .field("parts", &self.payload.parts().len())
            .finish_non_exhaustive()
    }
}

/// Why a single endpoint attempt did not produce an image
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("API error ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("{kind}: {message}")]
    Transport { kind: &'static str, message: String },

    #[error("DecodeError: {0}")]
    Decode(String),

    #[error("{0}")]
    Rejected(Classification),
}

impl AttemptError {
    fn transport(err: Error) -> Self {
        match err {
            Error::NetworkError(e) => Self::Transport {
                kind: reqwest_error_kind(&e),
                message: e.to_string(),
            },
            other => Self::Transport {
                kind: "TransportError",
                message: other.to_string(),
            },
        }
    }
}

fn reqwest_error_kind(err: &reqwest::Error) -> &'static str {
    if err.is_timeout() {
        "Timeout"
    } else if err.is_connect() {
        "ConnectError"
    } else if err.is_body() || err.is_decode() {
        "BodyError"
    } else {
        "RequestError"
    }
}

/// Drives generation jobs against the endpoint set
#[derive(Clone)]
pub struct GenerationEngine {
    transport: Arc<dyn Transport>,
    endpoints: EndpointSet,
    store: Arc<dyn JobStore>,
}

impl fmt::Debug for GenerationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationEngine")
            .field("endpoints", &self.endpoints)
            .finish_non_exhaustive()
    }
}

impl GenerationEngine {
    pub fn new(
        transport: Arc<dyn Transport>,
        endpoints: EndpointSet,
        store: Arc<dyn JobStore>,
    ) -> Self {
        Self {
            transport,
            endpoints,
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Run a job to completion or exhaustion
    ///
    /// Always leaves the job in a terminal state and returns that state.
    pub async fn run(&self, input: JobInput) -> JobStatus {
        let JobInput {
            id,
            model,
            payload,
            credential,
        } = input;

        info!(
            job_id = %id,
            model = %model,
            endpoints = self.endpoints.len(),
            "Generation started"
        );

        let body = match serde_json::to_vec(&payload) {
            Ok(body) => body,
            Err(e) => return self.finish_failed(id, format!("EncodeError: {}", e)).await,
        };

        self.record_progress(id, PROGRESS_ATTEMPT_STARTED).await;

        let mut last_error: Option<String> = None;

        for endpoint in &self.endpoints {
            debug!(job_id = %id, endpoint = %endpoint.base_url, rank = endpoint.rank, "Trying endpoint");

            match self
                .attempt(id, endpoint, &model, &credential, body.clone())
                .await
            {
                Ok((image, thinking)) => {
                    info!(
                        job_id = %id,
                        endpoint = %endpoint.base_url,
                        mime_type = %image.mime_type,
                        image_chars = image.data.len(),
                        "Image generated"
                    );
                    if let Err(e) = self.store.complete(id, image, thinking).await {
                        warn!(job_id = %id, error = %e, "Could not record completed job");
                    }
                    return JobStatus::Completed;
                }
                Err(e) => {
                    warn!(
                        job_id = %id,
                        endpoint = %endpoint.base_url,
                        rank = endpoint.rank,
                        error = %e,
                        "Endpoint attempt failed"
                    );
                    last_error = Some(e.to_string());
                }
            }
        }

        let error = last_error.unwrap_or_else(|| ALL_ENDPOINTS_FAILED.to_string());
        self.finish_failed(id, error).await
    }

    /// One streamed POST against one mirror
    async fn attempt(
        &self,
        id: JobId,
        endpoint: &Endpoint,
        model: &str,
        credential: &str,
        body: Vec<u8>,
    ) -> Result<(GeneratedImage, Option<String>), AttemptError> {
        let url = endpoint.generate_url(model);

        let response = self
            .transport
            .post(&url, credential, body, None)
            .await
            .map_err(AttemptError::transport)?;

        debug!(job_id = %id, status = response.status, "Response status received");

        if !response.is_success() {
            let status = response.status;
            let body = response
                .drain_text(ERROR_BODY_KEEP_BYTES)
                .await
                .unwrap_or_else(|e| format!("<unreadable body: {}>", e));
            return Err(AttemptError::Status {
                status,
                body: body.chars().take(ERROR_BODY_CHARS).collect(),
            });
        }

        let mut stream = response.body;
        let mut content: Vec<u8> = Vec::new();
        let mut reported = PROGRESS_ATTEMPT_STARTED;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(AttemptError::transport)?;
            content.extend_from_slice(&chunk);

            let progress = streaming_progress(content.len() as u64);
            if progress > reported {
                self.record_progress(id, progress).await;
                reported = progress;
            }
        }

        debug!(job_id = %id, bytes = content.len(), "Response body received");
        self.record_progress(id, PROGRESS_PARSING).await;

        let decoded: GenerateContentResponse =
            serde_json::from_slice(&content).map_err(|e| AttemptError::Decode(e.to_string()))?;

        match classify(&decoded, &content) {
            Classification::Image { image, thinking } => Ok((image, thinking)),
            other => Err(AttemptError::Rejected(other)),
        }
    }

    async fn record_progress(&self, id: JobId, progress: u8) {
        if let Err(e) = self.store.advance(id, progress).await {
            debug!(job_id = %id, progress, error = %e, "Progress update dropped");
        }
    }

    async fn finish_failed(&self, id: JobId, error: String) -> JobStatus {
        error!(job_id = %id, error = %error, "Generation failed");
        if let Err(e) = self.store.fail(id, error).await {
            warn!(job_id = %id, error = %e, "Could not record failed job");
        }
        JobStatus::Failed
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::Result;
    use crate::job::Job;
    use crate::provider::{Part, StreamingResponse};
    use crate::request::GenerationRequest;
    use crate::store::InMemoryJobStore;
    use async_trait::async_trait;
    use futures_util::stream;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Canned reply for one POST
    pub(crate) enum Reply {
        Status(u16, String),
        Chunks(Vec<Vec<u8>>),
        ConnectFailure(String),
        BrokenStream(Vec<u8>, String),
    }

    impl Reply {
        pub(crate) fn json(value: serde_json::Value) -> Self {
            Self::Chunks(vec![serde_json::to_vec(&value).unwrap()])
        }

        pub(crate) fn image(data: &str) -> Self {
            Self::json(json!({
                "candidates": [{"content": {"parts": [
                    {"text": "rendered"},
                    {"inlineData": {"mimeType": "image/png", "data": data}}
                ]}}]
            }))
        }
    }

    #[derive(Debug, Clone)]
    pub(crate) struct Call {
        pub url: String,
        pub api_key: String,
        pub body: serde_json::Value,
        pub timeout: Option<Duration>,
    }

    /// Transport that replays scripted replies in call order
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        replies: Mutex<VecDeque<Reply>>,
        calls: Mutex<Vec<Call>>,
    }

    impl ScriptedTransport {
        pub(crate) fn new(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn post(
            &self,
            url: &str,
            api_key: &str,
            body: Vec<u8>,
            timeout: Option<Duration>,
        ) -> Result<StreamingResponse> {
            self.calls.lock().unwrap().push(Call {
                url: url.to_string(),
                api_key: api_key.to_string(),
                body: serde_json::from_slice(&body).unwrap(),
                timeout,
            });

            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected request");

            let response = match reply {
                Reply::Status(status, body) => StreamingResponse {
                    status,
                    body: stream::iter(vec![Ok(body.into_bytes())]).boxed(),
                },
                Reply::Chunks(chunks) => StreamingResponse {
                    status: 200,
                    body: stream::iter(chunks.into_iter().map(Ok)).boxed(),
                },
                Reply::ConnectFailure(message) => return Err(Error::Other(message)),
                Reply::BrokenStream(first, message) => StreamingResponse {
                    status: 200,
                    body: stream::iter(vec![Ok(first), Err(Error::Other(message))]).boxed(),
                },
            };
            Ok(response)
        }
    }

    /// Store wrapper that records every progress value it accepts
    struct RecordingStore {
        inner: InMemoryJobStore,
        progress: Mutex<Vec<u8>>,
    }

    #[async_trait]
    impl JobStore for RecordingStore {
        async fn create(&self, request: &GenerationRequest, model_name: &str) -> Result<Job> {
            self.inner.create(request, model_name).await
        }
        async fn get(&self, id: JobId) -> Result<Job> {
            self.inner.get(id).await
        }
        async fn list(&self, limit: usize) -> Result<Vec<Job>> {
            self.inner.list(limit).await
        }
        async fn delete(&self, id: JobId) -> Result<()> {
            self.inner.delete(id).await
        }
        async fn advance(&self, id: JobId, progress: u8) -> Result<()> {
            self.inner.advance(id, progress).await?;
            let current = self.inner.get(id).await?.progress;
            self.progress.lock().unwrap().push(current);
            Ok(())
        }
        async fn complete(
            &self,
            id: JobId,
            image: GeneratedImage,
            thinking: Option<String>,
        ) -> Result<()> {
            self.inner.complete(id, image, thinking).await
        }
        async fn fail(&self, id: JobId, error: String) -> Result<()> {
            self.inner.fail(id, error).await
        }
    }

    fn endpoints(n: usize) -> EndpointSet {
        EndpointSet::new((0..n).map(|i| format!("https://mirror{}.example/google", i)))
    }

    async fn setup(
        replies: Vec<Reply>,
        mirrors: usize,
    ) -> (GenerationEngine, Arc<ScriptedTransport>, Arc<InMemoryJobStore>, JobInput) {
        let transport = ScriptedTransport::new(replies);
        let store = Arc::new(InMemoryJobStore::new());
        let engine = GenerationEngine::new(transport.clone(), endpoints(mirrors), store.clone());

        let request = GenerationRequest::new("a lighthouse at dusk");
        let job = store.create(&request, "gemini-test").await.unwrap();
        let input = JobInput {
            id: job.id,
            model: "gemini-test".to_string(),
            payload: GenerateContentRequest::from_parts(vec![Part::text("a lighthouse at dusk")]),
            credential: Zeroizing::new("sk-test".to_string()),
        };
        (engine, transport, store, input)
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let (engine, transport, store, input) =
            setup(vec![Reply::image("IMG0"), Reply::image("IMG1")], 3).await;
        let id = input.id;

        assert_eq!(engine.run(input).await, JobStatus::Completed);

        let job = store.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.result.unwrap().data, "IMG0");
        assert_eq!(job.thinking.as_deref(), Some("rendered"));
        assert!(job.error.is_none());

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].url,
            "https://mirror0.example/google/v1beta/models/gemini-test:generateContent"
        );
        assert_eq!(calls[0].api_key, "sk-test");
        assert_eq!(calls[0].body["contents"][0]["parts"][0]["text"], "a lighthouse at dusk");
        assert!(calls[0].timeout.is_none());
    }

    #[tokio::test]
    async fn test_falls_back_past_every_failure_kind() {
        let replies = vec![
            Reply::Status(503, "overloaded".to_string()),
            Reply::ConnectFailure("connection refused".to_string()),
            Reply::Chunks(vec![b"{not json".to_vec()]),
            Reply::json(json!({"promptFeedback": {"blockReason": "SAFETY"}})),
            Reply::image("WINNER"),
        ];
        let (engine, transport, store, input) = setup(replies, 6).await;
        let id = input.id;

        assert_eq!(engine.run(input).await, JobStatus::Completed);

        let job = store.get(id).await.unwrap();
        assert_eq!(job.result.unwrap().data, "WINNER");
        assert!(job.error.is_none());

        let urls: Vec<String> = transport.calls().into_iter().map(|c| c.url).collect();
        assert_eq!(urls.len(), 5);
        assert!(urls[4].starts_with("https://mirror4.example"));
    }

    #[tokio::test]
    async fn test_all_endpoints_fail_keeps_last_reason() {
        let replies = vec![
            Reply::json(json!({"promptFeedback": {"blockReason": "SAFETY"}})),
            Reply::json(json!({"candidates": [{"content": {"parts": []}}]})),
        ];
        let (engine, _transport, store, input) = setup(replies, 2).await;
        let id = input.id;

        assert_eq!(engine.run(input).await, JobStatus::Failed);

        let job = store.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("No image data in response"));
        assert!(job.result.is_none());
        assert!(job.progress < 100);
    }

    #[tokio::test]
    async fn test_empty_reply_error_shows_raw_feedback() {
        let reply = Reply::json(json!({
            "candidates": [],
            "promptFeedback": {"safetyRatings": [
                {"category": "HARM_CATEGORY_HARASSMENT", "probability": "MEDIUM"}
            ]}
        }));
        let (engine, _transport, store, input) = setup(vec![reply], 1).await;
        let id = input.id;

        assert_eq!(engine.run(input).await, JobStatus::Failed);

        let error = store.get(id).await.unwrap().error.unwrap();
        assert!(error.starts_with("No result generated (response: "));
        assert!(error.contains("safetyRatings"));
        assert!(error.contains("HARM_CATEGORY_HARASSMENT"));
        assert!(error.contains("\"candidates\":[]"));
    }

    #[tokio::test]
    async fn test_status_error_body_truncated() {
        let body = "e".repeat(1000);
        let (engine, _transport, store, input) = setup(vec![Reply::Status(500, body)], 1).await;
        let id = input.id;

        engine.run(input).await;

        let error = store.get(id).await.unwrap().error.unwrap();
        assert!(error.starts_with("API error (500): "));
        assert_eq!(error.len(), "API error (500): ".len() + 300);
    }

    #[tokio::test]
    async fn test_text_only_reply_is_failure() {
        let reply = Reply::json(json!({
            "candidates": [{"content": {"parts": [{"text": "I cannot draw that"}]}}]
        }));
        let (engine, _transport, store, input) = setup(vec![reply], 1).await;
        let id = input.id;

        assert_eq!(engine.run(input).await, JobStatus::Failed);
        let error = store.get(id).await.unwrap().error.unwrap();
        assert!(error.contains("I cannot draw that"));
    }

    #[tokio::test]
    async fn test_broken_stream_moves_on() {
        let replies = vec![
            Reply::BrokenStream(vec![b' '; 10], "reset by peer".to_string()),
            Reply::image("OK"),
        ];
        let (engine, transport, store, input) = setup(replies, 2).await;
        let id = input.id;

        assert_eq!(engine.run(input).await, JobStatus::Completed);
        assert_eq!(transport.calls().len(), 2);
        assert_eq!(store.get(id).await.unwrap().result.unwrap().data, "OK");
    }

    #[tokio::test]
    async fn test_no_endpoints() {
        let (engine, _transport, store, input) = setup(vec![], 0).await;
        let id = input.id;

        assert_eq!(engine.run(input).await, JobStatus::Failed);
        assert_eq!(
            store.get(id).await.unwrap().error.as_deref(),
            Some(ALL_ENDPOINTS_FAILED)
        );
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_across_attempts() {
        let big_error = Reply::Chunks(vec![vec![b'x'; 30_000], vec![b'y'; 30_000]]);
        let mut body = serde_json::to_vec(&json!({
            "candidates": [{"content": {"parts": [{"inlineData": {"data": "Z"}}]}}]
        }))
        .unwrap();
        let tail = body.split_off(body.len() / 2);

        let transport = ScriptedTransport::new(vec![big_error, Reply::Chunks(vec![body, tail])]);
        let store = Arc::new(RecordingStore {
            inner: InMemoryJobStore::new(),
            progress: Mutex::new(Vec::new()),
        });
        let engine = GenerationEngine::new(transport, endpoints(2), store.clone());
        let job = store
            .create(&GenerationRequest::new("p"), "m")
            .await
            .unwrap();

        let status = engine
            .run(JobInput {
                id: job.id,
                model: "m".to_string(),
                payload: GenerateContentRequest::from_parts(vec![Part::text("p")]),
                credential: Zeroizing::new("k".to_string()),
            })
            .await;
        assert_eq!(status, JobStatus::Completed);

        let observed = store.progress.lock().unwrap().clone();
        assert_eq!(observed.first(), Some(&30));
        assert!(observed.contains(&66));
        assert!(observed.contains(&90));
        assert!(observed.contains(&95));
        assert!(observed.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(store.get(job.id).await.unwrap().progress, 100);
    }

    #[tokio::test]
    async fn test_deleted_job_still_terminates() {
        let (engine, transport, store, input) = setup(vec![Reply::image("IMG")], 1).await;
        let id = input.id;
        store.delete(id).await.unwrap();

        assert_eq!(engine.run(input).await, JobStatus::Completed);
        assert_eq!(transport.calls().len(), 1);
        assert!(store.get(id).await.is_err());
    }
}
