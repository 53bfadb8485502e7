//! Caller-facing image service
//!
//! Ties the credential, the job store, the engine, and the runner together.
//! Submission validates synchronously and returns at once; everything after
//! that happens in a background task the caller observes by polling.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::config::Config;
use crate::endpoints::EndpointSet;
use crate::engine::{GenerationEngine, JobInput};
use crate::error::{Error, Result};
use crate::health::{self, HealthReport};
use crate::job::{Job, JobId, JobStatus, JobSummary};
use crate::provider::{GenerateContentRequest, HttpTransport, Part, Transport};
use crate::request::{GenerationRequest, build_payload};
use crate::runner::JobRunner;
use crate::secret::{SecretStore, mask};
use crate::store::{InMemoryJobStore, JobStore};

/// Prompt sent when checking a key
const VERIFY_PROMPT: &str = "Hi";

/// Characters of an unexpected verification body echoed back
const VERIFY_BODY_CHARS: usize = 200;

/// Characters of the prompt written to logs
const LOG_PROMPT_CHARS: usize = 50;

/// Handle returned by [`ImageService::submit`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmittedJob {
    pub id: JobId,
    pub status: JobStatus,
    /// Upstream model name the job runs against
    pub model: String,
}

/// Whether a credential is configured, without revealing it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialStatus {
    pub has_key: bool,
    pub masked_key: String,
}

/// Outcome of a live credential check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialCheck {
    pub valid: bool,
    pub message: String,
}

impl CredentialCheck {
    fn valid() -> Self {
        Self {
            valid: true,
            message: "API key is valid".to_string(),
        }
    }

    fn invalid(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: message.into(),
        }
    }
}

/// Asynchronous image generation service
pub struct ImageService {
    config: Config,
    endpoints: EndpointSet,
    secrets: Arc<SecretStore>,
    store: Arc<dyn JobStore>,
    transport: Arc<dyn Transport>,
    engine: GenerationEngine,
    runner: JobRunner,
}

impl fmt::Debug for ImageService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageService")
            .field("endpoints", &self.endpoints)
            .field("has_key", &self.secrets.is_set())
            .field("in_flight", &self.runner.in_flight())
            .finish_non_exhaustive()
    }
}

impl ImageService {
    pub fn builder() -> ImageServiceBuilder {
        ImageServiceBuilder::default()
    }

    /// Build a service from configuration, loading the persisted key
    pub fn from_config(config: Config) -> Result<Self> {
        let key_path = Config::api_key_path().map_err(|e| Error::ConfigError(e.to_string()))?;
        Self::builder()
            .config(config)
            .secrets(SecretStore::load(key_path))
            .build()
    }

    /// Validate a request and start generating in the background
    pub async fn submit(&self, request: GenerationRequest) -> Result<SubmittedJob> {
        let (submitted, _task) = self.submit_tracked(request).await?;
        Ok(submitted)
    }

    /// Like [`Self::submit`], also returning the background task's handle
    pub async fn submit_tracked(
        &self,
        request: GenerationRequest,
    ) -> Result<(SubmittedJob, JoinHandle<JobStatus>)> {
        info!(
            prompt = %request.prompt.chars().take(LOG_PROMPT_CHARS).collect::<String>(),
            model = %request.model,
            references = request.reference_images.len(),
            "Generation request received"
        );

        if !self.secrets.is_set() {
            return Err(Error::CredentialMissing);
        }
        if !request.has_prompt() {
            return Err(Error::EmptyPrompt);
        }

        let credential = self.secrets.current();
        let model = request.model.model_name(&self.config.models).to_string();
        let payload = build_payload(&request);

        let job = self.store.create(&request, &model).await?;
        let task = self.runner.spawn(
            self.engine.clone(),
            JobInput {
                id: job.id,
                model: model.clone(),
                payload,
                credential,
            },
        );

        info!(job_id = %job.id, model = %model, "Job submitted");
        Ok((
            SubmittedJob {
                id: job.id,
                status: job.status,
                model,
            },
            task,
        ))
    }

    /// Current snapshot of a job
    pub async fn poll(&self, id: JobId) -> Result<Job> {
        self.store.get(id).await
    }

    /// Summaries of the most recent jobs, newest first
    pub async fn list(&self, limit: usize) -> Result<Vec<JobSummary>> {
        let jobs = self.store.list(limit).await?;
        Ok(jobs.iter().map(Job::summary).collect())
    }

    /// Summaries using the configured default limit
    pub async fn list_recent(&self) -> Result<Vec<JobSummary>> {
        self.list(self.config.jobs.list_limit).await
    }

    /// Remove a job; a still-running job finishes but its writes are dropped
    pub async fn delete(&self, id: JobId) -> Result<()> {
        self.store.delete(id).await?;
        info!(job_id = %id, "Job deleted");
        Ok(())
    }

    /// Poll until the job reaches a terminal state
    pub async fn wait(&self, id: JobId, interval: Duration) -> Result<Job> {
        self.wait_with(id, interval, |_| {}).await
    }

    /// Poll until terminal, handing every snapshot to `on_poll`
    pub async fn wait_with<F>(&self, id: JobId, interval: Duration, mut on_poll: F) -> Result<Job>
    where
        F: FnMut(&Job),
    {
        loop {
            let job = self.store.get(id).await?;
            on_poll(&job);
            if job.status.is_terminal() {
                return Ok(job);
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Jobs still generating
    pub fn in_flight(&self) -> usize {
        self.runner.in_flight()
    }

    /// Wait for all background jobs to finish
    pub async fn shutdown(&self) {
        self.runner.shutdown().await;
    }

    /// Persist a new key; later submissions use it, running jobs keep theirs
    pub fn set_credential(&self, secret: &str) -> Result<CredentialStatus> {
        let secret = secret.trim();
        if secret.is_empty() {
            return Err(Error::InvalidInput("API key must not be empty".to_string()));
        }
        self.secrets.save(secret)?;
        Ok(self.check_credential())
    }

    pub fn check_credential(&self) -> CredentialStatus {
        CredentialStatus {
            has_key: self.secrets.is_set(),
            masked_key: self.secrets.masked(),
        }
    }

    /// Check a key against the primary endpoint with a tiny text request
    ///
    /// `None` checks the stored key. Never fails; problems are reported in
    /// the returned [`CredentialCheck`].
    pub async fn verify_credential(&self, secret: Option<&str>) -> CredentialCheck {
        let secret = match secret {
            Some(s) => Zeroizing::new(s.trim().to_string()),
            None => self.secrets.current(),
        };
        if secret.is_empty() {
            return CredentialCheck::invalid("No API key provided");
        }

        let Some(primary) = self.endpoints.primary() else {
            return CredentialCheck::invalid("No endpoints configured");
        };

        let url = primary.generate_url(&self.config.verify.model);
        let body = match serde_json::to_vec(&GenerateContentRequest::from_parts(vec![Part::text(
            VERIFY_PROMPT,
        )])) {
            Ok(body) => body,
            Err(e) => return CredentialCheck::invalid(format!("Could not encode request: {}", e)),
        };
        let timeout = Duration::from_secs(self.config.verify.timeout_secs);

        let response = match self.transport.post(&url, &secret, body, Some(timeout)).await {
            Ok(response) => response,
            Err(e) => {
                warn!(key = %mask(&secret), error = %e, "Key verification request failed");
                let detail = match e {
                    Error::NetworkError(inner) => inner.to_string(),
                    other => other.to_string(),
                };
                return CredentialCheck::invalid(format!("Network error: {}", detail));
            }
        };

        let status = response.status;
        let check = match status {
            200 => CredentialCheck::valid(),
            401 | 403 => CredentialCheck::invalid("API key is invalid or expired"),
            _ => {
                let body = response
                    .drain_text(VERIFY_BODY_CHARS * 4)
                    .await
                    .unwrap_or_default();
                CredentialCheck::invalid(format!(
                    "Verification failed ({}): {}",
                    status,
                    body.chars().take(VERIFY_BODY_CHARS).collect::<String>()
                ))
            }
        };

        info!(key = %mask(&secret), status, valid = check.valid, "API key verified");
        check
    }

    pub fn health(&self) -> HealthReport {
        HealthReport::from_checks(
            vec![
                health::check_api_key(&self.secrets),
                health::check_endpoints(&self.endpoints),
                health::check_config(),
            ],
            self.runner.in_flight(),
        )
    }
}

/// Builder for [`ImageService`]
///
/// Unset parts default to the HTTP transport, an in-memory job store, and
/// an empty key held in the configured key file location.
#[derive(Default)]
pub struct ImageServiceBuilder {
    config: Option<Config>,
    secrets: Option<SecretStore>,
    store: Option<Arc<dyn JobStore>>,
    transport: Option<Arc<dyn Transport>>,
}

impl ImageServiceBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn secrets(mut self, secrets: SecretStore) -> Self {
        self.secrets = Some(secrets);
        self
    }

    pub fn store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Result<ImageService> {
        let config = self.config.unwrap_or_default();
        config
            .validate()
            .map_err(|e| Error::ConfigError(e.to_string()))?;

        let secrets = match self.secrets {
            Some(secrets) => secrets,
            None => {
                let path =
                    Config::api_key_path().map_err(|e| Error::ConfigError(e.to_string()))?;
                SecretStore::load(path)
            }
        };
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::from_config(&config.generation)?),
        };
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryJobStore::new()));

        let endpoints = EndpointSet::new(&config.endpoints.hosts);
        let engine = GenerationEngine::new(transport.clone(), endpoints.clone(), store.clone());

        Ok(ImageService {
            config,
            endpoints,
            secrets: Arc::new(secrets),
            store,
            transport,
            engine,
            runner: JobRunner::new(),
        })
    }
}
