//! Generation jobs and their lifecycle
//!
//! A job starts `processing` and moves exactly once to `completed` or
//! `failed`. Progress only grows while processing; a completed job is
//! pinned at 100 and a failed job keeps its last value.

use std::fmt;
use std::str::FromStr;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Progress reported right after a job is created
pub const PROGRESS_CREATED: u8 = 10;
/// Progress once an endpoint attempt has begun
pub const PROGRESS_ATTEMPT_STARTED: u8 = 30;
/// Ceiling while the response body is streaming
pub const PROGRESS_STREAM_CAP: u8 = 90;
/// Progress while the finished body is parsed and classified
pub const PROGRESS_PARSING: u8 = 95;
pub const PROGRESS_DONE: u8 = 100;

/// Bytes that move the streaming estimate across its full 60-point span
const STREAM_BYTES_SCALE: u64 = 50_000;

const SUMMARY_PROMPT_CHARS: usize = 50;

/// Progress estimate after `bytes` of the response body have arrived
///
/// `min(30 + floor(bytes / 50000 * 60), 90)`; the provider does not reliably
/// send a content length, so this is a heartbeat rather than a fraction.
pub fn streaming_progress(bytes: u64) -> u8 {
    let span = u64::from(PROGRESS_STREAM_CAP - PROGRESS_ATTEMPT_STARTED);
    let gained = bytes.saturating_mul(span) / STREAM_BYTES_SCALE;
    let progress = u64::from(PROGRESS_ATTEMPT_STARTED).saturating_add(gained);
    progress.min(u64::from(PROGRESS_STREAM_CAP)) as u8
}

/// Opaque job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| Error::JobNotFound(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Processing)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Image returned by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub mime_type: String,
    /// Base64 payload exactly as received
    pub data: String,
}

impl GeneratedImage {
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }

    /// Decode the base64 payload
    pub fn decode(&self) -> Result<Vec<u8>> {
        BASE64
            .decode(self.data.trim())
            .map_err(|e| Error::Provider(format!("Invalid base64 image data: {}", e)))
    }

    /// File extension matching the MIME type
    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            "image/webp" => "webp",
            "image/gif" => "gif",
            _ => "png",
        }
    }
}

/// Snapshot of one generation job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    pub result: Option<GeneratedImage>,
    /// Text the model sent alongside the image
    pub thinking: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub model: String,
    pub prompt: String,
}

impl Job {
    pub fn new(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            status: JobStatus::Processing,
            progress: PROGRESS_CREATED,
            result: None,
            thinking: None,
            error: None,
            created_at: now,
            updated_at: now,
            model: model.into(),
            prompt: prompt.into(),
        }
    }

    /// Raise progress to `progress` if higher; never lowers it
    ///
    /// Returns whether the stored value changed.
    pub fn advance(&mut self, progress: u8) -> Result<bool> {
        self.ensure_processing()?;
        // 100 is reserved for completion.
        let progress = progress.min(PROGRESS_PARSING);
        if progress <= self.progress {
            return Ok(false);
        }
        self.progress = progress;
        self.updated_at = Utc::now();
        Ok(true)
    }

    pub fn complete(&mut self, image: GeneratedImage, thinking: Option<String>) -> Result<()> {
        self.ensure_processing()?;
        self.status = JobStatus::Completed;
        self.progress = PROGRESS_DONE;
        self.result = Some(image);
        self.thinking = thinking;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Mark the job failed; progress stays where it was
    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.ensure_processing()?;
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            status: self.status,
            progress: self.progress,
            prompt: self.prompt.chars().take(SUMMARY_PROMPT_CHARS).collect(),
            model: self.model.clone(),
            created_at: self.created_at,
        }
    }

    fn ensure_processing(&self) -> Result<()> {
        if self.status.is_terminal() {
            return Err(Error::InvalidTransition {
                id: self.id.to_string(),
                status: self.status,
            });
        }
        Ok(())
    }
}

/// Listing view of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    /// First 50 characters of the prompt
    pub prompt: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
}
