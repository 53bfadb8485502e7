//! Nanobake Core Library
//!
//! Asynchronous image generation against Gemini-compatible mirrors:
//! - Request model and wire payloads (`generateContent`)
//! - Ordered endpoint failover with streamed progress estimates
//! - Response classification (image, text-only, safety block)
//! - In-memory job store with monotonic progress
//! - API key storage, verification, and configuration

pub mod classify;
pub mod config;
pub mod endpoints;
pub mod engine;
pub mod error;
pub mod health;
pub mod job;
pub mod provider;
pub mod request;
pub mod runner;
pub mod secret;
pub mod service;
pub mod store;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::job::{GeneratedImage, Job, JobId, JobStatus, JobSummary};
    pub use crate::request::{GenerationRequest, ModelChoice, ReferenceImage, SizeHint};
    pub use crate::service::{CredentialCheck, CredentialStatus, ImageService, SubmittedJob};
}
