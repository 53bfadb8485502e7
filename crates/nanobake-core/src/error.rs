//! Error types for Nanobake

use thiserror::Error;

use crate::job::JobStatus;

/// Result type alias using Nanobake's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Nanobake error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Validation errors (E001-E099)
    #[error("Prompt must not be empty.")]
    EmptyPrompt,

    #[error("No API key configured. Set one with `nanobake key set <key>`.")]
    CredentialMissing,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Job errors (E100-E199)
    #[error("Job '{0}' not found.")]
    JobNotFound(String),

    #[error("Job '{id}' is already {status} and can no longer change.")]
    InvalidTransition { id: String, status: JobStatus },

    // Network errors (E200-E299)
    #[error("Network error: {0}. Check your internet connection.")]
    NetworkError(#[from] reqwest::Error),

    #[error("Provider error: {0}")]
    Provider(String),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyPrompt => "E001",
            Self::CredentialMissing => "E002",
            Self::InvalidInput(_) => "E003",
            Self::JobNotFound(_) => "E100",
            Self::InvalidTransition { .. } => "E101",
            Self::NetworkError(_) => "E200",
            Self::Provider(_) => "E201",
            Self::ConfigError(_) => "E600",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::CredentialMissing => Some("nanobake key set <key>".to_string()),
            Self::NetworkError(_) => Some("Check internet connection".to_string()),
            Self::Provider(_) => Some("nanobake key verify".to_string()),
            Self::ConfigError(_) => Some("nanobake config list".to_string()),
            _ => None,
        }
    }

    /// Whether the caller's submission was rejected before a job existed
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::EmptyPrompt | Self::CredentialMissing | Self::InvalidInput(_)
        )
    }
}
