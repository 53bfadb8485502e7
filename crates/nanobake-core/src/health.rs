//! Health checks
//!
//! Diagnostics behind `nanobake health` and [`crate::service::ImageService::health`].

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::endpoints::EndpointSet;
use crate::secret::SecretStore;

/// Health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: HealthStatus,
    pub message: Option<String>,
}

/// Health status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Warning,
    Error,
}

impl HealthStatus {
    fn severity(self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::Warning => 1,
            Self::Error => 2,
        }
    }

    /// Marker used in text output
    pub fn marker(self) -> &'static str {
        match self {
            Self::Ok => "[OK]",
            Self::Warning | Self::Error => "[!!]",
        }
    }
}

/// Overall service health report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub overall_status: HealthStatus,
    pub checks: Vec<HealthCheck>,
    /// Generation jobs currently running
    pub in_flight_jobs: usize,
    pub timestamp: String,
}

impl HealthReport {
    pub fn from_checks(checks: Vec<HealthCheck>, in_flight_jobs: usize) -> Self {
        let overall_status = checks
            .iter()
            .map(|c| c.status)
            .max_by_key(|s| s.severity())
            .unwrap_or(HealthStatus::Ok);

        Self {
            overall_status,
            checks,
            in_flight_jobs,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Check that a credential is configured
pub fn check_api_key(secrets: &SecretStore) -> HealthCheck {
    if secrets.is_set() {
        HealthCheck {
            name: "API key".to_string(),
            status: HealthStatus::Ok,
            message: Some(format!("Configured ({})", secrets.masked())),
        }
    } else {
        HealthCheck {
            name: "API key".to_string(),
            status: HealthStatus::Warning,
            message: Some("Not configured; generation requests will be rejected".to_string()),
        }
    }
}

/// Check that at least one mirror is configured
pub fn check_endpoints(endpoints: &EndpointSet) -> HealthCheck {
    match endpoints.primary() {
        Some(primary) => HealthCheck {
            name: "Endpoints".to_string(),
            status: HealthStatus::Ok,
            message: Some(format!(
                "{} configured, primary {}",
                endpoints.len(),
                primary.base_url
            )),
        },
        None => HealthCheck {
            name: "Endpoints".to_string(),
            status: HealthStatus::Error,
            message: Some("No endpoints configured; every job will fail".to_string()),
        },
    }
}

/// Check config file
pub fn check_config() -> HealthCheck {
    match Config::config_path() {
        Ok(path) if path.exists() => HealthCheck {
            name: "Configuration".to_string(),
            status: HealthStatus::Ok,
            message: Some(format!("Found at {}", path.display())),
        },
        Ok(path) => HealthCheck {
            name: "Configuration".to_string(),
            status: HealthStatus::Ok,
            message: Some(format!("Not found at {} (using defaults)", path.display())),
        },
        Err(e) => HealthCheck {
            name: "Configuration".to_string(),
            status: HealthStatus::Warning,
            message: Some(format!("Could not determine config directory: {}", e)),
        },
    }
}
