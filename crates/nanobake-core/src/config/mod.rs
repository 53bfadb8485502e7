//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable that relocates the config directory
pub const CONFIG_DIR_ENV: &str = "NANOBAKE_CONFIG_DIR";

/// Nanobake configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub endpoints: EndpointsConfig,
    pub models: ModelNames,
    pub generation: GenerationConfig,
    pub verify: VerifyConfig,
    pub jobs: JobsConfig,
}

/// Mirror hosts, highest priority first
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointsConfig {
    pub hosts: Vec<String>,
}

/// Upstream model names behind the `fast` and `pro` selectors
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelNames {
    pub fast: String,
    pub pro: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub list_limit: usize,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            hosts: vec![
                "https://api.zzz-api.top/google".to_string(),
                "https://api.zhizengzeng.com/google".to_string(),
            ],
        }
    }
}

impl Default for ModelNames {
    fn default() -> Self {
        Self {
            fast: "gemini-2.5-flash-image".to_string(),
            pro: "gemini-3-pro-image-preview".to_string(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 60,
            read_timeout_secs: 600,
        }
    }
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.0-flash".to_string(),
            timeout_secs: 30,
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self { list_limit: 20 }
    }
}

impl GenerationConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var(CONFIG_DIR_ENV) {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("nanobake")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Path of the persisted provider key
    pub fn api_key_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("api_key"))
    }

    /// Load configuration from file, or fall back to defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.endpoints.hosts.is_empty() {
            return Err(anyhow!("At least one endpoint host must be configured"));
        }
        for host in &self.endpoints.hosts {
            if !(host.starts_with("http://") || host.starts_with("https://")) {
                return Err(anyhow!("Endpoint host must be an http(s) URL: {}", host));
            }
        }
        if self.models.fast.trim().is_empty() || self.models.pro.trim().is_empty() {
            return Err(anyhow!("Model names must not be empty"));
        }
        if self.generation.connect_timeout_secs == 0 || self.generation.read_timeout_secs == 0 {
            return Err(anyhow!("Timeouts must be greater than zero"));
        }
        if self.verify.model.trim().is_empty() {
            return Err(anyhow!("verify.model must not be empty"));
        }
        if self.verify.timeout_secs == 0 {
            return Err(anyhow!("verify.timeout_secs must be greater than zero"));
        }
        if self.jobs.list_limit == 0 {
            return Err(anyhow!("jobs.list_limit must be greater than zero"));
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            "endpoints.hosts" => Ok(self.endpoints.hosts.join(", ")),

            "models.fast" => Ok(self.models.fast.clone()),
            "models.pro" => Ok(self.models.pro.clone()),

            "generation.connect_timeout_secs" => {
                Ok(self.generation.connect_timeout_secs.to_string())
            }
            "generation.read_timeout_secs" => Ok(self.generation.read_timeout_secs.to_string()),

            "verify.model" => Ok(self.verify.model.clone()),
            "verify.timeout_secs" => Ok(self.verify.timeout_secs.to_string()),

            "jobs.list_limit" => Ok(self.jobs.list_limit.to_string()),

            "api_key" => Err(anyhow!(
                "The API key is not part of the configuration. Use `nanobake key check` instead."
            )),

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `nanobake config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "endpoints.hosts" => {
                let hosts: Vec<String> = value
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                if hosts.is_empty() {
                    return Err(anyhow!("At least one endpoint host is required"));
                }
                self.endpoints.hosts = hosts;
            }

            "models.fast" => self.models.fast = value.trim().to_string(),
            "models.pro" => self.models.pro = value.trim().to_string(),

            "generation.connect_timeout_secs" => {
                self.generation.connect_timeout_secs = parse_secs(key, value)?;
            }
            "generation.read_timeout_secs" => {
                self.generation.read_timeout_secs = parse_secs(key, value)?;
            }

            "verify.model" => self.verify.model = value.trim().to_string(),
            "verify.timeout_secs" => self.verify.timeout_secs = parse_secs(key, value)?,

            "jobs.list_limit" => {
                self.jobs.list_limit = value
                    .parse()
                    .with_context(|| format!("Invalid list_limit value: {}", value))?;
            }

            "api_key" => {
                return Err(anyhow!(
                    "API keys cannot be stored in configuration. Use `nanobake key set <key>` instead."
                ));
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `nanobake config list` to see available keys.",
                    key
                ));
            }
        }
        self.validate()
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let keys = [
            "endpoints.hosts",
            "models.fast",
            "models.pro",
            "generation.connect_timeout_secs",
            "generation.read_timeout_secs",
            "verify.model",
            "verify.timeout_secs",
            "jobs.list_limit",
        ];

        keys.into_iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}

fn parse_secs(key: &str, value: &str) -> anyhow::Result<u64> {
    let secs: u64 = value
        .parse()
        .with_context(|| format!("Invalid value for {}: {}", key, value))?;
    if secs == 0 {
        return Err(anyhow!("{} must be greater than zero", key));
    }
    Ok(secs)
}
