use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::batch::{BatchConfig, BatchError};
use crate::client::DEFAULT_TOKEN_URL;
use crate::sources::Properties;
use crate::writer::RetrySettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error(transparent)]
    Batch(#[from] BatchError),
    #[error("`retry_attempts` must be greater than zero")]
    InvalidRetryAttempts,
}

fn default_endpoint() -> String {
    "https://api.scp.splunk.com".to_string()
}

fn default_token_url() -> String {
    DEFAULT_TOKEN_URL.to_string()
}

const fn default_retry_attempts() -> usize {
    3
}

const fn default_retry_initial_backoff() -> Duration {
    Duration::from_secs(1)
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    pub client_id: String,
    pub client_secret: String,

    #[serde(default = "default_token_url")]
    pub token_url: String,
}

/// Configures delivery request behavior.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RequestConfig {
    /// Total attempt budget per batch, including the first attempt.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: usize,

    #[serde(
        default = "default_retry_initial_backoff",
        with = "humanize::duration::serde"
    )]
    pub retry_initial_backoff: Duration,

    #[serde(default, with = "humanize::duration::serde_option")]
    pub retry_max_backoff: Option<Duration>,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            retry_initial_backoff: default_retry_initial_backoff(),
            retry_max_backoff: None,
        }
    }
}

impl RequestConfig {
    pub fn validate(self) -> Result<RetrySettings, ConfigError> {
        if self.retry_attempts == 0 {
            return Err(ConfigError::InvalidRetryAttempts);
        }

        Ok(RetrySettings {
            attempts: self.retry_attempts,
            initial_backoff: self.retry_initial_backoff,
            max_backoff: self.retry_max_backoff,
        })
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The base URL of the ingest API.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    pub tenant: String,

    pub auth: AuthConfig,

    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub request: RequestConfig,

    /// Metadata stamped on every produced event.
    #[serde(default)]
    pub properties: Properties,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;

        Ok(serde_yaml::from_str(&text)?)
    }
}
