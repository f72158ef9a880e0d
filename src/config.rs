//! Configuration for the hailstorm pipeline.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::error::{ConfigError, InvalidValueSnafu, ReadFileSnafu, YamlParseSnafu};
use crate::fetch::RetryPolicy;

/// Environment variable consulted when `api.app_token` is unset.
pub const APP_TOKEN_ENV: &str = "HAILSTORM_APP_TOKEN";

/// Configuration for the upstream dataset API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the dataset resource.
    pub base_url: String,
    /// Rows requested per page.
    pub page_limit: u64,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Optional app token for elevated rate limits.
    pub app_token: Option<String>,
    /// Maximum attempts per page request.
    pub max_attempts: u32,
    /// Base backoff delay in seconds.
    pub backoff_base_secs: u64,
    /// Backoff delay cap in seconds.
    pub backoff_cap_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://data.cityofchicago.org/resource/ajtu-isnz.json".to_string(),
            page_limit: 5000,
            timeout_secs: 60,
            app_token: None,
            max_attempts: 7,
            backoff_base_secs: 1,
            backoff_cap_secs: 60,
        }
    }
}

impl ApiConfig {
    /// App token from config, falling back to the environment.
    pub fn resolved_app_token(&self) -> Option<String> {
        self.app_token
            .clone()
            .or_else(|| std::env::var(APP_TOKEN_ENV).ok())
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }

    /// Retry policy for page requests.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base: Duration::from_secs(self.backoff_base_secs),
            multiplier: 2.0,
            cap: Duration::from_secs(self.backoff_cap_secs),
        }
    }
}

/// Configuration for the ingest fetch window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Lookback window on the very first run, in days.
    pub first_run_lookback_days: i64,
    /// Re-fetch overlap subtracted from the watermark, in hours.
    pub lookback_hours: i64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            first_run_lookback_days: 60,
            lookback_hours: 6,
        }
    }
}

/// Output root paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for raw date partitions.
    pub raw_root: PathBuf,
    /// Root directory for staged date partitions.
    pub staging_root: PathBuf,
    /// Path of the persisted ingest state file.
    pub state_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            raw_root: PathBuf::from("data/raw"),
            staging_root: PathBuf::from("data/staging"),
            state_path: PathBuf::from("data/state/ingest_state.json"),
        }
    }
}

/// Configuration for the staging pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StagingConfig {
    /// Number of trailing raw date partitions to (re-)stage.
    pub trailing_days: usize,
    /// Quantile level for outlier thresholds.
    pub outlier_quantile: f64,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            trailing_days: 7,
            outlier_quantile: 0.999,
        }
    }
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub ingest: IngestConfig,
    pub storage: StorageConfig,
    pub staging: StagingConfig,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
        let config: Config = serde_yaml::from_str(&contents).context(YamlParseSnafu { path })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(
            self.api.page_limit > 0,
            InvalidValueSnafu {
                field: "api.page_limit",
                message: "must be greater than zero".to_string(),
            }
        );
        ensure!(
            self.api.max_attempts > 0,
            InvalidValueSnafu {
                field: "api.max_attempts",
                message: "must be greater than zero".to_string(),
            }
        );
        ensure!(
            self.staging.trailing_days > 0,
            InvalidValueSnafu {
                field: "staging.trailing_days",
                message: "must be greater than zero".to_string(),
            }
        );
        ensure!(
            self.staging.outlier_quantile > 0.0 && self.staging.outlier_quantile < 1.0,
            InvalidValueSnafu {
                field: "staging.outlier_quantile",
                message: format!(
                    "must be strictly between 0 and 1, got {}",
                    self.staging.outlier_quantile
                ),
            }
        );
        Ok(())
    }
}
