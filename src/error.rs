//! Error types for the hailstorm pipeline.

use std::path::PathBuf;

use snafu::prelude::*;

/// Errors that can occur while loading configuration.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Failed to read the config file.
    #[snafu(display("Failed to read config file {}: {source}", path.display()))]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to parse the config file as YAML.
    #[snafu(display("Failed to parse config file {}: {source}", path.display()))]
    YamlParse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    /// A config value is out of range.
    #[snafu(display("Invalid config value for {field}: {message}"))]
    InvalidValue { field: &'static str, message: String },
}

/// Errors that can occur while persisting ingest state.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StateError {
    /// Failed to read the state file.
    #[snafu(display("Failed to read state file {}: {source}", path.display()))]
    ReadState {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to create the state directory.
    #[snafu(display("Failed to create state directory {}: {source}", path.display()))]
    CreateStateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to write the state file.
    #[snafu(display("Failed to write state file {}: {source}", path.display()))]
    WriteState {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Errors that can occur while fetching pages from the upstream API.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum FetchError {
    /// Failed to build the HTTP client.
    #[snafu(display("Failed to build HTTP client: {source}"))]
    ClientBuild { source: reqwest::Error },

    /// Transport-level failure (connect, timeout, body read).
    #[snafu(display("Transport error: {source}"))]
    Transport { source: reqwest::Error },

    /// Upstream returned a retryable status (429 or 5xx).
    #[snafu(display("Retryable upstream status: {status}"))]
    RetryableStatus { status: reqwest::StatusCode },

    /// Upstream returned a non-retryable error status.
    #[snafu(display("Fatal upstream status: {status}"))]
    FatalStatus { status: reqwest::StatusCode },

    /// Response body was not a JSON array of records.
    #[snafu(display("Unexpected API payload shape (expected a JSON array)"))]
    UnexpectedPayload,

    /// Retry attempts exhausted.
    #[snafu(display("Retry attempts exhausted after {attempts} tries: {message}"))]
    AttemptsExhausted { attempts: u32, message: String },
}

impl FetchError {
    /// Whether this failure is worth another attempt.
    ///
    /// Retryable: rate limiting (429), server errors (5xx), and transport
    /// failures. Everything else aborts immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Transport { .. } | FetchError::RetryableStatus { .. }
        )
    }
}

/// Errors that can occur in the raw partition store.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RawStoreError {
    /// Failed to list the raw root directory.
    #[snafu(display("Failed to list raw root {}: {source}", path.display()))]
    ListRoot {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to create a partition directory.
    #[snafu(display("Failed to create partition directory {}: {source}", path.display()))]
    CreatePartitionDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to write a part file.
    #[snafu(display("Failed to write part file {}: {source}", path.display()))]
    WritePart {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to read a part file.
    #[snafu(display("Failed to read part file {}: {source}", path.display()))]
    ReadPart {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Errors that can occur while staging a partition.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StageError {
    /// Failed to read raw input for the partition.
    #[snafu(display("Failed to read raw partition: {source}"))]
    ReadRaw { source: RawStoreError },

    /// Failed to build the Arrow record batch.
    #[snafu(display("Failed to build staged record batch: {source}"))]
    BatchBuild { source: arrow::error::ArrowError },

    /// Failed to write the staged Parquet file.
    #[snafu(display("Failed to write staged Parquet: {source}"))]
    ParquetWrite {
        source: parquet::errors::ParquetError,
    },

    /// Failed to create the staging directory.
    #[snafu(display("Failed to create staging directory {}: {source}", path.display()))]
    CreateStagingDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to publish the staged file into place.
    #[snafu(display("Failed to publish staged file {}: {source}", path.display()))]
    Publish {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Top-level pipeline errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Configuration error.
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    /// State store error.
    #[snafu(display("State error: {source}"))]
    State { source: StateError },

    /// Fetch error.
    #[snafu(display("Fetch error: {source}"))]
    Fetch { source: FetchError },

    /// Raw store error.
    #[snafu(display("Raw store error: {source}"))]
    RawStore { source: RawStoreError },

    /// Staging error.
    #[snafu(display("Staging error: {source}"))]
    Stage { source: StageError },

    /// One or more partitions failed to stage.
    #[snafu(display("{failed} of {total} partitions failed to stage"))]
    PartitionsFailed { failed: usize, total: usize },
}

impl From<ConfigError> for PipelineError {
    fn from(source: ConfigError) -> Self {
        PipelineError::Config { source }
    }
}

impl From<StateError> for PipelineError {
    fn from(source: StateError) -> Self {
        PipelineError::State { source }
    }
}

impl From<FetchError> for PipelineError {
    fn from(source: FetchError) -> Self {
        PipelineError::Fetch { source }
    }
}

impl From<RawStoreError> for PipelineError {
    fn from(source: RawStoreError) -> Self {
        PipelineError::RawStore { source }
    }
}

impl From<StageError> for PipelineError {
    fn from(source: StageError) -> Self {
        PipelineError::Stage { source }
    }
}
