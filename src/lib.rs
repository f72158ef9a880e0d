//! Incremental trip ingest and staging pipeline.
//!
//! Two passes over a public paginated dataset API:
//!
//! - **Ingest** pulls new rows since the persisted watermark (with a
//!   re-fetch overlap) and appends them as immutable gzip NDJSON part files
//!   under `dt=YYYY-MM-DD` raw partitions.
//! - **Stage** rebuilds the trailing window of raw partitions into typed,
//!   deduplicated Parquet files, one atomically-replaced `trips.parquet`
//!   per partition.
//!
//! Re-running either pass is safe: ingest only appends and re-fetched rows
//! are absorbed by content-hash deduplication during staging.

pub mod config;
pub mod error;
pub mod fetch;
pub mod pipeline;
pub mod raw;
pub mod stage;
pub mod state;
pub mod tracing;

pub use config::Config;
pub use error::PipelineError;
pub use pipeline::{IngestReport, StageReport, run_ingest, run_stage};
