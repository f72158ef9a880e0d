//! Top-level pipeline runs: ingest (API to raw) and stage (raw to Parquet).

use std::time::Instant;

use chrono::{DateTime, Utc};
use snafu::prelude::*;
use tracing::{error, info};

use crate::config::Config;
use crate::error::{PartitionsFailedSnafu, PipelineError};
use crate::fetch::TripApi;
use crate::raw::index::{FsPartitionIndex, PartitionIndex};
use crate::raw::writer::{RawPartitionWriter, event_timestamp};
use crate::stage::stage_partition;
use crate::state::{IngestState, StateStore, truncate_to_second};

/// Summary of one ingest run.
#[derive(Debug, Clone)]
pub struct IngestReport {
    /// Start of the fetch window.
    pub start: DateTime<Utc>,
    /// Watermark persisted at the end of the run.
    pub watermark: Option<DateTime<Utc>>,
    pub pages: u64,
    pub rows: u64,
    /// Rows dropped for lacking a parsable event timestamp.
    pub rows_dropped: u64,
    pub elapsed_secs: f64,
}

/// Summary of one staging run.
#[derive(Debug, Clone, Default)]
pub struct StageReport {
    pub partitions_staged: usize,
    pub partitions_skipped: usize,
    pub partitions_failed: usize,
    pub rows_in: usize,
    pub rows_out: usize,
    pub duplicates_removed: usize,
    /// NDJSON lines skipped as unparsable across all staged partitions.
    pub malformed_lines: usize,
    pub elapsed_secs: f64,
}

/// Run one incremental ingest: page through the fetch window and append
/// every page to the raw store.
///
/// State is saved only after the window is fully drained, so a failed run
/// re-fetches from the previous watermark and deduplication downstream
/// absorbs the repeats. The watermark advances to the maximum event
/// timestamp observed and never regresses; a run that observes no rows
/// keeps the prior watermark (or, on a first run, records the computed
/// window start so later runs do not rescan the initial window).
pub async fn run_ingest(config: &Config) -> Result<IngestReport, PipelineError> {
    let started = Instant::now();
    let now = Utc::now();

    let store = StateStore::new(&config.storage.state_path);
    let state = store.load()?;
    let start = truncate_to_second(state.fetch_start(&config.ingest, now));
    info!(
        start = %start,
        watermark = ?state.last_watermark,
        "Starting ingest run"
    );

    let api = TripApi::from_config(&config.api)?;
    let mut writer = RawPartitionWriter::open(&config.storage.raw_root)?;

    let mut offset = 0u64;
    let mut pages = 0u64;
    let mut rows = 0u64;
    let mut rows_dropped = 0u64;
    let mut max_observed: Option<DateTime<Utc>> = None;

    loop {
        let page = api.fetch_page(start, offset).await?;
        if page.is_empty() {
            break;
        }

        let outcome = writer.write_page(&page)?;
        pages += 1;
        rows += page.len() as u64;
        rows_dropped += outcome.rows_dropped as u64;

        for record in &page {
            if let Some(ts) = event_timestamp(record) {
                max_observed = Some(max_observed.map_or(ts, |prev| prev.max(ts)));
            }
        }

        offset += api.page_limit();
    }

    let watermark = match max_observed {
        Some(ts) => {
            let candidate = truncate_to_second(ts);
            Some(state.last_watermark.map_or(candidate, |prev| prev.max(candidate)))
        }
        None => state.last_watermark.or(Some(start)),
    };

    store.save(&IngestState {
        last_watermark: watermark,
        last_run: Some(truncate_to_second(now)),
        rows_downloaded: rows,
    })?;

    let report = IngestReport {
        start,
        watermark,
        pages,
        rows,
        rows_dropped,
        elapsed_secs: started.elapsed().as_secs_f64(),
    };
    info!(
        pages = report.pages,
        rows = report.rows,
        rows_dropped = report.rows_dropped,
        watermark = ?report.watermark,
        elapsed_secs = format_args!("{:.1}", report.elapsed_secs),
        "Ingest run complete"
    );
    Ok(report)
}

/// Stage the trailing window of raw date partitions.
///
/// Partitions fail independently: a partition that cannot be staged is
/// logged and counted, and the remaining partitions still run. The overall
/// result is an error when any partition failed.
pub fn run_stage(config: &Config) -> Result<StageReport, PipelineError> {
    let started = Instant::now();

    let index = FsPartitionIndex::new(&config.storage.raw_root);
    let partitions = index.recent(config.staging.trailing_days)?;
    info!(
        partitions = partitions.len(),
        trailing_days = config.staging.trailing_days,
        "Starting staging run"
    );

    let total = partitions.len();
    let mut report = StageReport::default();

    for partition in &partitions {
        match stage_partition(
            partition,
            &config.storage.staging_root,
            config.staging.outlier_quantile,
        ) {
            Ok(Some(stats)) => {
                report.partitions_staged += 1;
                report.rows_in += stats.rows_in;
                report.rows_out += stats.rows_out;
                report.duplicates_removed += stats.duplicates_removed;
                report.malformed_lines += stats.malformed_lines;
            }
            Ok(None) => report.partitions_skipped += 1,
            Err(e) => {
                report.partitions_failed += 1;
                error!(
                    partition = %partition.date,
                    error = %e,
                    "Failed to stage partition"
                );
            }
        }
    }

    report.elapsed_secs = started.elapsed().as_secs_f64();
    info!(
        partitions_staged = report.partitions_staged,
        partitions_skipped = report.partitions_skipped,
        partitions_failed = report.partitions_failed,
        rows_in = report.rows_in,
        rows_out = report.rows_out,
        duplicates_removed = report.duplicates_removed,
        malformed_lines = report.malformed_lines,
        elapsed_secs = format_args!("{:.1}", report.elapsed_secs),
        "Staging run complete"
    );

    ensure!(
        report.partitions_failed == 0,
        PartitionsFailedSnafu {
            failed: report.partitions_failed,
            total,
        }
    );
    Ok(report)
}
