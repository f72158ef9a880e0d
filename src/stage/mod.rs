//! Staging: raw date partitions in, deduplicated typed Parquet out.
//!
//! Each partition is staged independently and completely from its raw part
//! files. Restaging a partition overwrites its previous output, so the pass
//! is idempotent and safe to rerun after raw files accumulate.

pub mod business_key;
pub mod dedupe;
pub mod derive;
pub mod normalize;
pub mod writer;

use std::path::Path;

use snafu::prelude::*;
use tracing::info;

use crate::error::{ReadRawSnafu, StageError};
use crate::raw::index::RawPartition;
use crate::raw::reader::read_partition;

use business_key::derive_key;
use dedupe::dedupe_by_key;
use derive::{CalendarFields, OutlierFlags, calendar_fields, compute_outlier_flags};
use normalize::{NormalizedRecord, normalize_record};

/// One record ready for the staged file.
#[derive(Debug, Clone)]
pub struct StagedRecord {
    pub business_key: String,
    pub record: NormalizedRecord,
    pub calendar: CalendarFields,
    pub outliers: OutlierFlags,
}

/// Per-partition staging counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct PartitionStats {
    /// Raw part files read.
    pub files: usize,
    /// Rows read from raw, before deduplication.
    pub rows_in: usize,
    /// Rows written to the staged file.
    pub rows_out: usize,
    pub duplicates_removed: usize,
    /// NDJSON lines skipped as unparsable while reading raw.
    pub malformed_lines: usize,
}

/// Stage one raw partition end to end.
///
/// Returns `None` when the partition holds no part files, in which case no
/// staged file is written or replaced. An empty record set from real part
/// files still publishes, keeping the staged output in step with raw.
pub fn stage_partition(
    partition: &RawPartition,
    staging_root: &Path,
    outlier_quantile: f64,
) -> Result<Option<PartitionStats>, StageError> {
    let contents = read_partition(&partition.path).context(ReadRawSnafu)?;
    if contents.files == 0 {
        info!(partition = %partition.date, "No raw part files, skipping");
        return Ok(None);
    }

    let rows_in = contents.records.len();
    let keyed: Vec<(String, NormalizedRecord)> = contents
        .records
        .iter()
        .map(|raw| {
            let record = normalize_record(raw);
            (derive_key(&record), record)
        })
        .collect();

    let (deduped, dedupe_stats) = dedupe_by_key(keyed);
    let (keys, records): (Vec<String>, Vec<NormalizedRecord>) = deduped.into_iter().unzip();

    let flags = compute_outlier_flags(&records, outlier_quantile);
    let staged: Vec<StagedRecord> = keys
        .into_iter()
        .zip(records)
        .zip(flags)
        .map(|((business_key, record), outliers)| {
            let calendar = calendar_fields(&record);
            StagedRecord {
                business_key,
                record,
                calendar,
                outliers,
            }
        })
        .collect();

    writer::write_partition(&staged, staging_root, partition.date)?;

    let stats = PartitionStats {
        files: contents.files,
        rows_in,
        rows_out: staged.len(),
        duplicates_removed: dedupe_stats.duplicates_removed,
        malformed_lines: contents.malformed_lines,
    };
    info!(
        partition = %partition.date,
        files = stats.files,
        rows_in = stats.rows_in,
        rows_out = stats.rows_out,
        duplicates_removed = stats.duplicates_removed,
        malformed_lines = stats.malformed_lines,
        "Staged partition"
    );
    Ok(Some(stats))
}
