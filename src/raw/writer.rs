//! Raw partition writer: append-only gzip NDJSON part files.
//!
//! Each fetched page is grouped by event date and appended to the matching
//! `dt=` partition as a brand-new part file; existing files are never
//! rewritten. Part files are written fully to a temp name and renamed into
//! place, so a partition only ever contains complete files.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use chrono::NaiveDate;
use flate2::Compression;
use flate2::write::GzEncoder;
use snafu::prelude::*;
use tracing::{debug, warn};

use super::{EVENT_TIMESTAMP_FIELD, PART_EXTENSION, PART_PREFIX, PARTITION_PREFIX, RawRecord};
use crate::error::{CreatePartitionDirSnafu, ListRootSnafu, RawStoreError, WritePartSnafu};
use crate::stage::normalize::{FieldValue, coerce_timestamp};

/// Event date of a raw record, if its timestamp is present and parsable.
pub fn event_date(record: &RawRecord) -> Option<NaiveDate> {
    event_timestamp(record).map(|ts| ts.date_naive())
}

/// Event timestamp of a raw record.
pub fn event_timestamp(record: &RawRecord) -> Option<chrono::DateTime<chrono::Utc>> {
    let value = record.get(EVENT_TIMESTAMP_FIELD)?;
    coerce_timestamp(&FieldValue::from_json(value))
}

/// Outcome of writing one page into the raw store.
#[derive(Debug, Clone, Copy, Default)]
pub struct PageWriteOutcome {
    /// Rows persisted across all partitions.
    pub rows_written: usize,
    /// Rows dropped for lacking a parsable event timestamp.
    pub rows_dropped: usize,
    /// Part files created.
    pub files_written: usize,
}

/// Appends pages of raw records to date partitions under one root.
///
/// The part-file sequence number is seeded by scanning existing part files
/// across all partitions (max existing index + 1) and increments per file
/// written, so resumed or concurrent runs never overwrite prior output.
pub struct RawPartitionWriter {
    root: PathBuf,
    next_part: u32,
}

impl RawPartitionWriter {
    /// Open the raw store root, creating it if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, RawStoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root).context(CreatePartitionDirSnafu { path: &root })?;
        let next_part = next_part_index(&root)?;
        Ok(Self { root, next_part })
    }

    /// Write one page, grouped by event date, one new part file per group.
    pub fn write_page(&mut self, records: &[RawRecord]) -> Result<PageWriteOutcome, RawStoreError> {
        let mut grouped: BTreeMap<NaiveDate, Vec<&RawRecord>> = BTreeMap::new();
        let mut outcome = PageWriteOutcome::default();

        for record in records {
            match event_date(record) {
                Some(date) => grouped.entry(date).or_default().push(record),
                None => {
                    outcome.rows_dropped += 1;
                    warn!("Dropping record without parsable {EVENT_TIMESTAMP_FIELD}");
                }
            }
        }

        for (date, rows) in grouped {
            let dir = self.root.join(format!("{PARTITION_PREFIX}{date}"));
            std::fs::create_dir_all(&dir).context(CreatePartitionDirSnafu { path: &dir })?;

            let filename = format!("{PART_PREFIX}{:05}{PART_EXTENSION}", self.next_part);
            let target = dir.join(&filename);
            let tmp = dir.join(format!(".{filename}.tmp"));

            write_part_file(&tmp, &rows)?;
            std::fs::rename(&tmp, &target).context(WritePartSnafu { path: &target })?;

            debug!(
                partition = %date,
                file = %filename,
                rows = rows.len(),
                "Wrote raw part file"
            );
            self.next_part += 1;
            outcome.rows_written += rows.len();
            outcome.files_written += 1;
        }

        Ok(outcome)
    }
}

fn write_part_file(path: &PathBuf, rows: &[&RawRecord]) -> Result<(), RawStoreError> {
    let file = File::create(path).context(WritePartSnafu { path })?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());

    for row in rows {
        let line = serde_json::to_string(row).expect("raw record round-trips to JSON");
        encoder.write_all(line.as_bytes()).context(WritePartSnafu { path })?;
        encoder.write_all(b"\n").context(WritePartSnafu { path })?;
    }

    encoder
        .finish()
        .context(WritePartSnafu { path })?
        .flush()
        .context(WritePartSnafu { path })?;
    Ok(())
}

/// Highest existing part index across all partitions, plus one.
fn next_part_index(root: &PathBuf) -> Result<u32, RawStoreError> {
    let mut highest = 0;

    let entries = std::fs::read_dir(root).context(ListRootSnafu { path: root })?;
    for entry in entries {
        let entry = entry.context(ListRootSnafu { path: root })?;
        let path = entry.path();
        if !path.is_dir()
            || !entry
                .file_name()
                .to_string_lossy()
                .starts_with(PARTITION_PREFIX)
        {
            continue;
        }

        let parts = std::fs::read_dir(&path).context(ListRootSnafu { path: &path })?;
        for part in parts {
            let part = part.context(ListRootSnafu { path: &path })?;
            let name = part.file_name().to_string_lossy().into_owned();
            if let Some(index) = parse_part_index(&name) {
                highest = highest.max(index);
            }
        }
    }

    Ok(highest + 1)
}

/// Parse the sequence number out of `part-NNNNN.jsonl.gz`.
fn parse_part_index(filename: &str) -> Option<u32> {
    let stem = filename.strip_prefix(PART_PREFIX)?.strip_suffix(PART_EXTENSION)?;
    stem.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn record(ts: &str, id: &str) -> RawRecord {
        match json!({"trip_start_timestamp": ts, "trip_id": id}) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn part_files(dir: &std::path::Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_groups_by_event_date() {
        let dir = TempDir::new().unwrap();
        let mut writer = RawPartitionWriter::open(dir.path()).unwrap();

        let outcome = writer
            .write_page(&[
                record("2024-01-01T08:00:00", "a"),
                record("2024-01-02T09:00:00", "b"),
                record("2024-01-01T10:00:00", "c"),
            ])
            .unwrap();

        assert_eq!(outcome.rows_written, 3);
        assert_eq!(outcome.files_written, 2);
        assert_eq!(
            part_files(&dir.path().join("dt=2024-01-01")),
            vec!["part-00001.jsonl.gz"]
        );
        assert_eq!(
            part_files(&dir.path().join("dt=2024-01-02")),
            vec!["part-00002.jsonl.gz"]
        );
    }

    #[test]
    fn test_sequence_resumes_past_existing_parts() {
        let dir = TempDir::new().unwrap();

        {
            let mut writer = RawPartitionWriter::open(dir.path()).unwrap();
            writer
                .write_page(&[record("2024-01-01T08:00:00", "a")])
                .unwrap();
        }

        // A new run must not reuse or overwrite index 1
        let mut writer = RawPartitionWriter::open(dir.path()).unwrap();
        writer
            .write_page(&[record("2024-01-01T09:00:00", "b")])
            .unwrap();

        assert_eq!(
            part_files(&dir.path().join("dt=2024-01-01")),
            vec!["part-00001.jsonl.gz", "part-00002.jsonl.gz"]
        );
    }

    #[test]
    fn test_drops_records_without_timestamp() {
        let dir = TempDir::new().unwrap();
        let mut writer = RawPartitionWriter::open(dir.path()).unwrap();

        let mut no_ts = RawRecord::new();
        no_ts.insert("trip_id".to_string(), json!("x"));
        let mut bad_ts = RawRecord::new();
        bad_ts.insert("trip_start_timestamp".to_string(), json!("not a date"));

        let outcome = writer
            .write_page(&[no_ts, bad_ts, record("2024-01-01T08:00:00", "ok")])
            .unwrap();

        assert_eq!(outcome.rows_written, 1);
        assert_eq!(outcome.rows_dropped, 2);
    }

    #[test]
    fn test_empty_page_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let mut writer = RawPartitionWriter::open(dir.path()).unwrap();
        let outcome = writer.write_page(&[]).unwrap();
        assert_eq!(outcome.files_written, 0);
        assert_eq!(part_files(dir.path()).len(), 0);
    }

    #[test]
    fn test_parse_part_index() {
        assert_eq!(parse_part_index("part-00042.jsonl.gz"), Some(42));
        assert_eq!(parse_part_index("part-1.jsonl.gz"), Some(1));
        assert_eq!(parse_part_index(".part-00001.jsonl.gz.tmp"), None);
        assert_eq!(parse_part_index("trips.parquet"), None);
    }

    #[test]
    fn test_no_tmp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let mut writer = RawPartitionWriter::open(dir.path()).unwrap();
        writer
            .write_page(&[record("2024-01-01T08:00:00", "a")])
            .unwrap();

        let names = part_files(&dir.path().join("dt=2024-01-01"));
        assert!(names.iter().all(|n| !n.ends_with(".tmp")));
    }
}
