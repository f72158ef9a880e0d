//! Atomic staged-partition writer.
//!
//! Serializes a partition's staged records to a single Parquet file with a
//! deterministic schema and publishes it by atomic rename: readers see the
//! previous version or the new one, never a partial file. Identical input
//! produces byte-identical output, so restaging is idempotent.

use std::collections::BTreeSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{
    ArrayRef, BooleanArray, Date32Array, Float64Array, Int32Array, RecordBatch, StringArray,
    TimestampMicrosecondArray,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use chrono::NaiveDate;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use snafu::prelude::*;
use tracing::debug;

use super::StagedRecord;
use super::normalize::FieldValue;
use crate::error::{BatchBuildSnafu, CreateStagingDirSnafu, ParquetWriteSnafu, PublishSnafu, StageError};
use crate::raw::PARTITION_PREFIX;

/// Filename of the staged file within its partition directory.
pub const STAGED_FILENAME: &str = "trips.parquet";

/// Typed head columns, in fixed schema order. Remaining upstream columns
/// follow as nullable strings sorted by name.
const HEAD_COLUMNS: [&str; 14] = [
    "business_key",
    "trip_start_timestamp",
    "trip_end_timestamp",
    "trip_miles",
    "fare",
    "tips",
    "trip_seconds",
    "trip_date",
    "trip_hour",
    "weekday",
    "is_weekend",
    "outlier_trip_miles",
    "outlier_fare",
    "outlier_trip_seconds",
];

const UNIX_EPOCH_DATE: NaiveDate = match NaiveDate::from_ymd_opt(1970, 1, 1) {
    Some(date) => date,
    None => unreachable!(),
};

/// Render a passthrough value as its string cell.
fn render_text(value: &FieldValue) -> Option<String> {
    match value {
        FieldValue::Null => None,
        FieldValue::Text(s) => Some(s.clone()),
        FieldValue::Int(i) => Some(i.to_string()),
        FieldValue::Float(f) => {
            if f.is_nan() {
                None
            } else {
                Some(f.to_string())
            }
        }
        FieldValue::Bool(b) => Some(b.to_string()),
        FieldValue::Timestamp(ts) => Some(ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
    }
}

/// Extra (non-head) column names across all records, sorted for a
/// deterministic schema.
fn extra_columns(records: &[StagedRecord]) -> Vec<String> {
    let head: BTreeSet<&str> = HEAD_COLUMNS.into_iter().collect();
    let mut names = BTreeSet::new();
    for staged in records {
        for name in staged.record.field_names() {
            if !head.contains(name) {
                names.insert(name.to_string());
            }
        }
    }
    names.into_iter().collect()
}

/// Build the staged record batch.
pub fn build_batch(records: &[StagedRecord]) -> Result<RecordBatch, StageError> {
    let timestamp_type = DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into()));
    let extras = extra_columns(records);

    let mut fields = vec![
        Field::new("business_key", DataType::Utf8, false),
        Field::new("trip_start_timestamp", timestamp_type.clone(), true),
        Field::new("trip_end_timestamp", timestamp_type, true),
        Field::new("trip_miles", DataType::Float64, true),
        Field::new("fare", DataType::Float64, true),
        Field::new("tips", DataType::Float64, true),
        Field::new("trip_seconds", DataType::Float64, true),
        Field::new("trip_date", DataType::Date32, true),
        Field::new("trip_hour", DataType::Int32, true),
        Field::new("weekday", DataType::Int32, true),
        Field::new("is_weekend", DataType::Boolean, true),
        Field::new("outlier_trip_miles", DataType::Boolean, false),
        Field::new("outlier_fare", DataType::Boolean, false),
        Field::new("outlier_trip_seconds", DataType::Boolean, false),
    ];
    for name in &extras {
        fields.push(Field::new(name, DataType::Utf8, true));
    }
    let schema = Arc::new(Schema::new(fields));

    let timestamp_column = |name: &str| -> ArrayRef {
        let values: Vec<Option<i64>> = records
            .iter()
            .map(|s| s.record.timestamp(name).map(|ts| ts.timestamp_micros()))
            .collect();
        Arc::new(TimestampMicrosecondArray::from(values).with_timezone("UTC"))
    };
    let float_column = |name: &str| -> ArrayRef {
        let values: Vec<Option<f64>> = records.iter().map(|s| s.record.float(name)).collect();
        Arc::new(Float64Array::from(values))
    };

    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(
            records.iter().map(|s| s.business_key.clone()).collect::<Vec<_>>(),
        )),
        timestamp_column("trip_start_timestamp"),
        timestamp_column("trip_end_timestamp"),
        float_column("trip_miles"),
        float_column("fare"),
        float_column("tips"),
        float_column("trip_seconds"),
        Arc::new(Date32Array::from(
            records
                .iter()
                .map(|s| {
                    s.calendar
                        .trip_date
                        .map(|d| (d - UNIX_EPOCH_DATE).num_days() as i32)
                })
                .collect::<Vec<_>>(),
        )),
        Arc::new(Int32Array::from(
            records.iter().map(|s| s.calendar.trip_hour).collect::<Vec<_>>(),
        )),
        Arc::new(Int32Array::from(
            records.iter().map(|s| s.calendar.weekday).collect::<Vec<_>>(),
        )),
        Arc::new(BooleanArray::from(
            records
                .iter()
                .map(|s| s.calendar.weekday.map(|_| s.calendar.is_weekend))
                .collect::<Vec<Option<bool>>>(),
        )),
        Arc::new(BooleanArray::from(
            records.iter().map(|s| s.outliers.trip_miles).collect::<Vec<_>>(),
        )),
        Arc::new(BooleanArray::from(
            records.iter().map(|s| s.outliers.fare).collect::<Vec<_>>(),
        )),
        Arc::new(BooleanArray::from(
            records.iter().map(|s| s.outliers.trip_seconds).collect::<Vec<_>>(),
        )),
    ];

    for name in &extras {
        let values: Vec<Option<String>> = records
            .iter()
            .map(|s| s.record.get(name).and_then(render_text))
            .collect();
        columns.push(Arc::new(StringArray::from(values)));
    }

    RecordBatch::try_new(schema, columns).context(BatchBuildSnafu)
}

/// Write the staged partition and publish it atomically.
///
/// Returns the path of the published file.
pub fn write_partition(
    records: &[StagedRecord],
    staging_root: &Path,
    date: NaiveDate,
) -> Result<PathBuf, StageError> {
    let batch = build_batch(records)?;

    let dir = staging_root.join(format!("{PARTITION_PREFIX}{date}"));
    std::fs::create_dir_all(&dir).context(CreateStagingDirSnafu { path: &dir })?;

    let target = dir.join(STAGED_FILENAME);
    let tmp = dir.join(format!(".{STAGED_FILENAME}.{}.tmp", std::process::id()));

    let file = File::create(&tmp).context(PublishSnafu { path: &tmp })?;
    let properties = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer =
        ArrowWriter::try_new(file, batch.schema(), Some(properties)).context(ParquetWriteSnafu)?;
    writer.write(&batch).context(ParquetWriteSnafu)?;
    writer.close().context(ParquetWriteSnafu)?;

    std::fs::rename(&tmp, &target).context(PublishSnafu { path: &target })?;

    debug!(
        partition = %date,
        rows = records.len(),
        path = %target.display(),
        "Published staged partition"
    );
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Array;

    use crate::stage::derive::{CalendarFields, OutlierFlags, calendar_fields};
    use crate::stage::normalize::NormalizedRecord;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn staged(key: &str, company: Option<&str>) -> StagedRecord {
        let mut record = NormalizedRecord::default();
        record.insert(
            "trip_start_timestamp",
            FieldValue::Timestamp(Utc.with_ymd_and_hms(2024, 1, 15, 8, 0, 0).unwrap()),
        );
        record.insert("fare", FieldValue::Float(12.5));
        if let Some(c) = company {
            record.insert("company", FieldValue::Text(c.to_string()));
        }
        let calendar = calendar_fields(&record);
        StagedRecord {
            business_key: key.to_string(),
            record,
            calendar,
            outliers: OutlierFlags::default(),
        }
    }

    #[test]
    fn test_batch_schema_head_then_sorted_extras() {
        let records = vec![staged("k1", Some("Flash Cab")), staged("k2", None)];
        let batch = build_batch(&records).unwrap();

        let schema = batch.schema();
        let names: Vec<&str> = schema
            .fields()
            .iter()
            .map(|f| f.name().as_str())
            .collect();
        assert_eq!(&names[..14], &HEAD_COLUMNS);
        assert_eq!(&names[14..], &["company"]);
        assert_eq!(batch.num_rows(), 2);
    }

    #[test]
    fn test_batch_nullability() {
        let records = vec![staged("k1", Some("Flash Cab")), staged("k2", None)];
        let batch = build_batch(&records).unwrap();

        let company = batch.column(14);
        assert!(!company.is_null(0));
        assert!(company.is_null(1));
    }

    #[test]
    fn test_empty_records_produce_empty_batch() {
        let batch = build_batch(&[]).unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.num_columns(), 14);
    }

    #[test]
    fn test_write_partition_publishes_atomically() {
        let dir = TempDir::new().unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();

        let path = write_partition(&[staged("k1", None)], dir.path(), date).unwrap();
        assert_eq!(path, dir.path().join("dt=2024-01-15").join("trips.parquet"));
        assert!(path.exists());

        // No temp files left around
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_rewrite_is_byte_identical() {
        let dir = TempDir::new().unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let records = vec![staged("k1", Some("Flash Cab")), staged("k2", None)];

        let path = write_partition(&records, dir.path(), date).unwrap();
        let first = std::fs::read(&path).unwrap();

        let path = write_partition(&records, dir.path(), date).unwrap();
        let second = std::fs::read(&path).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_null_calendar_fields() {
        let mut record = NormalizedRecord::default();
        record.insert("fare", FieldValue::Float(1.0));
        let records = vec![StagedRecord {
            business_key: "k".to_string(),
            record,
            calendar: CalendarFields::default(),
            outliers: OutlierFlags::default(),
        }];

        let batch = build_batch(&records).unwrap();
        // trip_date, trip_hour, weekday, is_weekend are all null
        assert!(batch.column(7).is_null(0));
        assert!(batch.column(8).is_null(0));
        assert!(batch.column(9).is_null(0));
        assert!(batch.column(10).is_null(0));
    }
}
