//! Raw date-partitioned store: immutable gzip NDJSON part files.

pub mod index;
pub mod reader;
pub mod writer;

pub use index::{FsPartitionIndex, PartitionIndex, RawPartition};
pub use reader::read_partition;
pub use writer::RawPartitionWriter;

/// An upstream event as fetched: a loosely-typed field map.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

/// Field that assigns a record to a date partition and drives the watermark.
pub const EVENT_TIMESTAMP_FIELD: &str = "trip_start_timestamp";

/// Directory name prefix for date partitions (`dt=YYYY-MM-DD`).
pub const PARTITION_PREFIX: &str = "dt=";

/// Filename prefix of raw part files.
pub const PART_PREFIX: &str = "part-";

/// File extension of raw part files.
pub const PART_EXTENSION: &str = ".jsonl.gz";
