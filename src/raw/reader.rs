//! Raw partition reader: gunzip + per-line JSON parse.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use flate2::read::GzDecoder;
use snafu::prelude::*;
use tracing::warn;

use super::{PART_EXTENSION, PART_PREFIX, RawRecord};
use crate::error::{ListRootSnafu, RawStoreError, ReadPartSnafu};

/// Contents of one raw partition.
#[derive(Debug, Default)]
pub struct PartitionContents {
    pub records: Vec<RawRecord>,
    /// Part files read.
    pub files: usize,
    /// NDJSON lines skipped as unparsable.
    pub malformed_lines: usize,
}

/// Read every part file of one partition, in filename order.
///
/// Part files are concatenated; a line that fails to parse as a JSON object
/// is skipped with a warning, never a partition failure.
pub fn read_partition(partition_path: &Path) -> Result<PartitionContents, RawStoreError> {
    let mut part_paths = Vec::new();
    let entries =
        std::fs::read_dir(partition_path).context(ListRootSnafu { path: partition_path })?;
    for entry in entries {
        let entry = entry.context(ListRootSnafu { path: partition_path })?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(PART_PREFIX) && name.ends_with(PART_EXTENSION) {
            part_paths.push(entry.path());
        }
    }
    part_paths.sort();

    let mut contents = PartitionContents::default();
    for path in part_paths {
        read_part_file(&path, &mut contents)?;
        contents.files += 1;
    }
    Ok(contents)
}

fn read_part_file(path: &Path, contents: &mut PartitionContents) -> Result<(), RawStoreError> {
    let file = File::open(path).context(ReadPartSnafu { path })?;
    let reader = BufReader::new(GzDecoder::new(file));

    for line in reader.lines() {
        let line = line.context(ReadPartSnafu { path })?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<RawRecord>(&line) {
            Ok(record) => contents.records.push(record),
            Err(e) => {
                contents.malformed_lines += 1;
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Skipping malformed NDJSON line"
                );
            }
        }
    }
    Ok(())
}
