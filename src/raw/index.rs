//! Raw partition discovery.
//!
//! The staging pass selects partitions through the [`PartitionIndex`] trait
//! rather than globbing the filesystem directly, so the selection logic can
//! be exercised against an in-memory index in tests.

use std::path::PathBuf;

use chrono::NaiveDate;
use snafu::prelude::*;

use super::PARTITION_PREFIX;
use crate::error::{ListRootSnafu, RawStoreError};

/// One raw date partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPartition {
    pub date: NaiveDate,
    pub path: PathBuf,
}

/// Listing interface over available raw date partitions.
pub trait PartitionIndex {
    /// All available partitions, in no particular order.
    fn list(&self) -> Result<Vec<RawPartition>, RawStoreError>;

    /// The most recent `days` partitions, sorted ascending by date.
    ///
    /// Staging is a sliding-window operation: anything older than the
    /// trailing window is reprocessed only on explicit operator request.
    fn recent(&self, days: usize) -> Result<Vec<RawPartition>, RawStoreError> {
        let mut partitions = self.list()?;
        partitions.sort_by_key(|p| p.date);
        if partitions.len() > days {
            partitions.drain(..partitions.len() - days);
        }
        Ok(partitions)
    }
}

/// Filesystem-backed index scanning `dt=YYYY-MM-DD` directories.
pub struct FsPartitionIndex {
    root: PathBuf,
}

impl FsPartitionIndex {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl PartitionIndex for FsPartitionIndex {
    fn list(&self) -> Result<Vec<RawPartition>, RawStoreError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut partitions = Vec::new();
        let entries = std::fs::read_dir(&self.root).context(ListRootSnafu { path: &self.root })?;
        for entry in entries {
            let entry = entry.context(ListRootSnafu { path: &self.root })?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(date_text) = name.strip_prefix(PARTITION_PREFIX) else {
                continue;
            };
            // Entries that do not parse as dates are not partitions
            let Ok(date) = NaiveDate::parse_from_str(date_text, "%Y-%m-%d") else {
                continue;
            };
            partitions.push(RawPartition { date, path });
        }

        Ok(partitions)
    }
}
