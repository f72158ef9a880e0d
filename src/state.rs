//! Persisted ingest state: the single external cursor of fetch progress.
//!
//! State is read once at the start of an ingest run and rewritten atomically
//! at the end; a killed run leaves it untouched. A missing file yields
//! defaults, missing keys are backfilled by serde defaults, and an
//! unparsable file falls back to defaults with a warning rather than
//! aborting (a reset only widens the fetch window; deduplication absorbs
//! the re-fetched rows downstream).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use tracing::{debug, warn};

use crate::config::IngestConfig;
use crate::error::{CreateStateDirSnafu, ReadStateSnafu, StateError, WriteStateSnafu};

/// Durable cursor of ingestion progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestState {
    /// Latest event timestamp confirmed ingested (UTC, second precision).
    pub last_watermark: Option<DateTime<Utc>>,
    /// Wall-clock time of the last successful run.
    pub last_run: Option<DateTime<Utc>>,
    /// Rows downloaded by the last successful run.
    pub rows_downloaded: u64,
}

impl IngestState {
    /// Compute the fetch window start for the next run.
    ///
    /// Subtracts the overlap lookback from the watermark so rows that
    /// appeared upstream after the watermark was recorded are re-requested;
    /// first runs fall back to a wider default window.
    pub fn fetch_start(&self, ingest: &IngestConfig, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.last_watermark {
            Some(watermark) => watermark - Duration::hours(ingest.lookback_hours),
            None => now - Duration::days(ingest.first_run_lookback_days),
        }
    }
}

/// Truncate a timestamp to whole seconds.
pub fn truncate_to_second(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_nanosecond(0).unwrap_or(ts)
}

/// Loads and saves [`IngestState`] with atomic overwrite semantics.
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted state.
    ///
    /// Missing file or unparsable contents yield the default state.
    pub fn load(&self) -> Result<IngestState, StateError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No state file, starting fresh");
                return Ok(IngestState::default());
            }
            Err(source) => return Err(source).context(ReadStateSnafu { path: &self.path }),
        };

        match serde_json::from_str::<IngestState>(&contents) {
            Ok(state) => Ok(state),
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to parse state file, falling back to defaults"
                );
                Ok(IngestState::default())
            }
        }
    }

    /// Save the state atomically (temp file + rename).
    pub fn save(&self, state: &IngestState) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).context(CreateStateDirSnafu { path: parent })?;
        }

        let json =
            serde_json::to_string_pretty(state).expect("ingest state should always serialize");

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).context(WriteStateSnafu { path: &tmp })?;
        std::fs::rename(&tmp, &self.path).context(WriteStateSnafu { path: &self.path })?;

        debug!(
            path = %self.path.display(),
            watermark = ?state.last_watermark,
            "Saved ingest state"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_load_missing_file_defaults() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));

        let state = store.load().unwrap();
        assert_eq!(state, IngestState::default());
        assert!(state.last_watermark.is_none());
        assert_eq!(state.rows_downloaded, 0);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("nested/state.json"));

        let state = IngestState {
            last_watermark: Some(utc(2024, 1, 15, 12, 30, 0)),
            last_run: Some(utc(2024, 1, 15, 13, 0, 0)),
            rows_downloaded: 42,
        };
        store.save(&state).unwrap();

        let restored = store.load().unwrap();
        assert_eq!(restored, state);
    }

    #[test]
    fn test_watermark_serialized_with_z_suffix() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let store = StateStore::new(&path);

        let state = IngestState {
            last_watermark: Some(utc(2024, 1, 15, 12, 30, 0)),
            last_run: None,
            rows_downloaded: 0,
        };
        store.save(&state).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("2024-01-15T12:30:00Z"), "got: {raw}");
    }

    #[test]
    fn test_missing_keys_backfilled() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, r#"{"last_watermark": "2024-01-15T12:30:00Z"}"#).unwrap();

        let state = StateStore::new(&path).load().unwrap();
        assert_eq!(state.last_watermark, Some(utc(2024, 1, 15, 12, 30, 0)));
        assert!(state.last_run.is_none());
        assert_eq!(state.rows_downloaded, 0);
    }

    #[test]
    fn test_corrupt_state_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json at all").unwrap();

        let state = StateStore::new(&path).load().unwrap();
        assert_eq!(state, IngestState::default());
    }

    #[test]
    fn test_fetch_start_with_watermark_applies_lookback() {
        let ingest = IngestConfig::default();
        let state = IngestState {
            last_watermark: Some(utc(2024, 1, 15, 12, 0, 0)),
            last_run: None,
            rows_downloaded: 0,
        };
        let start = state.fetch_start(&ingest, utc(2024, 2, 1, 0, 0, 0));
        assert_eq!(start, utc(2024, 1, 15, 6, 0, 0));
    }

    #[test]
    fn test_fetch_start_first_run_uses_default_window() {
        let ingest = IngestConfig::default();
        let state = IngestState::default();
        let now = utc(2024, 3, 1, 0, 0, 0);
        let start = state.fetch_start(&ingest, now);
        assert_eq!(start, utc(2024, 1, 1, 0, 0, 0));
    }

    #[test]
    fn test_truncate_to_second() {
        let ts = utc(2024, 1, 1, 0, 0, 5) + Duration::milliseconds(123);
        assert_eq!(truncate_to_second(ts), utc(2024, 1, 1, 0, 0, 5));
    }
}
