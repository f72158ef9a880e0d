//! Derived calendar fields and per-partition outlier flags.

use chrono::{Datelike, NaiveDate, Timelike};

use super::normalize::NormalizedRecord;

/// Metrics checked for outliers.
pub const OUTLIER_METRICS: [&str; 3] = ["trip_miles", "fare", "trip_seconds"];

/// Calendar fields derived from the event start timestamp.
///
/// All null (and `is_weekend` false) when the start timestamp is missing or
/// failed coercion.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CalendarFields {
    pub trip_date: Option<NaiveDate>,
    /// Hour of day, 0-23.
    pub trip_hour: Option<i32>,
    /// Day of week, Monday = 0 through Sunday = 6.
    pub weekday: Option<i32>,
    pub is_weekend: bool,
}

pub fn calendar_fields(record: &NormalizedRecord) -> CalendarFields {
    match record.timestamp("trip_start_timestamp") {
        Some(ts) => {
            let weekday = ts.weekday().num_days_from_monday() as i32;
            CalendarFields {
                trip_date: Some(ts.date_naive()),
                trip_hour: Some(ts.hour() as i32),
                weekday: Some(weekday),
                is_weekend: weekday >= 5,
            }
        }
        None => CalendarFields::default(),
    }
}

/// Linearly interpolated quantile over the given values.
///
/// Interpolates between closest ranks; returns `None` for an empty input,
/// which callers treat as "no computable threshold".
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    if lower == upper {
        Some(sorted[lower])
    } else {
        let fraction = position - lower as f64;
        Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
    }
}

/// Per-metric outlier flags for one record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutlierFlags {
    pub trip_miles: bool,
    pub fare: bool,
    pub trip_seconds: bool,
}

/// Flag records whose metrics sit strictly above the partition's quantile.
///
/// Thresholds are computed within the record set being staged, after
/// deduplication. A metric with no non-null values has no threshold and
/// flags nothing. Null metric values are never flagged.
pub fn compute_outlier_flags(records: &[NormalizedRecord], quantile_level: f64) -> Vec<OutlierFlags> {
    let thresholds: Vec<Option<f64>> = OUTLIER_METRICS
        .iter()
        .map(|metric| {
            let values: Vec<f64> = records.iter().filter_map(|r| r.float(metric)).collect();
            quantile(&values, quantile_level)
        })
        .collect();

    records
        .iter()
        .map(|record| {
            let above = |idx: usize, metric: &str| match (thresholds[idx], record.float(metric)) {
                (Some(threshold), Some(value)) => value > threshold,
                _ => false,
            };
            OutlierFlags {
                trip_miles: above(0, "trip_miles"),
                fare: above(1, "fare"),
                trip_seconds: above(2, "trip_seconds"),
            }
        })
        .collect()
}
