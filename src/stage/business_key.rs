//! Deterministic business key: the dedup identity of one logical trip.
//!
//! A fixed ordered list of semantic fields is encoded to canonical strings,
//! joined with `||`, and hashed with SHA-256. The same logical event fetched
//! twice (overlapping lookback windows) must collapse to one key, so the
//! encoding is independent of run time, storage field order, and incidental
//! type representation (`1` vs `1.0`).

use sha2::{Digest, Sha256};

use super::normalize::{FieldValue, NormalizedRecord};
use crate::state::truncate_to_second;

/// Ordered fields hashed into the business key.
pub const BUSINESS_KEY_FIELDS: [&str; 7] = [
    "trip_start_timestamp",
    "trip_end_timestamp",
    "taxi_id",
    "pickup_community_area",
    "dropoff_community_area",
    "trip_miles",
    "fare",
];

/// Delimiter between encoded key parts.
const KEY_DELIMITER: &str = "||";

/// Format a float with 15 significant digits, `%.15g` style.
///
/// Fixed notation for exponents in `[-4, 15)`, scientific otherwise, with
/// trailing zeros trimmed either way. `1.0` therefore encodes as `"1"`.
pub fn format_float_g15(value: f64) -> String {
    if value == 0.0 {
        return if value.is_sign_negative() {
            "-0".to_string()
        } else {
            "0".to_string()
        };
    }

    let scientific = format!("{:.14e}", value);
    let (mantissa, exponent) = scientific
        .split_once('e')
        .expect("{:e} output always contains an exponent");
    let exponent: i32 = exponent
        .parse()
        .expect("{:e} output always has a numeric exponent");

    if (-4..15).contains(&exponent) {
        let precision = (14 - exponent).max(0) as usize;
        let fixed = format!("{:.*}", precision, value);
        if fixed.contains('.') {
            fixed.trim_end_matches('0').trim_end_matches('.').to_string()
        } else {
            fixed
        }
    } else {
        let mantissa = mantissa.trim_end_matches('0').trim_end_matches('.');
        let sign = if exponent < 0 { "-" } else { "+" };
        format!("{mantissa}e{sign}{:02}", exponent.abs())
    }
}

/// Encode one field value as its canonical key part.
pub fn normalize_key_part(value: &FieldValue) -> String {
    match value {
        FieldValue::Null => String::new(),
        FieldValue::Timestamp(ts) => truncate_to_second(*ts)
            .format("%Y-%m-%dT%H:%M:%SZ")
            .to_string(),
        FieldValue::Float(f) => {
            if f.is_nan() {
                String::new()
            } else {
                format_float_g15(*f)
            }
        }
        FieldValue::Int(i) => i.to_string(),
        FieldValue::Bool(b) => b.to_string(),
        FieldValue::Text(s) => {
            let text = s.trim().to_lowercase();
            match text.as_str() {
                "" | "none" | "nan" | "nat" => String::new(),
                _ => text,
            }
        }
    }
}

/// Derive the business key for one normalized record.
pub fn derive_key(record: &NormalizedRecord) -> String {
    let mut payload = String::new();
    for (i, field) in BUSINESS_KEY_FIELDS.iter().enumerate() {
        if i > 0 {
            payload.push_str(KEY_DELIMITER);
        }
        if let Some(value) = record.get(field) {
            payload.push_str(&normalize_key_part(value));
        }
    }

    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record(entries: &[(&str, FieldValue)]) -> NormalizedRecord {
        let mut rec = NormalizedRecord::default();
        for (name, value) in entries {
            rec.insert(*name, value.clone());
        }
        rec
    }

    #[test]
    fn test_format_float_g15() {
        assert_eq!(format_float_g15(1.0), "1");
        assert_eq!(format_float_g15(0.0), "0");
        assert_eq!(format_float_g15(4.25), "4.25");
        assert_eq!(format_float_g15(-1.5), "-1.5");
        assert_eq!(format_float_g15(0.0001), "0.0001");
        assert_eq!(format_float_g15(1e-5), "1e-05");
        assert_eq!(format_float_g15(1e15), "1e+15");
        assert_eq!(format_float_g15(123.456), "123.456");
        assert_eq!(format_float_g15(0.1), "0.1");
    }

    #[test]
    fn test_timestamp_part_is_second_precision_zulu() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 8, 30, 45).unwrap();
        assert_eq!(
            normalize_key_part(&FieldValue::Timestamp(ts)),
            "2024-01-15T08:30:45Z"
        );
    }

    #[test]
    fn test_null_like_parts_encode_empty() {
        assert_eq!(normalize_key_part(&FieldValue::Null), "");
        assert_eq!(normalize_key_part(&FieldValue::Float(f64::NAN)), "");
        assert_eq!(normalize_key_part(&FieldValue::Text("None".to_string())), "");
        assert_eq!(normalize_key_part(&FieldValue::Text(" NaN ".to_string())), "");
        assert_eq!(normalize_key_part(&FieldValue::Text("NaT".to_string())), "");
    }

    #[test]
    fn test_text_part_trimmed_and_lowercased() {
        assert_eq!(
            normalize_key_part(&FieldValue::Text("  Flash Cab ".to_string())),
            "flash cab"
        );
    }

    #[test]
    fn test_int_and_float_representations_agree() {
        // `1` vs `1.0` must hash identically
        let a = record(&[
            ("trip_miles", FieldValue::Float(1.0)),
            ("pickup_community_area", FieldValue::Int(8)),
        ]);
        let b = record(&[
            ("trip_miles", FieldValue::Int(1)),
            ("pickup_community_area", FieldValue::Text("8".to_string())),
        ]);
        assert_eq!(derive_key(&a), derive_key(&b));
    }

    #[test]
    fn test_missing_fields_equal_null_fields() {
        let with_nulls = record(&[
            ("taxi_id", FieldValue::Text("abc".to_string())),
            ("fare", FieldValue::Null),
        ]);
        let sparse = record(&[("taxi_id", FieldValue::Text("ABC ".to_string()))]);
        assert_eq!(derive_key(&with_nulls), derive_key(&sparse));
    }

    #[test]
    fn test_distinct_tuples_get_distinct_keys() {
        let a = record(&[("taxi_id", FieldValue::Text("abc".to_string()))]);
        let b = record(&[("taxi_id", FieldValue::Text("abd".to_string()))]);
        assert_ne!(derive_key(&a), derive_key(&b));
    }

    #[test]
    fn test_key_is_stable_hex_sha256() {
        let key = derive_key(&record(&[]));
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        // Same input, same key, every time
        assert_eq!(key, derive_key(&record(&[])));
    }

    #[test]
    fn test_non_key_fields_do_not_affect_key() {
        let a = record(&[
            ("taxi_id", FieldValue::Text("abc".to_string())),
            ("company", FieldValue::Text("Flash Cab".to_string())),
        ]);
        let b = record(&[("taxi_id", FieldValue::Text("abc".to_string()))]);
        assert_eq!(derive_key(&a), derive_key(&b));
    }
}
