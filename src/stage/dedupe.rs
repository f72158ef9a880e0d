//! Deduplication by business key within one partition.

use std::collections::HashSet;

use super::normalize::NormalizedRecord;

/// Counts reported for one deduplication pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupeStats {
    pub rows_in: usize,
    pub rows_out: usize,
    pub duplicates_removed: usize,
}

/// Retain the first occurrence per business key, in input order.
///
/// Cross-partition duplicates are not considered: a key hashes from its own
/// event timestamps, so the same logical event always lands in the same
/// date partition.
pub fn dedupe_by_key(
    records: Vec<(String, NormalizedRecord)>,
) -> (Vec<(String, NormalizedRecord)>, DedupeStats) {
    let rows_in = records.len();
    let mut seen = HashSet::with_capacity(rows_in);
    let mut kept = Vec::with_capacity(rows_in);

    for (key, record) in records {
        if seen.insert(key.clone()) {
            kept.push((key, record));
        }
    }

    let stats = DedupeStats {
        rows_in,
        rows_out: kept.len(),
        duplicates_removed: rows_in - kept.len(),
    };
    (kept, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::normalize::FieldValue;

    fn tagged(key: &str, tag: i64) -> (String, NormalizedRecord) {
        let mut record = NormalizedRecord::default();
        record.insert("tag", FieldValue::Int(tag));
        (key.to_string(), record)
    }

    #[test]
    fn test_first_occurrence_wins() {
        let records = vec![tagged("k1", 1), tagged("k2", 2), tagged("k1", 3)];
        let (kept, stats) = dedupe_by_key(records);

        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].0, "k1");
        assert_eq!(kept[0].1.get("tag"), Some(&FieldValue::Int(1)));
        assert_eq!(kept[1].0, "k2");
        assert_eq!(
            stats,
            DedupeStats {
                rows_in: 3,
                rows_out: 2,
                duplicates_removed: 1
            }
        );
    }

    #[test]
    fn test_no_duplicates_is_identity() {
        let records = vec![tagged("a", 1), tagged("b", 2)];
        let (kept, stats) = dedupe_by_key(records);
        assert_eq!(kept.len(), 2);
        assert_eq!(stats.duplicates_removed, 0);
        assert_eq!(stats.rows_in, stats.rows_out);
    }

    #[test]
    fn test_empty_input() {
        let (kept, stats) = dedupe_by_key(Vec::new());
        assert!(kept.is_empty());
        assert_eq!(stats, DedupeStats::default());
    }
}
