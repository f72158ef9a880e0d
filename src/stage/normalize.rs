//! Best-effort schema normalization for loosely-typed upstream records.
//!
//! Canonicalizes field names to snake_case, drops fields whose canonical
//! names collide (first occurrence wins), and coerces known timestamp and
//! numeric fields to typed values. Coercion is fallible per field: an
//! unparseable value degrades to null, never a row failure, so upstream
//! renames and additions do not crash a staging run.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

use crate::raw::RawRecord;

/// Fields coerced to UTC timestamps.
pub const TIMESTAMP_FIELDS: [&str; 2] = ["trip_start_timestamp", "trip_end_timestamp"];

/// Fields coerced to floats.
pub const FLOAT_FIELDS: [&str; 4] = ["trip_miles", "fare", "tips", "trip_seconds"];

/// A typed-or-loose cell value after normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl FieldValue {
    /// Convert a raw JSON value without coercion.
    ///
    /// Arrays and objects are carried as their JSON text; upstream nests
    /// location structs we pass through verbatim.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => FieldValue::Int(i),
                None => n.as_f64().map(FieldValue::Float).unwrap_or(FieldValue::Null),
            },
            Value::String(s) => FieldValue::Text(s.clone()),
            other => FieldValue::Text(other.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
            || matches!(self, FieldValue::Float(f) if f.is_nan())
    }
}

/// Canonicalize a field name.
///
/// CamelCase boundaries become underscores, the result is lower-cased, and
/// runs of non-alphanumeric characters collapse to a single underscore.
pub fn to_snake_case(name: &str) -> String {
    let text = name.trim();
    let chars: Vec<char> = text.chars().collect();

    let mut split = String::with_capacity(text.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next = chars.get(i + 1);
            let after_lower = prev.is_lowercase() || prev.is_ascii_digit();
            let acronym_end = prev.is_uppercase() && next.is_some_and(|n| n.is_lowercase());
            if after_lower || acronym_end {
                split.push('_');
            }
        }
        split.push(c);
    }

    let lowered = split.to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let mut in_separator = false;
    for c in lowered.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            in_separator = false;
        } else if !in_separator {
            out.push('_');
            in_separator = true;
        }
    }
    out.trim_matches('_').to_string()
}

/// Coerce a value to a UTC timestamp.
///
/// Accepts RFC 3339 (with offset or `Z`) and naive ISO forms, which are
/// taken as UTC. Anything else is `None`.
pub fn coerce_timestamp(value: &FieldValue) -> Option<DateTime<Utc>> {
    match value {
        FieldValue::Timestamp(ts) => Some(*ts),
        FieldValue::Text(s) => parse_timestamp(s),
        _ => None,
    }
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let t = text.trim();
    if t.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(t, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(t, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

/// Coerce a value to a float.
pub fn coerce_float(value: &FieldValue) -> Option<f64> {
    match value {
        FieldValue::Float(f) if !f.is_nan() => Some(*f),
        FieldValue::Int(i) => Some(*i as f64),
        FieldValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        FieldValue::Text(s) => s.trim().parse::<f64>().ok().filter(|f| !f.is_nan()),
        _ => None,
    }
}

/// Coerce a value to an integer.
pub fn coerce_int(value: &FieldValue) -> Option<i64> {
    match value {
        FieldValue::Int(i) => Some(*i),
        FieldValue::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
        FieldValue::Bool(b) => Some(i64::from(*b)),
        FieldValue::Text(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Coerce a value to a boolean.
pub fn coerce_bool(value: &FieldValue) -> Option<bool> {
    match value {
        FieldValue::Bool(b) => Some(*b),
        FieldValue::Int(0) => Some(false),
        FieldValue::Int(1) => Some(true),
        FieldValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// A record after name canonicalization and type coercion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedRecord {
    fields: BTreeMap<String, FieldValue>,
}

impl NormalizedRecord {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.insert(name.into(), value);
    }

    /// Typed timestamp accessor; null and uncoerced values are `None`.
    pub fn timestamp(&self, name: &str) -> Option<DateTime<Utc>> {
        match self.fields.get(name) {
            Some(FieldValue::Timestamp(ts)) => Some(*ts),
            _ => None,
        }
    }

    /// Typed float accessor; null and uncoerced values are `None`.
    pub fn float(&self, name: &str) -> Option<f64> {
        match self.fields.get(name) {
            Some(FieldValue::Float(f)) if !f.is_nan() => Some(*f),
            _ => None,
        }
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Normalize one raw record.
///
/// Iterates fields in upstream order so that when two names canonicalize to
/// the same snake_case form, the first occurrence wins.
pub fn normalize_record(raw: &RawRecord) -> NormalizedRecord {
    let mut record = NormalizedRecord::default();

    for (name, value) in raw {
        let canonical = to_snake_case(name);
        if canonical.is_empty() || record.fields.contains_key(&canonical) {
            continue;
        }
        record.fields.insert(canonical, FieldValue::from_json(value));
    }

    for name in TIMESTAMP_FIELDS {
        if let Some(value) = record.fields.get(name) {
            let coerced = coerce_timestamp(value)
                .map(FieldValue::Timestamp)
                .unwrap_or(FieldValue::Null);
            record.fields.insert(name.to_string(), coerced);
        }
    }

    for name in FLOAT_FIELDS {
        if let Some(value) = record.fields.get(name) {
            let coerced = coerce_float(value)
                .map(FieldValue::Float)
                .unwrap_or(FieldValue::Null);
            record.fields.insert(name.to_string(), coerced);
        }
    }

    record
}
