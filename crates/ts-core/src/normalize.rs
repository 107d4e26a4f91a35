//! Canonical comparable forms for tracked fields.
//!
//! Stored rows and live ticket projections arrive in different shapes
//! (SQLite text vs. serialized chrono values, JSON list text vs. arrays,
//! integers vs. numeric strings). Both sides are reduced to [`Canonical`]
//! values in schema column order before they are compared.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Map, Value};

use crate::schema::{ColumnType, TableSchema};

/// Fixed-precision form every timestamp and date is rendered to.
pub const CANONICAL_TIMESTAMP: &str = "%Y-%m-%d %H:%M:%S";

/// A normalized column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Canonical {
    Missing,
    Text(String),
    Integer(i64),
    Numeric(f64),
    Timestamp(String),
    List(String),
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

const AWARE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parse the timestamp shapes seen in tracker payloads, description tables
/// and the database. Offset-carrying values are converted to UTC; a bare
/// date becomes midnight.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    for fmt in AWARE_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(raw, fmt) {
            return Some(dt.naive_utc());
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(CANONICAL_TIMESTAMP).to_string()
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn list_items(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::Array(items) => Some(
            items
                .iter()
                .filter(|v| !v.is_null())
                .map(scalar_to_string)
                .collect(),
        ),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.starts_with('[') {
                serde_json::from_str::<Vec<Value>>(trimmed)
                    .ok()
                    .and_then(|items| list_items(&Value::Array(items)))
            } else if trimmed.is_empty() {
                Some(Vec::new())
            } else {
                Some(vec![trimmed.to_string()])
            }
        }
        _ => None,
    }
}

fn sorted_list(value: &Value) -> Option<String> {
    let mut items = list_items(value)?;
    items.sort();
    serde_json::to_string(&items).ok()
}

fn to_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0)
                .map(|f| f as i64)
        }),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite() && f.fract() == 0.0)
                    .map(|f| f as i64)
            })
        }
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn to_numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// Reduce one value to its canonical form for the given column type.
pub fn normalize_value(ty: ColumnType, value: &Value) -> Canonical {
    if value.is_null() {
        return Canonical::Missing;
    }
    match ty {
        ColumnType::Text => match value {
            Value::Array(_) => sorted_list(value)
                .map(Canonical::Text)
                .unwrap_or(Canonical::Missing),
            other => Canonical::Text(scalar_to_string(other)),
        },
        ColumnType::Integer => to_integer(value)
            .map(Canonical::Integer)
            .unwrap_or(Canonical::Missing),
        ColumnType::Numeric => to_numeric(value)
            .map(Canonical::Numeric)
            .unwrap_or(Canonical::Missing),
        ColumnType::Timestamp | ColumnType::Date => value
            .as_str()
            .and_then(parse_timestamp)
            .map(|ts| Canonical::Timestamp(format_timestamp(&ts)))
            .unwrap_or(Canonical::Missing),
        ColumnType::TextList => sorted_list(value)
            .map(Canonical::List)
            .unwrap_or(Canonical::Missing),
    }
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// Normalize a column map in schema column order. Columns outside the
/// schema (`version`, `update_timestamp`) are ignored.
pub fn normalize_row(schema: &TableSchema, row: &Map<String, Value>) -> Vec<Canonical> {
    schema
        .columns
        .iter()
        .map(|(name, decl)| {
            let value = row.get(*name).unwrap_or(&Value::Null);
            normalize_value(ColumnType::from_sql(decl), value)
        })
        .collect()
}

/// Whether the live projection differs from the stored row. A missing
/// stored row always counts as changed.
pub fn has_changed(
    schema: &TableSchema,
    stored: Option<&Map<String, Value>>,
    live: &Map<String, Value>,
) -> bool {
    match stored {
        None => true,
        Some(stored) => normalize_row(schema, stored) != normalize_row(schema, live),
    }
}

/// Names of the columns whose canonical values differ.
pub fn diff_columns(
    schema: &TableSchema,
    stored: &Map<String, Value>,
    live: &Map<String, Value>,
) -> Vec<&'static str> {
    let before = normalize_row(schema, stored);
    let after = normalize_row(schema, live);
    schema
        .columns
        .iter()
        .zip(before.iter().zip(after.iter()))
        .filter(|(_, (a, b))| a != b)
        .map(|((name, _), _)| *name)
        .collect()
}
