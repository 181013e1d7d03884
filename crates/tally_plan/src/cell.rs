//! Typed cell values.
//!
//! Cells are produced by parsing raw text against the column dtype. Parsing
//! never fails: anything that does not fit the dtype becomes [`CellValue::Null`]
//! (text columns keep the raw string).

use crate::schema::ColumnDtype;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y"];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// A single typed value in a dataset row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl CellValue {
    /// Parse raw text as the given dtype.
    pub fn parse(raw: &str, dtype: ColumnDtype) -> CellValue {
        let trimmed = raw.trim();
        if is_null_token(trimmed) {
            return CellValue::Null;
        }
        match dtype {
            ColumnDtype::Integer => trimmed
                .parse::<i64>()
                .map(CellValue::Int)
                .or_else(|_| parse_number(trimmed).map(CellValue::Float).ok_or(()))
                .unwrap_or(CellValue::Null),
            ColumnDtype::Float => parse_number(trimmed)
                .map(CellValue::Float)
                .unwrap_or(CellValue::Null),
            ColumnDtype::Boolean => parse_bool(trimmed)
                .map(CellValue::Bool)
                .unwrap_or(CellValue::Null),
            ColumnDtype::Date => parse_date(trimmed)
                .map(CellValue::Date)
                .or_else(|| parse_timestamp(trimmed).map(CellValue::DateTime))
                .unwrap_or(CellValue::Null),
            ColumnDtype::DateTime => parse_timestamp(trimmed)
                .map(CellValue::DateTime)
                .unwrap_or(CellValue::Null),
            ColumnDtype::Text => CellValue::Text(raw.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Numeric reading of the cell. Text is parsed leniently.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Int(v) => Some(*v as f64),
            CellValue::Float(v) if v.is_finite() => Some(*v),
            CellValue::Text(s) => parse_number(s.trim()),
            _ => None,
        }
    }

    /// Timestamp reading of the cell, dates map to midnight.
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            CellValue::Date(d) => Some(d.and_time(NaiveTime::MIN)),
            CellValue::DateTime(ts) => Some(*ts),
            CellValue::Text(s) => parse_timestamp(s.trim()),
            _ => None,
        }
    }

    /// Canonical text used for grouping and distinct counting.
    ///
    /// Returns `None` for nulls so callers can decide how missing values are
    /// labelled.
    pub fn key(&self) -> Option<String> {
        match self {
            CellValue::Null => None,
            CellValue::Bool(b) => Some(b.to_string()),
            CellValue::Int(v) => Some(v.to_string()),
            CellValue::Float(v) => Some(v.to_string()),
            CellValue::Text(s) if s.trim().is_empty() => None,
            CellValue::Text(s) => Some(s.clone()),
            CellValue::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
            CellValue::DateTime(ts) => Some(ts.format("%Y-%m-%d %H:%M:%S").to_string()),
        }
    }
}

fn is_null_token(value: &str) -> bool {
    value.is_empty()
        || value.eq_ignore_ascii_case("null")
        || value.eq_ignore_ascii_case("nan")
        || value.eq_ignore_ascii_case("n/a")
        || value.eq_ignore_ascii_case("na")
        || value.eq_ignore_ascii_case("none")
}

/// Parse a number, tolerating thousands separators and a leading currency sign.
pub fn parse_number(value: &str) -> Option<f64> {
    let cleaned: String = value
        .trim_start_matches(['$', '€', '£'])
        .chars()
        .filter(|c| *c != ',' && *c != '_')
        .collect();
    let parsed = cleaned.parse::<f64>().ok()?;
    parsed.is_finite().then_some(parsed)
}

pub fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "y" | "t" => Some(true),
        "false" | "no" | "n" | "f" => Some(false),
        _ => None,
    }
}

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

/// Parse a timestamp in any supported format. RFC 3339 offsets are
/// normalised to UTC; bare dates map to midnight.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.naive_utc());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .or_else(|| parse_date(value).map(|d| d.and_time(NaiveTime::MIN)))
}
