//! Dataset profiler: column types, date and id detection, missingness, join keys.

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use tally_plan::cell::{parse_bool, parse_date, parse_number};
use tally_plan::{parse_timestamp, round2, CellValue, ColumnDtype};
use tally_protocol::{ColumnProfile, DatasetProfile};

use crate::ingest::RawTable;

/// Non-null values inspected when guessing whether a text column holds dates.
const DATE_SAMPLE_SIZE: usize = 20;
const DATE_PARSE_THRESHOLD: f64 = 0.7;
const ID_UNIQUENESS_THRESHOLD: f64 = 0.95;
const SAMPLE_VALUES: usize = 5;

fn date_name_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    // Matched per name token so "category" is not mistaken for "at".
    PATTERN
        .get_or_init(|| {
            Regex::new(r"(?i)^(date|time|timestamp|created|updated|at|dt|day|month|year|period)$")
                .ok()
        })
        .as_ref()
}

fn id_name_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)(^id$|_id$|_key$|uuid|guid)").ok())
        .as_ref()
}

/// Split `orderDate`, `order_date` and `order-date` into lowercase tokens.
fn name_tokens(name: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for ch in name.chars() {
        if !ch.is_alphanumeric() {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if ch.is_uppercase() && prev_lower && !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
        prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
        current.extend(ch.to_lowercase());
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn name_suggests_date(name: &str) -> bool {
    date_name_pattern()
        .map(|re| name_tokens(name).iter().any(|token| re.is_match(token)))
        .unwrap_or(false)
}

fn name_suggests_id(name: &str) -> bool {
    id_name_pattern()
        .map(|re| re.is_match(name.trim()))
        .unwrap_or(false)
}

fn is_null(raw: &str) -> bool {
    CellValue::parse(raw, ColumnDtype::Text).is_null()
}

/// Narrowest dtype every non-null value parses as.
fn infer_dtype(values: &[&str]) -> ColumnDtype {
    if values.is_empty() {
        return ColumnDtype::Text;
    }
    if values.iter().all(|v| v.parse::<i64>().is_ok()) {
        return ColumnDtype::Integer;
    }
    if values.iter().all(|v| parse_number(v).is_some()) {
        return ColumnDtype::Float;
    }
    if values.iter().all(|v| parse_bool(v).is_some()) {
        return ColumnDtype::Boolean;
    }
    if values.iter().all(|v| parse_date(v).is_some()) {
        return ColumnDtype::Date;
    }
    if values.iter().all(|v| parse_timestamp(v).is_some()) {
        return ColumnDtype::DateTime;
    }
    ColumnDtype::Text
}

fn infer_is_date(name: &str, dtype: ColumnDtype, values: &[&str]) -> bool {
    if name_suggests_date(name) || dtype.is_temporal() {
        return true;
    }
    if dtype != ColumnDtype::Text {
        return false;
    }
    let sample: Vec<&&str> = values.iter().take(DATE_SAMPLE_SIZE).collect();
    if sample.is_empty() {
        return false;
    }
    let parsed = sample
        .iter()
        .filter(|v| parse_timestamp(v).is_some())
        .count();
    parsed as f64 / sample.len() as f64 >= DATE_PARSE_THRESHOLD
}

fn infer_is_id(name: &str, dtype: ColumnDtype, values: &[&str], unique_count: usize) -> bool {
    if name_suggests_id(name) {
        return true;
    }
    // Measures and flags are unique by accident, not by identity.
    if !matches!(dtype, ColumnDtype::Integer | ColumnDtype::Text) || values.len() < 2 {
        return false;
    }
    unique_count as f64 / values.len() as f64 >= ID_UNIQUENESS_THRESHOLD
}

fn profile_column(raw: &RawTable, index: usize, name: &str) -> ColumnProfile {
    let row_count = raw.row_count();
    let values: Vec<&str> = raw.column(index).filter(|v| !is_null(v)).collect();
    let null_count = row_count - values.len();
    let null_pct = if row_count > 0 {
        round2(null_count as f64 / row_count as f64 * 100.0)
    } else {
        0.0
    };

    let dtype = infer_dtype(&values);
    let unique_count = values
        .iter()
        .filter_map(|v| CellValue::parse(v, dtype).key())
        .collect::<HashSet<_>>()
        .len();

    let (mut min, mut max, mut mean) = (None, None, None);
    if dtype.is_numeric() {
        let numbers: Vec<f64> = values.iter().filter_map(|v| parse_number(v)).collect();
        if !numbers.is_empty() {
            min = numbers.iter().copied().reduce(f64::min);
            max = numbers.iter().copied().reduce(f64::max);
            let avg = numbers.iter().sum::<f64>() / numbers.len() as f64;
            mean = Some((avg * 10_000.0).round() / 10_000.0);
        }
    }

    ColumnProfile {
        name: name.to_string(),
        dtype,
        null_count,
        null_pct,
        unique_count,
        sample_values: values.iter().take(SAMPLE_VALUES).map(|v| v.to_string()).collect(),
        is_date: infer_is_date(name, dtype, &values),
        is_id: infer_is_id(name, dtype, &values, unique_count),
        min,
        max,
        mean,
    }
}

/// Profile a parsed upload.
pub fn profile_table(raw: &RawTable) -> DatasetProfile {
    let columns: Vec<ColumnProfile> = raw
        .headers
        .iter()
        .enumerate()
        .map(|(index, name)| profile_column(raw, index, name))
        .collect();

    let date_columns = columns
        .iter()
        .filter(|c| c.is_date)
        .map(|c| c.name.clone())
        .collect();
    let potential_join_keys = columns
        .iter()
        .filter(|c| c.is_id)
        .map(|c| c.name.clone())
        .collect();

    DatasetProfile {
        row_count: raw.row_count(),
        column_count: raw.column_count(),
        columns,
        potential_join_keys,
        date_columns,
    }
}
