//! Row filter evaluation.
//!
//! A null cell, or a cell that cannot be compared with the filter value, never
//! matches. That holds for `ne` too: a missing status is not "not paid".

use crate::cell::{parse_bool, parse_timestamp, CellValue};
use crate::validate::{FilterOp, ValidatedFilter};
use serde_json::Value;
use std::cmp::Ordering;

pub(crate) fn matches_all(filters: &[ValidatedFilter], row: &[CellValue]) -> bool {
    filters.iter().all(|filter| {
        let cell = row.get(filter.column.index).unwrap_or(&CellValue::Null);
        matches(filter, cell)
    })
}

fn matches(filter: &ValidatedFilter, cell: &CellValue) -> bool {
    if cell.is_null() {
        return false;
    }
    match filter.op {
        FilterOp::Eq => compare(cell, &filter.value) == Some(Ordering::Equal),
        FilterOp::Ne => matches!(compare(cell, &filter.value), Some(o) if o != Ordering::Equal),
        FilterOp::Gt => compare(cell, &filter.value) == Some(Ordering::Greater),
        FilterOp::Gte => matches!(
            compare(cell, &filter.value),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        FilterOp::Lt => compare(cell, &filter.value) == Some(Ordering::Less),
        FilterOp::Lte => matches!(
            compare(cell, &filter.value),
            Some(Ordering::Less | Ordering::Equal)
        ),
        FilterOp::In => filter
            .value
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .any(|item| compare(cell, item) == Some(Ordering::Equal))
            })
            .unwrap_or(false),
        FilterOp::Contains => match (cell, filter.value.as_str()) {
            (CellValue::Text(text), Some(needle)) => {
                text.to_lowercase().contains(&needle.to_lowercase())
            }
            _ => false,
        },
    }
}

/// Compare a cell against a JSON literal. `None` means incomparable.
fn compare(cell: &CellValue, value: &Value) -> Option<Ordering> {
    match cell {
        CellValue::Null => None,
        CellValue::Int(_) | CellValue::Float(_) => {
            let lhs = cell.as_f64()?;
            let rhs = json_number(value)?;
            lhs.partial_cmp(&rhs)
        }
        CellValue::Bool(b) => {
            let rhs = match value {
                Value::Bool(v) => *v,
                Value::String(s) => parse_bool(s.trim())?,
                _ => return None,
            };
            Some(b.cmp(&rhs))
        }
        CellValue::Date(_) | CellValue::DateTime(_) => {
            let lhs = cell.as_timestamp()?;
            let rhs = parse_timestamp(value.as_str()?.trim())?;
            Some(lhs.cmp(&rhs))
        }
        CellValue::Text(text) => match value {
            Value::String(s) => Some(text.as_str().cmp(s.as_str())),
            Value::Number(_) => {
                let lhs = cell.as_f64()?;
                lhs.partial_cmp(&json_number(value)?)
            }
            Value::Bool(b) => Some(parse_bool(text.trim())?.cmp(b)),
            _ => None,
        },
    }
}

fn json_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnDtype;
    use crate::validate::ResolvedColumn;
    use chrono::NaiveDate;
    use serde_json::json;

    fn filter(op: FilterOp, dtype: ColumnDtype, value: Value) -> ValidatedFilter {
        ValidatedFilter {
            column: ResolvedColumn {
                name: "c".to_string(),
                index: 0,
                dtype,
            },
            op,
            value,
        }
    }

    #[test]
    fn test_null_never_matches_even_ne() {
        let f = filter(FilterOp::Ne, ColumnDtype::Text, json!("paid"));
        assert!(!matches_all(&[f.clone()], &[CellValue::Null]));
        assert!(matches_all(&[f], &[CellValue::Text("pending".into())]));
    }

    #[test]
    fn test_numeric_ordering() {
        let f = filter(FilterOp::Gte, ColumnDtype::Float, json!(100));
        assert!(matches_all(&[f.clone()], &[CellValue::Float(100.0)]));
        assert!(!matches_all(&[f], &[CellValue::Float(99.9)]));
    }

    #[test]
    fn test_incomparable_does_not_match() {
        let f = filter(FilterOp::Eq, ColumnDtype::Float, json!("abc"));
        assert!(!matches_all(&[f], &[CellValue::Float(1.0)]));
    }

    #[test]
    fn test_in_and_contains() {
        let f = filter(FilterOp::In, ColumnDtype::Text, json!(["North", "South"]));
        assert!(matches_all(&[f.clone()], &[CellValue::Text("South".into())]));
        assert!(!matches_all(&[f], &[CellValue::Text("south".into())]));

        let f = filter(FilterOp::Contains, ColumnDtype::Text, json!("PREM"));
        assert!(matches_all(&[f], &[CellValue::Text("Premium plan".into())]));
    }

    #[test]
    fn test_date_comparison() {
        let f = filter(FilterOp::Lt, ColumnDtype::Date, json!("2024-02-01"));
        let jan = CellValue::Date(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap());
        let feb = CellValue::Date(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        assert!(matches_all(&[f.clone()], &[jan]));
        assert!(!matches_all(&[f], &[feb]));
    }

    #[test]
    fn test_filters_are_anded() {
        let filters = vec![
            filter(FilterOp::Gt, ColumnDtype::Integer, json!(1)),
            filter(FilterOp::Lt, ColumnDtype::Integer, json!(5)),
        ];
        assert!(matches_all(&filters, &[CellValue::Int(3)]));
        assert!(!matches_all(&filters, &[CellValue::Int(7)]));
    }
}
