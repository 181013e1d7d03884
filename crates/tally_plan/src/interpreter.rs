//! Deterministic plan execution.
//!
//! `execute` is total: every validated plan over every dataset yields a
//! [`KpiResult`]. Conditions that make a metric meaningless produce
//! [`MetricValue::NoData`] instead of an error.

use crate::breakdown::build_breakdown;
use crate::cell::CellValue;
use crate::dataset::DatasetSource;
use crate::predicate::matches_all;
use crate::validate::{Metric, ResolvedColumn, ValidatedPlan};
use crate::value::{BreakdownEntry, MetricValue, UNKNOWN_LABEL};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

pub const DEFAULT_MAX_BREAKDOWN_ENTRIES: usize = 10;

const GROUP_SEPARATOR: &str = " / ";

#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    /// The instant that stands for "now" when resolving time windows.
    pub as_of: DateTime<Utc>,
    pub max_breakdown_entries: usize,
}

impl ExecutionOptions {
    pub fn new(as_of: DateTime<Utc>) -> Self {
        Self {
            as_of,
            max_breakdown_entries: DEFAULT_MAX_BREAKDOWN_ENTRIES,
        }
    }

    pub fn with_max_breakdown_entries(mut self, cap: usize) -> Self {
        self.max_breakdown_entries = cap;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiResult {
    pub value: MetricValue,
    /// Label of the largest group, when the plan groups.
    pub value_label: Option<String>,
    /// Present iff the plan groups.
    pub value_breakdown: Option<Vec<BreakdownEntry>>,
}

type Row = [CellValue];

/// Time span with both ends inclusive.
#[derive(Debug, Clone, Copy)]
struct Span {
    lower: NaiveDateTime,
    upper: NaiveDateTime,
}

impl Span {
    fn midpoint(&self) -> NaiveDateTime {
        self.lower + (self.upper - self.lower) / 2
    }
}

/// Execute `plan` over `dataset`.
pub fn execute(
    plan: &ValidatedPlan,
    dataset: &dyn DatasetSource,
    options: &ExecutionOptions,
) -> KpiResult {
    let as_of = options.as_of.naive_utc();
    let window = plan.time.as_ref().and_then(|t| {
        t.days.map(|days| Span {
            lower: as_of - Duration::days(i64::from(days)),
            upper: as_of,
        })
    });

    let retained: Vec<&Row> = dataset
        .rows()
        .iter()
        .map(|row| row.as_slice())
        .filter(|row| matches_all(&plan.filters, row))
        .filter(|row| match (&plan.time, window) {
            (Some(time), Some(span)) => timestamp(row, &time.column)
                .map(|ts| ts >= span.lower && ts <= span.upper)
                .unwrap_or(false),
            _ => true,
        })
        .collect();

    let comparison = match (&plan.metric, &plan.time) {
        (Metric::PctChange(_), Some(time)) => {
            window.or_else(|| observed_span(&retained, &time.column))
        }
        _ => None,
    };
    let time_column = plan.time.as_ref().map(|t| &t.column);

    let reduce_rows = |rows: &[&Row]| reduce(&plan.metric, rows, time_column, comparison);

    if plan.group_by.is_empty() {
        return KpiResult {
            value: reduce_rows(&retained).rounded(),
            value_label: None,
            value_breakdown: None,
        };
    }

    let mut groups: BTreeMap<GroupKey, Vec<&Row>> = BTreeMap::new();
    for &row in &retained {
        groups
            .entry(group_key(row, &plan.group_by))
            .or_default()
            .push(row);
    }

    let labels = group_labels(groups.keys());
    let group_values: Vec<(String, MetricValue)> = labels
        .into_iter()
        .zip(groups.values())
        .map(|(label, rows)| (label, reduce_rows(rows)))
        .collect();

    let value = if plan.metric.is_additive() {
        MetricValue::from_f64(group_values.iter().filter_map(|(_, v)| v.as_f64()).sum())
    } else {
        reduce_rows(&retained)
    };

    let breakdown = build_breakdown(group_values, options.max_breakdown_entries);
    let value_label = breakdown
        .iter()
        .find(|entry| !entry.value.is_no_data())
        .map(|entry| entry.label.clone());

    KpiResult {
        value: value.rounded(),
        value_label,
        value_breakdown: Some(breakdown),
    }
}

fn cell<'a>(row: &'a Row, column: &ResolvedColumn) -> &'a CellValue {
    row.get(column.index).unwrap_or(&CellValue::Null)
}

fn timestamp(row: &Row, column: &ResolvedColumn) -> Option<NaiveDateTime> {
    cell(row, column).as_timestamp()
}

/// One entry per grouping column; `None` is the missing-value group.
type GroupKey = Vec<Option<String>>;

fn group_key(row: &Row, group_by: &[ResolvedColumn]) -> GroupKey {
    group_by.iter().map(|col| cell(row, col).key()).collect()
}

/// Display labels for distinct group keys, in key order.
///
/// Keys that render to the same text (a literal "Unknown" next to a missing
/// value, or values containing the separator) get a numeric suffix.
fn group_labels<'a>(keys: impl Iterator<Item = &'a GroupKey>) -> Vec<String> {
    let base: Vec<String> = keys
        .map(|key| {
            key.iter()
                .map(|part| part.as_deref().unwrap_or(UNKNOWN_LABEL))
                .collect::<Vec<_>>()
                .join(GROUP_SEPARATOR)
        })
        .collect();

    let mut taken: HashSet<String> = base.iter().cloned().collect();
    let mut emitted: HashSet<String> = HashSet::new();
    base.into_iter()
        .map(|label| {
            if emitted.insert(label.clone()) {
                return label;
            }
            let mut n = 2;
            loop {
                let candidate = format!("{} ({})", label, n);
                if taken.insert(candidate.clone()) {
                    return candidate;
                }
                n += 1;
            }
        })
        .collect()
}

fn observed_span(rows: &[&Row], column: &ResolvedColumn) -> Option<Span> {
    let mut stamps = rows.iter().filter_map(|row| timestamp(row, column));
    let first = stamps.next()?;
    let (lower, upper) = stamps.fold((first, first), |(lo, hi), ts| (lo.min(ts), hi.max(ts)));
    Some(Span { lower, upper })
}

fn numbers<'a>(
    rows: &'a [&'a Row],
    column: &'a ResolvedColumn,
) -> impl Iterator<Item = f64> + 'a {
    rows.iter().filter_map(move |row| cell(row, column).as_f64())
}

fn reduce(
    metric: &Metric,
    rows: &[&Row],
    time_column: Option<&ResolvedColumn>,
    comparison: Option<Span>,
) -> MetricValue {
    match metric {
        Metric::Sum(col) => MetricValue::from_f64(numbers(rows, col).sum()),
        Metric::Avg(col) => {
            let (total, n) = numbers(rows, col).fold((0.0, 0usize), |(t, n), v| (t + v, n + 1));
            if n == 0 {
                MetricValue::NoData
            } else {
                MetricValue::from_f64(total / n as f64)
            }
        }
        Metric::Count => MetricValue::Number(rows.len() as f64),
        Metric::CountDistinct(col) => {
            let distinct: HashSet<String> =
                rows.iter().filter_map(|row| cell(row, col).key()).collect();
            MetricValue::Number(distinct.len() as f64)
        }
        Metric::Ratio {
            numerator,
            denominator,
        } => {
            let num: f64 = numbers(rows, numerator).sum();
            let den: f64 = numbers(rows, denominator).sum();
            if den == 0.0 {
                MetricValue::NoData
            } else {
                MetricValue::from_f64(num / den)
            }
        }
        Metric::PctChange(col) => match (time_column, comparison) {
            (Some(time_column), Some(span)) => pct_change(rows, col.as_ref(), time_column, span),
            _ => MetricValue::NoData,
        },
    }
}

fn pct_change(
    rows: &[&Row],
    column: Option<&ResolvedColumn>,
    time_column: &ResolvedColumn,
    span: Span,
) -> MetricValue {
    let mid = span.midpoint();
    let mut earlier: Vec<&Row> = Vec::new();
    let mut recent: Vec<&Row> = Vec::new();
    for &row in rows {
        match timestamp(row, time_column) {
            Some(ts) if ts >= span.lower && ts < mid => earlier.push(row),
            Some(ts) if ts >= mid && ts <= span.upper => recent.push(row),
            _ => {}
        }
    }
    if earlier.is_empty() || recent.is_empty() {
        return MetricValue::NoData;
    }

    let measure = |half: &[&Row]| match column {
        Some(col) => numbers(half, col).sum::<f64>(),
        None => half.len() as f64,
    };
    let before = measure(&earlier);
    let after = measure(&recent);
    if before == 0.0 {
        return MetricValue::NoData;
    }
    MetricValue::from_f64((after - before) / before.abs() * 100.0)
}
