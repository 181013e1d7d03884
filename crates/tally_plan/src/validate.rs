//! Static plan validation.
//!
//! Validation looks only at schema metadata. It is pure and never reads rows.
//! Checks run in a fixed order so the error reported for a plan with several
//! problems is stable: metric name, column references, metric compatibility,
//! filters, time window.

use crate::plan::{KpiPlan, PlanFilter};
use crate::schema::{ColumnDtype, DatasetSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Upper bound on a time window (100 years).
pub const MAX_TIME_WINDOW_DAYS: i64 = 36_500;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Unknown metric '{0}' (expected sum, avg, count, count_distinct, ratio or pct_change)")]
    UnknownMetric(String),

    #[error("Unknown column '{column}' referenced by {field}")]
    UnknownColumn { field: String, column: String },

    #[error("Metric {metric} is not applicable: {reason}")]
    IncompatibleMetric { metric: String, reason: String },

    #[error("Invalid filter on '{column}' with operator '{operator}': {reason}")]
    InvalidFilterOperator {
        column: String,
        operator: String,
        reason: String,
    },

    #[error("Invalid time window: {0}")]
    InvalidTimeWindow(String),
}

impl ValidationError {
    fn incompatible(metric: &str, reason: impl Into<String>) -> Self {
        Self::IncompatibleMetric {
            metric: metric.to_string(),
            reason: reason.into(),
        }
    }

    fn filter(filter: &PlanFilter, reason: impl Into<String>) -> Self {
        Self::InvalidFilterOperator {
            column: filter.column.clone(),
            operator: filter.operator.clone(),
            reason: reason.into(),
        }
    }
}

/// A column reference resolved against the schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedColumn {
    pub name: String,
    pub index: usize,
    pub dtype: ColumnDtype,
}

/// The closed set of metrics.
#[derive(Debug, Clone, PartialEq)]
pub enum Metric {
    Sum(ResolvedColumn),
    Avg(ResolvedColumn),
    Count,
    CountDistinct(ResolvedColumn),
    Ratio {
        numerator: ResolvedColumn,
        denominator: ResolvedColumn,
    },
    /// Period-over-period change of the column sum, or of the row count
    /// when no column is given.
    PctChange(Option<ResolvedColumn>),
}

impl Metric {
    pub fn name(&self) -> &'static str {
        match self {
            Metric::Sum(_) => "sum",
            Metric::Avg(_) => "avg",
            Metric::Count => "count",
            Metric::CountDistinct(_) => "count_distinct",
            Metric::Ratio { .. } => "ratio",
            Metric::PctChange(_) => "pct_change",
        }
    }

    /// Additive metrics have a top-level value equal to the sum of their groups.
    pub fn is_additive(&self) -> bool {
        matches!(self, Metric::Sum(_) | Metric::Count)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The closed set of filter operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Contains,
}

impl FilterOp {
    pub fn parse(operator: &str) -> Option<Self> {
        match operator.trim().to_lowercase().as_str() {
            "eq" | "==" => Some(FilterOp::Eq),
            "ne" | "!=" => Some(FilterOp::Ne),
            "gt" | ">" => Some(FilterOp::Gt),
            "gte" | ">=" => Some(FilterOp::Gte),
            "lt" | "<" => Some(FilterOp::Lt),
            "lte" | "<=" => Some(FilterOp::Lte),
            "in" => Some(FilterOp::In),
            "contains" => Some(FilterOp::Contains),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Ne => "ne",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
            FilterOp::In => "in",
            FilterOp::Contains => "contains",
        }
    }

    fn is_ordering(&self) -> bool {
        matches!(
            self,
            FilterOp::Gt | FilterOp::Gte | FilterOp::Lt | FilterOp::Lte
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedFilter {
    pub column: ResolvedColumn,
    pub op: FilterOp,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeWindow {
    pub column: ResolvedColumn,
    /// `None` means no window: the column is only used to order rows for
    /// `pct_change`.
    pub days: Option<u32>,
}

/// A plan whose every reference is resolved and whose shape is known to be
/// executable. Only [`validate`] constructs one.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedPlan {
    pub metric: Metric,
    pub filters: Vec<ValidatedFilter>,
    pub group_by: Vec<ResolvedColumn>,
    pub time: Option<TimeWindow>,
}

/// Check `plan` against `schema` and resolve every column reference.
pub fn validate(plan: &KpiPlan, schema: &DatasetSchema) -> Result<ValidatedPlan, ValidationError> {
    let metric_name = normalize_metric(&plan.metric)?;

    let resolver = Resolver { schema };
    let column = resolver.optional("column", plan.column.as_deref())?;
    let numerator = resolver.optional("numerator_column", plan.numerator_column.as_deref())?;
    let denominator =
        resolver.optional("denominator_column", plan.denominator_column.as_deref())?;
    let filter_columns = plan
        .filters
        .iter()
        .map(|f| resolver.required("filters.column", &f.column))
        .collect::<Result<Vec<_>, _>>()?;
    let mut group_by: Vec<ResolvedColumn> = Vec::with_capacity(plan.group_by.len());
    for name in &plan.group_by {
        let resolved = resolver.required("group_by", name)?;
        if !group_by.iter().any(|g| g.name == resolved.name) {
            group_by.push(resolved);
        }
    }
    let time_column = resolver.optional("time_column", plan.time_column.as_deref())?;

    let metric = build_metric(metric_name, column, numerator, denominator, &time_column)?;

    let filters = plan
        .filters
        .iter()
        .zip(filter_columns)
        .map(|(filter, column)| validate_filter(filter, column))
        .collect::<Result<Vec<_>, _>>()?;

    let time = validate_time(plan.time_window_days, time_column, schema)?;

    Ok(ValidatedPlan {
        metric,
        filters,
        group_by,
        time,
    })
}

fn normalize_metric(raw: &str) -> Result<&'static str, ValidationError> {
    match raw.trim().to_lowercase().as_str() {
        "sum" => Ok("sum"),
        "avg" | "mean" | "average" => Ok("avg"),
        "count" => Ok("count"),
        "count_distinct" => Ok("count_distinct"),
        "ratio" => Ok("ratio"),
        "pct_change" => Ok("pct_change"),
        _ => Err(ValidationError::UnknownMetric(raw.to_string())),
    }
}

struct Resolver<'a> {
    schema: &'a DatasetSchema,
}

impl Resolver<'_> {
    fn required(&self, field: &str, name: &str) -> Result<ResolvedColumn, ValidationError> {
        self.schema
            .column(name)
            .map(|(index, col)| ResolvedColumn {
                name: col.name.clone(),
                index,
                dtype: col.dtype,
            })
            .ok_or_else(|| ValidationError::UnknownColumn {
                field: field.to_string(),
                column: name.to_string(),
            })
    }

    fn optional(
        &self,
        field: &str,
        name: Option<&str>,
    ) -> Result<Option<ResolvedColumn>, ValidationError> {
        match name {
            Some(name) if !name.trim().is_empty() => self.required(field, name).map(Some),
            _ => Ok(None),
        }
    }
}

fn require_numeric(metric: &str, col: &ResolvedColumn) -> Result<(), ValidationError> {
    if col.dtype.is_numeric() {
        Ok(())
    } else {
        Err(ValidationError::incompatible(
            metric,
            format!("column '{}' has non-numeric type {}", col.name, col.dtype),
        ))
    }
}

fn build_metric(
    name: &str,
    column: Option<ResolvedColumn>,
    numerator: Option<ResolvedColumn>,
    denominator: Option<ResolvedColumn>,
    time_column: &Option<ResolvedColumn>,
) -> Result<Metric, ValidationError> {
    let required = |column: Option<ResolvedColumn>| {
        column.ok_or_else(|| ValidationError::incompatible(name, "requires 'column'"))
    };

    match name {
        "sum" => {
            let col = required(column)?;
            require_numeric(name, &col)?;
            Ok(Metric::Sum(col))
        }
        "avg" => {
            let col = required(column)?;
            require_numeric(name, &col)?;
            Ok(Metric::Avg(col))
        }
        "count" => Ok(Metric::Count),
        "count_distinct" => Ok(Metric::CountDistinct(required(column)?)),
        "ratio" => {
            let (numerator, denominator) = match (numerator, denominator) {
                (Some(n), Some(d)) => (n, d),
                _ => {
                    return Err(ValidationError::incompatible(
                        name,
                        "requires both 'numerator_column' and 'denominator_column'",
                    ))
                }
            };
            require_numeric(name, &numerator)?;
            require_numeric(name, &denominator)?;
            Ok(Metric::Ratio {
                numerator,
                denominator,
            })
        }
        "pct_change" => {
            if time_column.is_none() {
                return Err(ValidationError::incompatible(
                    name,
                    "requires 'time_column'",
                ));
            }
            if let Some(col) = &column {
                require_numeric(name, col)?;
            }
            Ok(Metric::PctChange(column))
        }
        other => Err(ValidationError::UnknownMetric(other.to_string())),
    }
}

fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_))
}

fn validate_filter(
    filter: &PlanFilter,
    column: ResolvedColumn,
) -> Result<ValidatedFilter, ValidationError> {
    let op = FilterOp::parse(&filter.operator)
        .ok_or_else(|| ValidationError::filter(filter, "unsupported operator"))?;

    match op {
        FilterOp::In => {
            let items = filter
                .value
                .as_array()
                .ok_or_else(|| ValidationError::filter(filter, "'in' requires a list value"))?;
            if !items.iter().all(is_scalar) {
                return Err(ValidationError::filter(
                    filter,
                    "'in' list items must be strings, numbers or booleans",
                ));
            }
        }
        FilterOp::Contains => {
            if column.dtype != ColumnDtype::Text {
                return Err(ValidationError::filter(
                    filter,
                    format!("'contains' requires a text column, got {}", column.dtype),
                ));
            }
            if !filter.value.is_string() {
                return Err(ValidationError::filter(
                    filter,
                    "'contains' requires a string value",
                ));
            }
        }
        _ if op.is_ordering() => {
            if !(filter.value.is_number() || filter.value.is_string()) {
                return Err(ValidationError::filter(
                    filter,
                    "ordering comparison requires a number or string value",
                ));
            }
        }
        _ => {
            if !is_scalar(&filter.value) {
                return Err(ValidationError::filter(
                    filter,
                    "comparison requires a string, number or boolean value",
                ));
            }
        }
    }

    Ok(ValidatedFilter {
        column,
        op,
        value: filter.value.clone(),
    })
}

fn validate_time(
    days: Option<i64>,
    column: Option<ResolvedColumn>,
    schema: &DatasetSchema,
) -> Result<Option<TimeWindow>, ValidationError> {
    let Some(column) = column else {
        return match days {
            Some(_) => Err(ValidationError::InvalidTimeWindow(
                "time_window_days requires a time_column".to_string(),
            )),
            None => Ok(None),
        };
    };

    let is_time = schema
        .column(&column.name)
        .map(|(_, col)| col.is_time_column())
        .unwrap_or(false);
    if !is_time {
        return Err(ValidationError::InvalidTimeWindow(format!(
            "column '{}' is not a date or datetime column",
            column.name
        )));
    }

    let days = match days {
        None => None,
        Some(d) if d <= 0 => {
            return Err(ValidationError::InvalidTimeWindow(format!(
                "time_window_days must be positive, got {}",
                d
            )))
        }
        Some(d) if d > MAX_TIME_WINDOW_DAYS => {
            return Err(ValidationError::InvalidTimeWindow(format!(
                "time_window_days must be at most {}, got {}",
                MAX_TIME_WINDOW_DAYS, d
            )))
        }
        Some(d) => Some(d as u32),
    };

    Ok(Some(TimeWindow { column, days }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnSchema;
    use serde_json::json;

    fn orders_schema() -> DatasetSchema {
        DatasetSchema::new(vec![
            ColumnSchema::new("order_id", ColumnDtype::Integer).id_like(),
            ColumnSchema::new("region", ColumnDtype::Text),
            ColumnSchema::new("status", ColumnDtype::Text),
            ColumnSchema::new("revenue", ColumnDtype::Float),
            ColumnSchema::new("cost", ColumnDtype::Float),
            ColumnSchema::new("order_date", ColumnDtype::Date),
            ColumnSchema::new("signup", ColumnDtype::Text).date_like(),
        ])
    }

    #[test]
    fn test_valid_plan_resolves_indices() {
        let plan = KpiPlan::sum("revenue")
            .with_filter("status", "eq", json!("paid"))
            .with_group_by("region")
            .with_window("order_date", 30);
        let validated = validate(&plan, &orders_schema()).unwrap();

        match &validated.metric {
            Metric::Sum(col) => {
                assert_eq!(col.index, 3);
                assert_eq!(col.dtype, ColumnDtype::Float);
            }
            other => panic!("unexpected metric {other:?}"),
        }
        assert_eq!(validated.filters[0].op, FilterOp::Eq);
        assert_eq!(validated.group_by[0].index, 1);
        assert_eq!(validated.time.as_ref().unwrap().days, Some(30));
    }

    #[test]
    fn test_unknown_column_for_every_field() {
        let schema = orders_schema();
        let plans = vec![
            ("column", KpiPlan::sum("missing")),
            ("numerator_column", KpiPlan::ratio("missing", "cost")),
            ("denominator_column", KpiPlan::ratio("revenue", "missing")),
            (
                "filters.column",
                KpiPlan::count().with_filter("missing", "eq", json!(1)),
            ),
            ("group_by", KpiPlan::count().with_group_by("missing")),
            ("time_column", KpiPlan::count().with_window("missing", 7)),
        ];

        for (field, plan) in plans {
            let err = validate(&plan, &schema).unwrap_err();
            assert_eq!(
                err,
                ValidationError::UnknownColumn {
                    field: field.to_string(),
                    column: "missing".to_string()
                }
            );
        }
    }

    #[test]
    fn test_unknown_metric() {
        let err = validate(&KpiPlan::new("median"), &orders_schema()).unwrap_err();
        assert!(matches!(err, ValidationError::UnknownMetric(m) if m == "median"));
    }

    #[test]
    fn test_mean_alias_is_avg() {
        let plan = KpiPlan::new("mean").with_column("revenue");
        let validated = validate(&plan, &orders_schema()).unwrap();
        assert_eq!(validated.metric.name(), "avg");
    }

    #[test]
    fn test_incompatible_metrics() {
        let schema = orders_schema();
        let cases = vec![
            KpiPlan::new("ratio").with_column("revenue"),
            KpiPlan::new("sum"),
            KpiPlan::sum("region"),
            KpiPlan::avg("status"),
            KpiPlan::ratio("region", "cost"),
            KpiPlan::new("pct_change").with_column("revenue"),
            KpiPlan::pct_change("order_date").with_column("region"),
        ];
        for plan in cases {
            let err = validate(&plan, &schema).unwrap_err();
            assert!(
                matches!(err, ValidationError::IncompatibleMetric { .. }),
                "{plan:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_count_distinct_accepts_text() {
        assert!(validate(&KpiPlan::count_distinct("region"), &orders_schema()).is_ok());
    }

    #[test]
    fn test_invalid_filters() {
        let schema = orders_schema();
        let cases = vec![
            KpiPlan::count().with_filter("status", "like", json!("p%")),
            KpiPlan::count().with_filter("status", "in", json!("paid")),
            KpiPlan::count().with_filter("revenue", "contains", json!("1")),
            KpiPlan::count().with_filter("status", "contains", json!(1)),
            KpiPlan::count().with_filter("revenue", "gt", json!(true)),
            KpiPlan::count().with_filter("status", "eq", json!({"a": 1})),
        ];
        for plan in cases {
            let err = validate(&plan, &schema).unwrap_err();
            assert!(
                matches!(err, ValidationError::InvalidFilterOperator { .. }),
                "{plan:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_invalid_time_windows() {
        let schema = orders_schema();
        let cases = vec![
            KpiPlan {
                time_window_days: Some(30),
                ..KpiPlan::count()
            },
            KpiPlan::count().with_window("region", 30),
            KpiPlan::count().with_window("order_date", 0),
            KpiPlan::count().with_window("order_date", -5),
            KpiPlan::count().with_window("order_date", MAX_TIME_WINDOW_DAYS + 1),
        ];
        for plan in cases {
            let err = validate(&plan, &schema).unwrap_err();
            assert!(
                matches!(err, ValidationError::InvalidTimeWindow(_)),
                "{plan:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_date_like_text_column_is_valid_time_column() {
        let plan = KpiPlan::count().with_window("signup", 90);
        assert!(validate(&plan, &orders_schema()).is_ok());
    }

    #[test]
    fn test_group_by_dedup_preserves_order() {
        let plan = KpiPlan::count()
            .with_group_by("status")
            .with_group_by("region")
            .with_group_by("status");
        let validated = validate(&plan, &orders_schema()).unwrap();
        let names: Vec<_> = validated.group_by.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["status", "region"]);
    }

    #[test]
    fn test_unknown_column_reported_before_metric_problems() {
        let plan = KpiPlan::sum("region").with_group_by("missing");
        assert!(matches!(
            validate(&plan, &orders_schema()),
            Err(ValidationError::UnknownColumn { .. })
        ));
    }
}
