//! Untrusted KPI plan model.
//!
//! This is the shape a model is asked to emit. Every field is loosely typed on
//! purpose; nothing here is executable until [`crate::validate`] has resolved
//! it against a schema.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single row filter as proposed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanFilter {
    pub column: String,
    pub operator: String,
    #[serde(default)]
    pub value: Value,
}

impl PlanFilter {
    pub fn new(column: impl Into<String>, operator: impl Into<String>, value: Value) -> Self {
        Self {
            column: column.into(),
            operator: operator.into(),
            value,
        }
    }
}

/// A structured KPI definition.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct KpiPlan {
    pub metric: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numerator_column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denominator_column: Option<String>,
    #[serde(default)]
    pub filters: Vec<PlanFilter>,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window_days: Option<i64>,
}

impl KpiPlan {
    pub fn new(metric: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            ..Default::default()
        }
    }

    pub fn sum(column: impl Into<String>) -> Self {
        Self::new("sum").with_column(column)
    }

    pub fn avg(column: impl Into<String>) -> Self {
        Self::new("avg").with_column(column)
    }

    pub fn count() -> Self {
        Self::new("count")
    }

    pub fn count_distinct(column: impl Into<String>) -> Self {
        Self::new("count_distinct").with_column(column)
    }

    pub fn ratio(numerator: impl Into<String>, denominator: impl Into<String>) -> Self {
        Self {
            numerator_column: Some(numerator.into()),
            denominator_column: Some(denominator.into()),
            ..Self::new("ratio")
        }
    }

    pub fn pct_change(time_column: impl Into<String>) -> Self {
        Self::new("pct_change").with_time_column(time_column)
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn with_filter(
        mut self,
        column: impl Into<String>,
        operator: impl Into<String>,
        value: Value,
    ) -> Self {
        self.filters.push(PlanFilter::new(column, operator, value));
        self
    }

    pub fn with_group_by(mut self, column: impl Into<String>) -> Self {
        self.group_by.push(column.into());
        self
    }

    pub fn with_time_column(mut self, column: impl Into<String>) -> Self {
        self.time_column = Some(column.into());
        self
    }

    pub fn with_window(mut self, column: impl Into<String>, days: i64) -> Self {
        self.time_column = Some(column.into());
        self.time_window_days = Some(days);
        self
    }
}
