//! KPI Plan System
//!
//! # Philosophy: Plans are Data, never Code
//!
//! A KPI plan is the only model-produced artifact that is ever executed, so it
//! is treated as untrusted input all the way down:
//!
//! 1. **Proposal**: the model emits a [`KpiPlan`] (raw strings, loosely typed)
//! 2. **Validation**: [`validate`] checks it against a [`DatasetSchema`] and
//!    resolves every column reference, producing a [`ValidatedPlan`]
//! 3. **Execution**: [`execute`] runs the validated plan over a
//!    [`DatasetSource`] and yields a [`KpiResult`]
//!
//! The vocabulary is closed: six metrics, eight filter operators, grouping and
//! a time window. There is no expression language and no way to name an
//! operation that is not listed in [`Metric`] or [`FilterOp`]. Adding a metric
//! is a code change.
//!
//! # Modules
//!
//! - [`schema`]: column dtypes and dataset schemas
//! - [`cell`]: typed cell values and lenient text parsing
//! - [`dataset`]: the read-only dataset seam and an in-memory table
//! - [`plan`]: the untrusted plan model
//! - [`validate`]: static checks against a schema
//! - [`interpreter`]: deterministic execution
//! - [`value`]: metric values, the no-data sentinel and breakdown entries

pub mod breakdown;
pub mod cell;
pub mod dataset;
pub mod interpreter;
pub mod plan;
mod predicate;
pub mod schema;
pub mod validate;
pub mod value;

pub use cell::{parse_timestamp, CellValue};
pub use dataset::{DatasetSource, Table};
pub use interpreter::{execute, ExecutionOptions, KpiResult, DEFAULT_MAX_BREAKDOWN_ENTRIES};
pub use plan::{KpiPlan, PlanFilter};
pub use schema::{ColumnDtype, ColumnSchema, DatasetSchema};
pub use validate::{
    validate, FilterOp, Metric, ResolvedColumn, TimeWindow, ValidatedFilter, ValidatedPlan,
    ValidationError,
};
pub use value::{round2, BreakdownEntry, MetricValue, OTHER_LABEL, UNKNOWN_LABEL};
