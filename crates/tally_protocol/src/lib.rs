//! Tally Protocol: records and statuses shared by every crate.
//!
//! Nothing in here does I/O. The database layer persists these types, the
//! pipeline moves them through their states, and the worker and CLI read them.

pub mod defaults;
pub mod profile;
pub mod records;
pub mod types;

pub use profile::{ColumnProfile, DatasetProfile};
pub use records::{
    AdvisoryReport, ComplianceNote, Dataset, Forecast, Job, JobMessage, Kpi, KpiProposal,
    KpiSummary, Project, Recommendation, ReportDraft, RiskSignal,
};
pub use types::{JobStage, JobStatus, KpiStatus};

pub use tally_ids::{DatasetId, IdParseError, JobId, KpiId, ProjectId, ReportId};
