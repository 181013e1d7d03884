//! Tally Pipeline: the job state machine and the human approval gates.
//!
//! # Stages
//!
//! ```text
//! profile -> generate_kpis -> [KPI approval] -> compute_kpis -> generate_report -> [recommendation approval]
//! ```
//!
//! Every status change of a [`Job`](tally_protocol::Job) goes through
//! [`state::transition`], which checks one exhaustive transition table and
//! persists with compare-and-set. The worker drives the `queued`/`running`
//! side; [`approval`] resolves the two `awaiting_*` gates; [`retry`] is the
//! only way a failed job runs again.

pub mod approval;
pub mod lineage;
pub mod queue;
pub mod retry;
pub mod state;

pub use approval::{
    record_kpi_approval, record_recommendation_approval, ApprovalError, KpiApprovalOutcome,
    KpiApprovalRequest, RecommendationApprovalRequest,
};
pub use queue::{Delivery, JobQueue, MemoryQueue, QueueError, SqliteQueue};
pub use retry::{retry_job, RetryError};
pub use state::{check_transition, transition, Actor, InvalidTransition, TransitionError};
