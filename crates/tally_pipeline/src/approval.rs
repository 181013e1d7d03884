//! Approval Gates
//!
//! The pipeline stops twice for a human:
//!
//! 1. After `generate_kpis`: each proposed KPI is approved or rejected. Only
//!    approved KPIs are ever computed.
//! 2. After `generate_report`: recommendations flagged `requires_approval`
//!    are approved or rejected. Until decided they are never actionable.
//!
//! Both gates validate the whole request before writing anything.

use std::collections::BTreeMap;
use tally_db::{DbError, TallyDb};
use tally_ids::{JobId, KpiId, ProjectId, ReportId};
use tally_protocol::{AdvisoryReport, Job, JobMessage, JobStage, JobStatus, Kpi, KpiStatus};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::queue::{JobQueue, QueueError};
use crate::state::{transition, Actor, TransitionError};

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("Project not found: {0}")]
    ProjectNotFound(ProjectId),

    #[error("Project {0} has no KPI proposal round")]
    NoKpiRound(ProjectId),

    #[error("Job {job_id} is {status}, not awaiting approval")]
    GateNotOpen { job_id: JobId, status: JobStatus },

    #[error("No decisions submitted")]
    NoDecisions,

    #[error("KPI not found: {0}")]
    UnknownKpi(KpiId),

    #[error("KPI {kpi_id} does not belong to the pending round {round_job_id}")]
    KpiNotInRound { kpi_id: KpiId, round_job_id: JobId },

    #[error("Report not found: {0}")]
    ReportNotFound(ReportId),

    #[error("Report {report_id} does not belong to project {project_id}")]
    ReportNotInProject {
        report_id: ReportId,
        project_id: ProjectId,
    },

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Review decisions for one KPI proposal round.
///
/// `Approved` approves; any other submitted status rejects. KPIs left out of
/// the request keep their current status.
#[derive(Debug, Clone)]
pub struct KpiApprovalRequest {
    pub project_id: ProjectId,
    pub decisions: BTreeMap<KpiId, KpiStatus>,
}

impl KpiApprovalRequest {
    pub fn new(project_id: ProjectId) -> Self {
        Self {
            project_id,
            decisions: BTreeMap::new(),
        }
    }

    pub fn approve(mut self, kpi_id: KpiId) -> Self {
        self.decisions.insert(kpi_id, KpiStatus::Approved);
        self
    }

    pub fn reject(mut self, kpi_id: KpiId) -> Self {
        self.decisions.insert(kpi_id, KpiStatus::Rejected);
        self
    }

    pub fn with_decision(mut self, kpi_id: KpiId, status: KpiStatus) -> Self {
        self.decisions.insert(kpi_id, status);
        self
    }
}

#[derive(Debug, Clone)]
pub struct KpiApprovalOutcome {
    /// Every KPI of the round after the decisions were applied.
    pub kpis: Vec<Kpi>,
    /// The `generate_kpis` job, now complete.
    pub gate_job: Job,
    /// The enqueued `compute_kpis` job, if any KPI of the round is approved.
    pub compute_job: Option<Job>,
}

/// Apply KPI review decisions and release the pipeline.
pub async fn record_kpi_approval(
    db: &TallyDb,
    queue: &dyn JobQueue,
    request: &KpiApprovalRequest,
) -> Result<KpiApprovalOutcome, ApprovalError> {
    let project_id = &request.project_id;
    if db.project_get(project_id).await?.is_none() {
        return Err(ApprovalError::ProjectNotFound(project_id.clone()));
    }
    if request.decisions.is_empty() {
        return Err(ApprovalError::NoDecisions);
    }

    let gate = db
        .job_latest_for_stage(project_id, JobStage::GenerateKpis)
        .await?
        .ok_or_else(|| ApprovalError::NoKpiRound(project_id.clone()))?;
    if gate.status != JobStatus::AwaitingKpiApproval {
        return Err(ApprovalError::GateNotOpen {
            job_id: gate.id.clone(),
            status: gate.status,
        });
    }

    let round = db.kpi_list_for_round(&gate.id).await?;
    for kpi_id in request.decisions.keys() {
        if round.iter().any(|kpi| &kpi.id == kpi_id) {
            continue;
        }
        return Err(match db.kpi_get(kpi_id).await? {
            Some(_) => ApprovalError::KpiNotInRound {
                kpi_id: kpi_id.clone(),
                round_job_id: gate.id.clone(),
            },
            None => ApprovalError::UnknownKpi(kpi_id.clone()),
        });
    }

    let decisions: Vec<(KpiId, KpiStatus)> = request
        .decisions
        .iter()
        .map(|(id, status)| {
            let status = match status {
                KpiStatus::Approved => KpiStatus::Approved,
                _ => KpiStatus::Rejected,
            };
            (id.clone(), status)
        })
        .collect();
    db.kpi_set_statuses(&decisions).await?;

    let kpis = db.kpi_list_for_round(&gate.id).await?;
    let approved = kpis
        .iter()
        .filter(|kpi| kpi.status == KpiStatus::Approved)
        .count();

    // Successor first: if we stop between the two writes the gate is still
    // open and the request can simply be repeated.
    let compute_job = if approved > 0 {
        let job = db
            .job_create_successor(&Job::successor_of(&gate, JobStage::ComputeKpis))
            .await?;
        queue.enqueue(&JobMessage::new(job.id.clone())).await?;
        Some(job)
    } else {
        None
    };

    let gate_job = transition(db, &gate, JobStatus::Complete, Actor::ApprovalGate, None).await?;

    info!(
        project_id = %project_id,
        job_id = %gate_job.id,
        decided = decisions.len(),
        approved,
        compute_job = compute_job.as_ref().map(|j| j.id.to_string()).unwrap_or_default(),
        "KPI approval recorded"
    );

    Ok(KpiApprovalOutcome {
        kpis,
        gate_job,
        compute_job,
    })
}

/// Review decisions for the recommendations of one report, keyed by index.
#[derive(Debug, Clone)]
pub struct RecommendationApprovalRequest {
    pub project_id: ProjectId,
    pub report_id: ReportId,
    pub decisions: BTreeMap<usize, bool>,
}

impl RecommendationApprovalRequest {
    pub fn new(project_id: ProjectId, report_id: ReportId) -> Self {
        Self {
            project_id,
            report_id,
            decisions: BTreeMap::new(),
        }
    }

    pub fn decide(mut self, index: usize, approved: bool) -> Self {
        self.decisions.insert(index, approved);
        self
    }
}

/// Apply recommendation decisions. Once every gated recommendation is decided
/// the report's job is completed.
pub async fn record_recommendation_approval(
    db: &TallyDb,
    request: &RecommendationApprovalRequest,
) -> Result<AdvisoryReport, ApprovalError> {
    let mut report = db
        .report_get(&request.report_id)
        .await?
        .ok_or_else(|| ApprovalError::ReportNotFound(request.report_id.clone()))?;
    if report.project_id != request.project_id {
        return Err(ApprovalError::ReportNotInProject {
            report_id: report.id.clone(),
            project_id: request.project_id.clone(),
        });
    }

    let mut changed = 0usize;
    for (&index, &approved) in &request.decisions {
        match report.recommendations.get_mut(index) {
            None => {
                warn!(report_id = %report.id, index, "Ignoring decision for missing recommendation");
            }
            Some(rec) if !rec.requires_approval => {
                debug!(report_id = %report.id, index, "Recommendation needs no approval");
            }
            Some(rec) => {
                rec.approved = Some(approved);
                changed += 1;
            }
        }
    }

    if changed > 0 {
        db.report_set_recommendations(&report.id, &report.recommendations)
            .await?;
    }

    if report.all_decided() {
        let job = db
            .job_get(&report.job_id)
            .await?
            .ok_or_else(|| ApprovalError::JobNotFound(report.job_id.clone()))?;
        if job.status == JobStatus::AwaitingRecommendationApproval {
            transition(db, &job, JobStatus::Complete, Actor::ApprovalGate, None).await?;
        }
    }

    info!(
        project_id = %report.project_id,
        report_id = %report.id,
        changed,
        actionable = report.actionable_recommendations().len(),
        "Recommendation approval recorded"
    );
    Ok(report)
}
