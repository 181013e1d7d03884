//! Stage handlers.
//!
//! Each handler does the work of one pipeline stage for one job and persists
//! its outputs. Handlers are safe to re-run for the same job: a redelivered
//! job reuses what an earlier attempt already stored.
//!
//! State transitions and successor jobs are the dispatch loop's business.

use std::sync::Arc;
use std::time::Duration;
use tally_db::{DbError, KpiComputation, TallyDb};
use tally_ids::{DatasetId, JobId, ProjectId};
use tally_pipeline::lineage::nearest_of_stage;
use tally_plan::{execute, validate, DatasetSource, ExecutionOptions, ValidationError};
use tally_protocol::{AdvisoryReport, Dataset, DatasetProfile, Job, JobStage, Kpi, KpiStatus};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::ingest::{self, IngestError};
use crate::llm::{LlmCollaborator, LlmError};
use crate::profiler::profile_table;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Dataset not found: {0}")]
    DatasetNotFound(DatasetId),

    #[error("Project not found: {0}")]
    ProjectNotFound(ProjectId),

    #[error("Dataset {0} has not been profiled")]
    NotProfiled(DatasetId),

    #[error("Failed to read dataset: {0}")]
    Ingest(#[from] IngestError),

    #[error("No KPI proposal round found for job {0}")]
    NoProposalRound(JobId),

    #[error("No valid KPI proposals ({dropped} dropped)")]
    NoValidProposals { dropped: usize },

    #[error("No approved KPIs in round {0}")]
    NoApprovedKpis(JobId),

    #[error("KPI '{kpi}' has an invalid plan: {source}")]
    InvalidPlan {
        kpi: String,
        #[source]
        source: ValidationError,
    },

    #[error("LLM call failed: {0}")]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Db(#[from] DbError),
}

/// Everything a handler needs besides the job itself.
#[derive(Clone)]
pub struct StageContext {
    pub db: TallyDb,
    pub llm: Arc<dyn LlmCollaborator>,
    pub llm_timeout: Duration,
    pub max_breakdown_entries: usize,
}

impl StageContext {
    pub fn new(db: TallyDb, llm: Arc<dyn LlmCollaborator>) -> Self {
        Self {
            db,
            llm,
            llm_timeout: Duration::from_secs(tally_protocol::defaults::DEFAULT_LLM_TIMEOUT_SECS),
            max_breakdown_entries: tally_plan::DEFAULT_MAX_BREAKDOWN_ENTRIES,
        }
    }

    pub fn with_llm_timeout(mut self, timeout: Duration) -> Self {
        self.llm_timeout = timeout;
        self
    }

    pub fn with_max_breakdown_entries(mut self, cap: usize) -> Self {
        self.max_breakdown_entries = cap;
        self
    }

    /// Bound a model call by the configured timeout.
    async fn bounded<T, F>(&self, call: F) -> Result<T, HandlerError>
    where
        F: std::future::Future<Output = Result<T, LlmError>>,
    {
        match tokio::time::timeout(self.llm_timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(LlmError::Timeout(self.llm_timeout).into()),
        }
    }
}

/// Run the handler for `job.stage`.
pub async fn run_stage(ctx: &StageContext, job: &Job) -> Result<(), HandlerError> {
    match job.stage {
        JobStage::Profile => profile(ctx, job).await,
        JobStage::GenerateKpis => generate_kpis(ctx, job).await,
        JobStage::ComputeKpis => compute_kpis(ctx, job).await,
        JobStage::GenerateReport => generate_report(ctx, job).await,
    }
}

async fn load_dataset(ctx: &StageContext, id: &DatasetId) -> Result<Dataset, HandlerError> {
    ctx.db
        .dataset_get(id)
        .await?
        .ok_or_else(|| HandlerError::DatasetNotFound(id.clone()))
}

async fn business_description(ctx: &StageContext, job: &Job) -> Result<String, HandlerError> {
    let project = ctx
        .db
        .project_get(&job.project_id)
        .await?
        .ok_or_else(|| HandlerError::ProjectNotFound(job.project_id.clone()))?;
    Ok(project.business_description)
}

fn require_profile(dataset: Dataset) -> Result<DatasetProfile, HandlerError> {
    let id = dataset.id;
    dataset.profile.ok_or(HandlerError::NotProfiled(id))
}

/// The `generate_kpis` job whose proposals this job works on.
async fn proposal_round(ctx: &StageContext, job: &Job) -> Result<Job, HandlerError> {
    nearest_of_stage(&ctx.db, job, JobStage::GenerateKpis)
        .await?
        .ok_or_else(|| HandlerError::NoProposalRound(job.id.clone()))
}

async fn profile(ctx: &StageContext, job: &Job) -> Result<(), HandlerError> {
    let dataset = load_dataset(ctx, &job.dataset_id).await?;
    let content = ctx.db.dataset_content(&dataset.id).await?;
    let raw = ingest::parse_upload(&dataset.filename, &content)?;
    let profile = profile_table(&raw);

    ctx.db.dataset_set_profile(&dataset.id, &profile).await?;
    info!(
        job_id = %job.id,
        dataset_id = %dataset.id,
        rows = profile.row_count,
        columns = profile.column_count,
        date_columns = profile.date_columns.len(),
        join_keys = profile.potential_join_keys.len(),
        "Dataset profiled"
    );
    Ok(())
}

async fn generate_kpis(ctx: &StageContext, job: &Job) -> Result<(), HandlerError> {
    let existing = ctx.db.kpi_list_for_round(&job.id).await?;
    if !existing.is_empty() {
        debug!(job_id = %job.id, kpis = existing.len(), "Reusing stored KPI proposals");
        return Ok(());
    }

    let description = business_description(ctx, job).await?;
    let profile = require_profile(load_dataset(ctx, &job.dataset_id).await?)?;
    let schema = profile.schema();
    let business_model = interpret_business_model(ctx, job, &profile, &description).await?;

    let proposals = ctx
        .bounded(ctx.llm.propose_kpis(&profile, &description, &business_model))
        .await?;
    let offered = proposals.len();

    let mut kpis = Vec::with_capacity(offered);
    for proposal in proposals {
        match validate(&proposal.plan, &schema) {
            Ok(_) => kpis.push(Kpi::from_proposal(
                job.project_id.clone(),
                job.id.clone(),
                proposal,
            )),
            Err(e) => warn!(
                job_id = %job.id,
                kpi = %proposal.name,
                error = %e,
                "Dropping invalid KPI proposal"
            ),
        }
    }

    if kpis.is_empty() {
        return Err(HandlerError::NoValidProposals { dropped: offered });
    }

    ctx.db.kpi_insert_batch(&kpis).await?;
    info!(
        job_id = %job.id,
        proposed = kpis.len(),
        dropped = offered - kpis.len(),
        "KPI proposals stored"
    );
    Ok(())
}

/// The round's business-model summary, asking the model only if none is stored.
async fn interpret_business_model(
    ctx: &StageContext,
    job: &Job,
    profile: &DatasetProfile,
    description: &str,
) -> Result<String, HandlerError> {
    if let Some(summary) = ctx.db.kpi_round_business_model(&job.id).await? {
        debug!(job_id = %job.id, "Reusing stored business model");
        return Ok(summary);
    }

    let summary = ctx
        .bounded(ctx.llm.interpret_business_model(profile, description))
        .await?;
    let summary = ctx
        .db
        .kpi_round_set_business_model(&job.id, &job.project_id, &summary)
        .await?;
    info!(job_id = %job.id, chars = summary.len(), "Business model interpreted");
    Ok(summary)
}

async fn compute_kpis(ctx: &StageContext, job: &Job) -> Result<(), HandlerError> {
    let round = proposal_round(ctx, job).await?;
    let approved: Vec<Kpi> = ctx
        .db
        .kpi_list_for_round(&round.id)
        .await?
        .into_iter()
        .filter(|kpi| kpi.status == KpiStatus::Approved)
        .collect();
    if approved.is_empty() {
        return Err(HandlerError::NoApprovedKpis(round.id));
    }

    let dataset = load_dataset(ctx, &job.dataset_id).await?;
    let content = ctx.db.dataset_content(&dataset.id).await?;
    let filename = dataset.filename.clone();
    let schema = require_profile(dataset)?.schema();
    let table = ingest::parse_upload(&filename, &content)?.into_table(schema)?;

    // The job's creation time anchors time windows, so a redelivery computes
    // the same values.
    let options = ExecutionOptions::new(job.created_at)
        .with_max_breakdown_entries(ctx.max_breakdown_entries);
    let computed_at = chrono::Utc::now();

    let mut results = Vec::with_capacity(approved.len());
    for kpi in &approved {
        let plan = validate(&kpi.plan, table.schema()).map_err(
            |source| HandlerError::InvalidPlan {
                kpi: kpi.name.clone(),
                source,
            },
        )?;
        let result = execute(&plan, &table, &options);
        debug!(job_id = %job.id, kpi = %kpi.name, value = %result.value, "KPI computed");
        results.push(KpiComputation {
            kpi_id: kpi.id.clone(),
            value: result.value,
            value_label: result.value_label,
            value_breakdown: result.value_breakdown,
            computed_at,
        });
    }

    ctx.db.kpi_store_results(&results).await?;
    info!(job_id = %job.id, round_job_id = %round.id, computed = results.len(), "KPIs computed");
    Ok(())
}

async fn generate_report(ctx: &StageContext, job: &Job) -> Result<(), HandlerError> {
    if let Some(report) = ctx.db.report_for_job(&job.id).await? {
        debug!(job_id = %job.id, report_id = %report.id, "Reusing stored report");
        return Ok(());
    }

    let round = proposal_round(ctx, job).await?;
    let summaries: Vec<_> = ctx
        .db
        .kpi_list_for_round(&round.id)
        .await?
        .iter()
        .filter(|kpi| kpi.status == KpiStatus::Approved && kpi.is_computed())
        .map(Kpi::summary)
        .collect();
    if summaries.is_empty() {
        return Err(HandlerError::NoApprovedKpis(round.id));
    }

    let description = business_description(ctx, job).await?;
    let business_model = ctx
        .db
        .kpi_round_business_model(&round.id)
        .await?
        .unwrap_or_default();
    let mut draft = ctx
        .bounded(ctx.llm.generate_report(&summaries, &description, &business_model))
        .await?;
    if draft.business_model_summary.trim().is_empty() {
        draft.business_model_summary = business_model;
    }

    let report = AdvisoryReport::from_draft(job.project_id.clone(), job.id.clone(), draft);
    let report = ctx.db.report_insert(&report).await?;
    info!(
        job_id = %job.id,
        report_id = %report.id,
        recommendations = report.recommendations.len(),
        pending = report.recommendations.iter().filter(|r| r.is_pending()).count(),
        "Advisory report stored"
    );
    Ok(())
}
