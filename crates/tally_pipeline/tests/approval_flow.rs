//! Approval gates and state machine against an in-memory store.

use std::time::Duration;
use tally_db::TallyDb;
use tally_pipeline::lineage::nearest_of_stage;
use tally_pipeline::{
    record_kpi_approval, record_recommendation_approval, retry_job, transition, Actor,
    ApprovalError, JobQueue, KpiApprovalRequest, MemoryQueue, RecommendationApprovalRequest,
    RetryError, TransitionError,
};
use tally_plan::KpiPlan;
use tally_protocol::{
    AdvisoryReport, Dataset, Job, JobStage, JobStatus, Kpi, KpiProposal, KpiStatus, Project,
    Recommendation, ReportDraft,
};

struct Fixture {
    db: TallyDb,
    queue: MemoryQueue,
    project: Project,
    dataset: Dataset,
}

impl Fixture {
    async fn new() -> Self {
        let db = TallyDb::in_memory().await.unwrap();
        let project = Project::new("Acme Bakery", "Subscription bread delivery");
        db.project_create(&project).await.unwrap();
        let dataset = Dataset::new(project.id.clone(), "orders.csv", 3);
        db.dataset_create(&dataset, b"a,b").await.unwrap();
        Self {
            db,
            queue: MemoryQueue::new(),
            project,
            dataset,
        }
    }

    /// Create a job of `stage` and drive it to `running`.
    async fn running_job(&self, stage: JobStage) -> Job {
        let job = Job::new(self.project.id.clone(), self.dataset.id.clone(), stage);
        self.db.job_create(&job).await.unwrap();
        transition(&self.db, &job, JobStatus::Running, Actor::Worker, None)
            .await
            .unwrap()
    }

    /// A `generate_kpis` job awaiting approval with the given proposals.
    async fn kpi_round(&self, names: &[&str]) -> (Job, Vec<Kpi>) {
        let job = self.running_job(JobStage::GenerateKpis).await;
        let kpis: Vec<Kpi> = names
            .iter()
            .map(|name| {
                Kpi::from_proposal(
                    self.project.id.clone(),
                    job.id.clone(),
                    KpiProposal {
                        name: name.to_string(),
                        description: String::new(),
                        rationale: String::new(),
                        formula: "count(*)".into(),
                        plan: KpiPlan::count(),
                        target: None,
                        unit: None,
                    },
                )
            })
            .collect();
        self.db.kpi_insert_batch(&kpis).await.unwrap();
        let job = transition(
            &self.db,
            &job,
            JobStatus::AwaitingKpiApproval,
            Actor::Worker,
            None,
        )
        .await
        .unwrap();
        (job, kpis)
    }
}

#[tokio::test]
async fn test_partial_kpi_approval_leaves_omitted_proposed() {
    let fx = Fixture::new().await;
    let (gate, kpis) = fx.kpi_round(&["kpi1", "kpi2", "kpi3"]).await;

    let request = KpiApprovalRequest::new(fx.project.id.clone())
        .approve(kpis[0].id.clone())
        .reject(kpis[1].id.clone());
    let outcome = record_kpi_approval(&fx.db, &fx.queue, &request).await.unwrap();

    let status_of = |name: &str| {
        outcome
            .kpis
            .iter()
            .find(|k| k.name == name)
            .map(|k| k.status)
            .unwrap()
    };
    assert_eq!(status_of("kpi1"), KpiStatus::Approved);
    assert_eq!(status_of("kpi2"), KpiStatus::Rejected);
    assert_eq!(status_of("kpi3"), KpiStatus::Proposed);

    assert_eq!(outcome.gate_job.status, JobStatus::Complete);
    let compute = outcome.compute_job.unwrap();
    assert_eq!(compute.stage, JobStage::ComputeKpis);
    assert_eq!(compute.parent_job_id, Some(gate.id.clone()));

    let delivery = fx
        .queue
        .receive(Duration::from_millis(10))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivery.message.job_id, compute.id);
}

#[tokio::test]
async fn test_non_approved_status_counts_as_rejection() {
    let fx = Fixture::new().await;
    let (_, kpis) = fx.kpi_round(&["only"]).await;

    let request = KpiApprovalRequest::new(fx.project.id.clone())
        .with_decision(kpis[0].id.clone(), KpiStatus::Proposed);
    let outcome = record_kpi_approval(&fx.db, &fx.queue, &request).await.unwrap();

    assert_eq!(outcome.kpis[0].status, KpiStatus::Rejected);
    assert!(outcome.compute_job.is_none());
    assert_eq!(fx.queue.ready_len(), 0);
}

#[tokio::test]
async fn test_unknown_kpi_fails_before_any_write() {
    let fx = Fixture::new().await;
    let (gate, kpis) = fx.kpi_round(&["kpi1"]).await;

    let request = KpiApprovalRequest::new(fx.project.id.clone())
        .approve(kpis[0].id.clone())
        .approve(tally_ids::KpiId::new());
    let err = record_kpi_approval(&fx.db, &fx.queue, &request)
        .await
        .unwrap_err();
    assert!(matches!(err, ApprovalError::UnknownKpi(_)));

    let kpi = fx.db.kpi_get(&kpis[0].id).await.unwrap().unwrap();
    assert_eq!(kpi.status, KpiStatus::Proposed);
    let gate = fx.db.job_get(&gate.id).await.unwrap().unwrap();
    assert_eq!(gate.status, JobStatus::AwaitingKpiApproval);
}

#[tokio::test]
async fn test_kpi_from_previous_round_is_rejected() {
    let fx = Fixture::new().await;
    let (first_gate, old) = fx.kpi_round(&["old"]).await;
    record_kpi_approval(
        &fx.db,
        &fx.queue,
        &KpiApprovalRequest::new(fx.project.id.clone()).reject(old[0].id.clone()),
    )
    .await
    .unwrap();
    assert_eq!(
        fx.db.job_get(&first_gate.id).await.unwrap().unwrap().status,
        JobStatus::Complete
    );

    let (_, fresh) = fx.kpi_round(&["fresh"]).await;
    let request = KpiApprovalRequest::new(fx.project.id.clone())
        .approve(fresh[0].id.clone())
        .approve(old[0].id.clone());
    let err = record_kpi_approval(&fx.db, &fx.queue, &request)
        .await
        .unwrap_err();
    assert!(matches!(err, ApprovalError::KpiNotInRound { .. }));
}

#[tokio::test]
async fn test_closed_gate_rejects_second_approval() {
    let fx = Fixture::new().await;
    let (_, kpis) = fx.kpi_round(&["kpi1"]).await;
    let request = KpiApprovalRequest::new(fx.project.id.clone()).approve(kpis[0].id.clone());

    record_kpi_approval(&fx.db, &fx.queue, &request).await.unwrap();
    let err = record_kpi_approval(&fx.db, &fx.queue, &request)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ApprovalError::GateNotOpen {
            status: JobStatus::Complete,
            ..
        }
    ));
}

#[tokio::test]
async fn test_recommendation_gate_completes_when_all_decided() {
    let fx = Fixture::new().await;
    let job = fx.running_job(JobStage::GenerateReport).await;
    let draft = ReportDraft {
        business_model_summary: "Recurring revenue".into(),
        recommendations: vec![
            Recommendation {
                title: "Expand to RegionC".into(),
                description: String::new(),
                requires_approval: true,
                approved: None,
            },
            Recommendation {
                title: "Monitor churn".into(),
                description: String::new(),
                requires_approval: false,
                approved: None,
            },
            Recommendation {
                title: "Raise prices".into(),
                description: String::new(),
                requires_approval: true,
                approved: None,
            },
        ],
        ..Default::default()
    };
    let report = fx
        .db
        .report_insert(&AdvisoryReport::from_draft(
            fx.project.id.clone(),
            job.id.clone(),
            draft,
        ))
        .await
        .unwrap();
    let job = transition(
        &fx.db,
        &job,
        JobStatus::AwaitingRecommendationApproval,
        Actor::Worker,
        None,
    )
    .await
    .unwrap();

    // Partial: index 2 omitted, index 1 needs no approval, index 9 does not exist.
    let partial = RecommendationApprovalRequest::new(fx.project.id.clone(), report.id.clone())
        .decide(0, true)
        .decide(1, false)
        .decide(9, true);
    let updated = record_recommendation_approval(&fx.db, &partial).await.unwrap();
    assert_eq!(updated.recommendations[0].approved, Some(true));
    assert_eq!(updated.recommendations[1].approved, None);
    assert_eq!(updated.recommendations[2].approved, None);
    assert_eq!(
        fx.db.job_get(&job.id).await.unwrap().unwrap().status,
        JobStatus::AwaitingRecommendationApproval
    );

    let rest = RecommendationApprovalRequest::new(fx.project.id.clone(), report.id.clone())
        .decide(2, false);
    let done = record_recommendation_approval(&fx.db, &rest).await.unwrap();
    let actionable: Vec<_> = done
        .actionable_recommendations()
        .iter()
        .map(|r| r.title.clone())
        .collect();
    assert_eq!(actionable, vec!["Expand to RegionC", "Monitor churn"]);
    assert_eq!(
        fx.db.job_get(&job.id).await.unwrap().unwrap().status,
        JobStatus::Complete
    );
}

#[tokio::test]
async fn test_empty_request_completes_report_without_gated_items() {
    let fx = Fixture::new().await;
    let job = fx.running_job(JobStage::GenerateReport).await;
    let draft = ReportDraft {
        recommendations: vec![Recommendation {
            title: "Monitor churn".into(),
            description: String::new(),
            requires_approval: false,
            approved: None,
        }],
        ..Default::default()
    };
    let report = fx
        .db
        .report_insert(&AdvisoryReport::from_draft(
            fx.project.id.clone(),
            job.id.clone(),
            draft,
        ))
        .await
        .unwrap();
    let job = transition(
        &fx.db,
        &job,
        JobStatus::AwaitingRecommendationApproval,
        Actor::Worker,
        None,
    )
    .await
    .unwrap();

    let confirm = RecommendationApprovalRequest::new(fx.project.id.clone(), report.id.clone());
    let done = record_recommendation_approval(&fx.db, &confirm).await.unwrap();
    assert_eq!(done.actionable_recommendations().len(), 1);
    assert_eq!(
        fx.db.job_get(&job.id).await.unwrap().unwrap().status,
        JobStatus::Complete
    );
}

#[tokio::test]
async fn test_retry_only_for_failed_jobs() {
    let fx = Fixture::new().await;
    let job = fx.running_job(JobStage::ComputeKpis).await;

    let err = retry_job(&fx.db, &fx.queue, &job.id).await.unwrap_err();
    assert!(matches!(err, RetryError::NotFailed { .. }));

    let failed = transition(
        &fx.db,
        &job,
        JobStatus::Failed,
        Actor::Worker,
        Some("llm timeout"),
    )
    .await
    .unwrap();
    let retry = retry_job(&fx.db, &fx.queue, &failed.id).await.unwrap();
    assert_eq!(retry.stage, JobStage::ComputeKpis);
    assert_eq!(retry.status, JobStatus::Queued);
    assert_eq!(retry.parent_job_id, Some(failed.id.clone()));

    let again = retry_job(&fx.db, &fx.queue, &failed.id).await.unwrap();
    assert_eq!(again.id, retry.id);
}

#[tokio::test]
async fn test_retry_lineage_reaches_proposal_round() {
    let fx = Fixture::new().await;
    let (gate, kpis) = fx.kpi_round(&["kpi1"]).await;
    let outcome = record_kpi_approval(
        &fx.db,
        &fx.queue,
        &KpiApprovalRequest::new(fx.project.id.clone()).approve(kpis[0].id.clone()),
    )
    .await
    .unwrap();
    let compute = outcome.compute_job.unwrap();
    let compute = transition(&fx.db, &compute, JobStatus::Running, Actor::Worker, None)
        .await
        .unwrap();
    let failed = transition(&fx.db, &compute, JobStatus::Failed, Actor::Worker, Some("x"))
        .await
        .unwrap();
    let retry = retry_job(&fx.db, &fx.queue, &failed.id).await.unwrap();

    let round = nearest_of_stage(&fx.db, &retry, JobStage::GenerateKpis)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(round.id, gate.id);
}

#[tokio::test]
async fn test_stale_claim_is_rejected_and_duplicate_running_is_noop() {
    let fx = Fixture::new().await;
    let queued = Job::new(
        fx.project.id.clone(),
        fx.dataset.id.clone(),
        JobStage::Profile,
    );
    fx.db.job_create(&queued).await.unwrap();

    let running = transition(&fx.db, &queued, JobStatus::Running, Actor::Worker, None)
        .await
        .unwrap();
    // A duplicate delivery that read the job while it was still queued.
    let again = transition(&fx.db, &queued, JobStatus::Running, Actor::Worker, None)
        .await
        .unwrap();
    assert_eq!(again.status, JobStatus::Running);

    let done = transition(&fx.db, &running, JobStatus::Complete, Actor::Worker, None)
        .await
        .unwrap();
    assert_eq!(done.status, JobStatus::Complete);

    // The stale snapshot cannot move a completed job.
    let err = transition(&fx.db, &running, JobStatus::Failed, Actor::Worker, Some("late"))
        .await
        .unwrap_err();
    assert!(matches!(err, TransitionError::Invalid(_)));
    let stored = fx.db.job_get(&queued.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Complete);
    assert!(stored.error.is_none());
}
