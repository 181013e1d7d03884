//! CLI helpers against a real store, with the worker driven in-process.

use std::sync::Arc;
use std::time::Duration;
use tally::cli::dataset::upload_dataset;
use tally::cli::project::create_project;
use tally::cli::report::decide_recommendations;
use tally::cli::HelpfulError;
use tally_db::TallyDb;
use tally_ids::ProjectId;
use tally_pipeline::{transition, Actor, MemoryQueue};
use tally_protocol::{
    AdvisoryReport, Dataset, Job, JobStage, JobStatus, Project, Recommendation, ReportDraft,
};
use tally_worker::{DisabledCollaborator, DispatchConfig, Disposition, StageContext, Worker};
use tempfile::TempDir;

const ORDERS_CSV: &str = "region,amount\nNorth,5000\nSouth,4000\n";

fn write_file(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn helpful(err: anyhow::Error) -> HelpfulError {
    err.downcast::<HelpfulError>()
        .expect("command errors should carry suggestions")
}

#[tokio::test]
async fn test_upload_stores_file_and_queues_profile_job() {
    let dir = TempDir::new().unwrap();
    let db = TallyDb::open(dir.path().join("tally.db")).await.unwrap();
    let queue = MemoryQueue::new();
    let project = create_project(&db, "  Acme Bakery ", "Bread").await.unwrap();
    assert_eq!(project.name, "Acme Bakery");

    let path = write_file(&dir, "orders.csv", ORDERS_CSV);
    let (dataset, job) = upload_dataset(&db, &queue, &project.id, &path).await.unwrap();

    assert_eq!(dataset.filename, "orders.csv");
    assert_eq!(dataset.size_bytes, ORDERS_CSV.len() as u64);
    assert_eq!(db.dataset_content(&dataset.id).await.unwrap(), ORDERS_CSV.as_bytes());
    assert_eq!(job.stage, JobStage::Profile);
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.dataset_id, dataset.id);
    assert_eq!(queue.ready_len(), 1);
}

#[tokio::test]
async fn test_upload_rejects_bad_input_before_writing() {
    let dir = TempDir::new().unwrap();
    let db = TallyDb::in_memory().await.unwrap();
    let queue = MemoryQueue::new();
    let project = create_project(&db, "Acme", "Bread").await.unwrap();

    let sheet = write_file(&dir, "orders.xlsx", "not really a workbook");
    let err = helpful(upload_dataset(&db, &queue, &project.id, &sheet).await.unwrap_err());
    assert!(err.message.contains("Unsupported file type"));

    let missing = dir.path().join("nope.csv");
    let err = helpful(upload_dataset(&db, &queue, &project.id, &missing).await.unwrap_err());
    assert!(err.message.contains("File not found"));

    let csv = write_file(&dir, "orders.csv", ORDERS_CSV);
    let stranger = ProjectId::new();
    let err = helpful(upload_dataset(&db, &queue, &stranger, &csv).await.unwrap_err());
    assert!(err.message.contains("Project not found"));

    assert!(db.dataset_list(&project.id).await.unwrap().is_empty());
    assert_eq!(queue.ready_len(), 0);
}

#[tokio::test]
async fn test_blank_project_name_rejected() {
    let db = TallyDb::in_memory().await.unwrap();
    let err = helpful(create_project(&db, "   ", "Bread").await.unwrap_err());
    assert!(err.message.contains("cannot be empty"));
    assert!(db.project_list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_disabled_model_fails_kpi_generation() {
    let dir = TempDir::new().unwrap();
    let db = TallyDb::in_memory().await.unwrap();
    let queue = Arc::new(MemoryQueue::new());
    let project = create_project(&db, "Acme", "Bread").await.unwrap();
    let path = write_file(&dir, "orders.csv", ORDERS_CSV);
    let (dataset, profile_job) = upload_dataset(&db, queue.as_ref(), &project.id, &path)
        .await
        .unwrap();

    let (worker, _shutdown) = Worker::new(
        StageContext::new(db.clone(), Arc::new(DisabledCollaborator)),
        queue.clone(),
        DispatchConfig {
            poll_wait: Duration::from_millis(20),
            error_backoff: Duration::from_millis(20),
        },
    );

    // Profiling needs no model
    worker.process_next().await.unwrap().unwrap();
    let profiled = db.dataset_get(&dataset.id).await.unwrap().unwrap();
    assert_eq!(profiled.profile.unwrap().row_count, 2);

    match worker.process_next().await.unwrap().unwrap() {
        Disposition::Failed { error } => assert!(error.contains("disabled")),
        other => panic!("unexpected {other:?}"),
    }
    let kpi_job = db.job_child_of(&profile_job.id).await.unwrap().unwrap();
    assert_eq!(kpi_job.status, JobStatus::Failed);
}

/// A `generate_report` job parked at the recommendation gate.
async fn awaiting_report(
    db: &TallyDb,
    project: &Project,
    recommendations: Vec<Recommendation>,
) -> (Job, AdvisoryReport) {
    let dataset = Dataset::new(project.id.clone(), "orders.csv", ORDERS_CSV.len() as u64);
    db.dataset_create(&dataset, ORDERS_CSV.as_bytes()).await.unwrap();
    let job = Job::new(project.id.clone(), dataset.id, JobStage::GenerateReport);
    db.job_create(&job).await.unwrap();
    let job = transition(db, &job, JobStatus::Running, Actor::Worker, None)
        .await
        .unwrap();
    let draft = ReportDraft {
        recommendations,
        ..Default::default()
    };
    let report = db
        .report_insert(&AdvisoryReport::from_draft(
            project.id.clone(),
            job.id.clone(),
            draft,
        ))
        .await
        .unwrap();
    let job = transition(
        db,
        &job,
        JobStatus::AwaitingRecommendationApproval,
        Actor::Worker,
        None,
    )
    .await
    .unwrap();
    (job, report)
}

fn recommendation(title: &str, requires_approval: bool) -> Recommendation {
    Recommendation {
        title: title.to_string(),
        description: String::new(),
        requires_approval,
        approved: None,
    }
}

#[tokio::test]
async fn test_empty_confirmation_closes_ungated_report() {
    let db = TallyDb::in_memory().await.unwrap();
    let project = create_project(&db, "Acme", "Bread").await.unwrap();
    let (job, report) =
        awaiting_report(&db, &project, vec![recommendation("Track West weekly", false)]).await;

    let decided = decide_recommendations(&db, &project.id, report.id.clone(), vec![], vec![])
        .await
        .unwrap();
    assert!(decided.all_decided());
    assert_eq!(db.job_get(&job.id).await.unwrap().unwrap().status, JobStatus::Complete);
}

#[tokio::test]
async fn test_empty_confirmation_rejected_while_pending() {
    let db = TallyDb::in_memory().await.unwrap();
    let project = create_project(&db, "Acme", "Bread").await.unwrap();
    let (job, report) = awaiting_report(
        &db,
        &project,
        vec![
            recommendation("Raise prices", true),
            recommendation("Track West weekly", false),
        ],
    )
    .await;

    let err = helpful(
        decide_recommendations(&db, &project.id, report.id.clone(), vec![], vec![])
            .await
            .unwrap_err(),
    );
    assert!(err.message.contains("No decisions submitted"));
    assert_eq!(
        db.job_get(&job.id).await.unwrap().unwrap().status,
        JobStatus::AwaitingRecommendationApproval
    );

    decide_recommendations(&db, &project.id, report.id, vec![0], vec![])
        .await
        .unwrap();
    assert_eq!(db.job_get(&job.id).await.unwrap().unwrap().status, JobStatus::Complete);
}
