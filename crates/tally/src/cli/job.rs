//! Job commands - list, show and retry pipeline jobs

use clap::Subcommand;
use tally_db::JobFilter;
use tally_ids::{JobId, ProjectId};
use tally_pipeline::retry_job;
use tally_protocol::{Job, JobStage, JobStatus};

use super::context::CliContext;
use super::error::{retry_help, HelpfulError};
use super::output::{format_time, job_status_color, print_json, print_table_colored, truncate};

#[derive(Subcommand, Debug, Clone)]
pub enum JobAction {
    /// List jobs, newest first
    List {
        /// Only jobs of this project
        #[arg(short, long)]
        project: Option<ProjectId>,
        /// Only jobs of this stage (profile, generate_kpis, compute_kpis, generate_report)
        #[arg(long)]
        stage: Option<JobStage>,
        /// Only jobs in this status
        #[arg(long)]
        status: Option<JobStatus>,
        /// Maximum number of jobs to show
        #[arg(short = 'n', long, default_value = "50")]
        limit: u32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one job, including its error
    Show {
        /// Job ID
        id: JobId,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Retry a failed job
    Retry {
        /// Job ID of the failed job
        id: JobId,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub async fn run(action: JobAction, ctx: &CliContext) -> anyhow::Result<()> {
    let db = ctx.open_db().await?;
    match action {
        JobAction::List {
            project,
            stage,
            status,
            limit,
            json,
        } => {
            let jobs = db
                .job_list(&JobFilter {
                    project_id: project,
                    stage,
                    status,
                    limit: Some(limit),
                })
                .await?;
            if json {
                return print_json(&jobs);
            }
            if jobs.is_empty() {
                println!("No jobs found.");
                return Ok(());
            }
            print_jobs_table(&jobs);
            Ok(())
        }
        JobAction::Show { id, json } => {
            let job = db.job_get(&id).await?.ok_or_else(|| {
                HelpfulError::new(format!("Job not found: {}", id))
                    .with_suggestion("TRY: tally job list")
            })?;
            if json {
                return print_json(&job);
            }
            print_job_details(&job);
            Ok(())
        }
        JobAction::Retry { id, json } => {
            let queue = ctx.queue(&db);
            let retry = retry_job(&db, queue.as_ref(), &id)
                .await
                .map_err(|e| retry_help(&id, e))?;
            if json {
                return print_json(&retry);
            }
            println!("Queued {} job {} (retry of {})", retry.stage, retry.id, id);
            Ok(())
        }
    }
}

fn print_jobs_table(jobs: &[Job]) {
    let rows = jobs
        .iter()
        .map(|job| {
            vec![
                (job.id.to_string(), None),
                (job.stage.to_string(), None),
                (job.status.to_string(), Some(job_status_color(job.status))),
                (format_time(job.updated_at), None),
                (
                    job.error.as_deref().map(|e| truncate(e, 60)).unwrap_or_default(),
                    None,
                ),
            ]
        })
        .collect();
    print_table_colored(&["ID", "STAGE", "STATUS", "UPDATED", "ERROR"], rows);
}

fn print_job_details(job: &Job) {
    println!("Job:      {}", job.id);
    println!("Stage:    {}", job.stage);
    println!("Status:   {}", job.status);
    println!("Project:  {}", job.project_id);
    println!("Dataset:  {}", job.dataset_id);
    if let Some(parent) = &job.parent_job_id {
        println!("Parent:   {}", parent);
    }
    println!("Created:  {}", job.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("Updated:  {}", job.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));

    match job.status {
        JobStatus::Failed => {
            println!();
            println!("Error:");
            println!("  {}", job.error.as_deref().unwrap_or("(no message)"));
            println!();
            println!("  TRY: tally job retry {}", job.id);
        }
        JobStatus::AwaitingKpiApproval => {
            println!();
            println!("  Waiting for KPI review: tally kpi list --project {} --pending", job.project_id);
        }
        JobStatus::AwaitingRecommendationApproval => {
            println!();
            println!("  Waiting for recommendation review: tally report show --project {}", job.project_id);
        }
        _ => {}
    }
}
