//! Dataset commands - upload files and inspect their profiles
//!
//! Uploading stores the file and enqueues a `profile` job; the rest of the
//! pipeline follows from the worker.

use clap::Subcommand;
use comfy_table::Color;
use std::path::{Path, PathBuf};
use tally_db::TallyDb;
use tally_ids::{DatasetId, ProjectId};
use tally_pipeline::JobQueue;
use tally_protocol::{Dataset, Job, JobMessage, JobStage};
use tally_worker::ingest;
use tracing::info;

use super::context::CliContext;
use super::error::HelpfulError;
use super::output::{format_size, format_time, print_json, print_table, print_table_colored};
use super::project::require_project;

#[derive(Subcommand, Debug, Clone)]
pub enum DatasetAction {
    /// Upload a CSV file and start profiling it
    Upload {
        /// File to upload
        file: PathBuf,
        /// Project the dataset belongs to
        #[arg(short, long)]
        project: ProjectId,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List a project's datasets
    List {
        #[arg(short, long)]
        project: ProjectId,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the inferred column profile of a dataset
    Profile {
        /// Dataset ID
        id: DatasetId,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub async fn run(action: DatasetAction, ctx: &CliContext) -> anyhow::Result<()> {
    let db = ctx.open_db().await?;
    match action {
        DatasetAction::Upload {
            file,
            project,
            json,
        } => {
            let queue = ctx.queue(&db);
            let (dataset, job) = upload_dataset(&db, queue.as_ref(), &project, &file).await?;
            if json {
                return print_json(&serde_json::json!({ "dataset": dataset, "job": job }));
            }
            println!(
                "Uploaded {} ({}) as dataset {}",
                dataset.filename,
                format_size(dataset.size_bytes),
                dataset.id
            );
            println!("Profile job {} queued", job.id);
            println!();
            println!("  Run the pipeline: tally worker");
            println!("  Watch progress:   tally job list --project {}", project);
            Ok(())
        }
        DatasetAction::List { project, json } => {
            require_project(&db, &project).await?;
            let datasets = db.dataset_list(&project).await?;
            if json {
                return print_json(&datasets);
            }
            if datasets.is_empty() {
                println!("No datasets in project {}.", project);
                return Ok(());
            }
            let rows = datasets
                .iter()
                .map(|d| {
                    let profile = match &d.profile {
                        Some(p) => format!("{} rows x {} cols", p.row_count, p.column_count),
                        None => "pending".to_string(),
                    };
                    vec![
                        d.id.to_string(),
                        d.filename.clone(),
                        format_size(d.size_bytes),
                        profile,
                        format_time(d.created_at),
                    ]
                })
                .collect();
            print_table(&["ID", "FILE", "SIZE", "PROFILE", "UPLOADED"], rows);
            Ok(())
        }
        DatasetAction::Profile { id, json } => {
            let dataset = db.dataset_get(&id).await?.ok_or_else(|| {
                HelpfulError::new(format!("Dataset not found: {}", id))
                    .with_suggestion("TRY: tally dataset list --project <PROJECT_ID>")
            })?;
            let Some(profile) = dataset.profile else {
                return Err(HelpfulError::new("Profile not yet computed")
                    .with_context(format!("Dataset {} is waiting for its profile job", id))
                    .with_suggestion("TRY: Start a worker: tally worker")
                    .into());
            };
            if json {
                return print_json(&profile);
            }

            println!(
                "{}: {} rows, {} columns",
                dataset.filename, profile.row_count, profile.column_count
            );
            let rows = profile
                .columns
                .iter()
                .map(|c| {
                    let mut flags = Vec::new();
                    if c.is_date {
                        flags.push("date");
                    }
                    if c.is_id {
                        flags.push("id");
                    }
                    vec![
                        (c.name.clone(), None),
                        (c.dtype.to_string(), Some(Color::Yellow)),
                        (format!("{:.2}%", c.null_pct), None),
                        (c.unique_count.to_string(), None),
                        (flags.join(","), Some(Color::Magenta)),
                        (c.sample_values.join(", "), Some(Color::DarkGrey)),
                    ]
                })
                .collect();
            print_table_colored(
                &["COLUMN", "TYPE", "NULLS", "UNIQUE", "FLAGS", "SAMPLES"],
                rows,
            );
            Ok(())
        }
    }
}

/// Store an uploaded file and enqueue its `profile` job.
pub async fn upload_dataset(
    db: &TallyDb,
    queue: &dyn JobQueue,
    project_id: &ProjectId,
    path: &Path,
) -> anyhow::Result<(Dataset, Job)> {
    require_project(db, project_id).await?;

    if !path.exists() {
        return Err(HelpfulError::file_not_found(path).into());
    }
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    if !ingest::is_supported(&filename) {
        return Err(HelpfulError::unsupported_upload(path).into());
    }
    let content = std::fs::read(path)
        .map_err(|e| HelpfulError::cannot_read_file(path, &e.to_string()))?;

    let dataset = Dataset::new(project_id.clone(), filename, content.len() as u64);
    db.dataset_create(&dataset, &content).await?;

    let job = Job::new(project_id.clone(), dataset.id.clone(), JobStage::Profile);
    db.job_create(&job).await?;
    queue.enqueue(&JobMessage::new(job.id.clone())).await?;

    info!(
        project_id = %project_id,
        dataset_id = %dataset.id,
        job_id = %job.id,
        size_bytes = dataset.size_bytes,
        "Dataset uploaded, profile job queued"
    );
    Ok((dataset, job))
}
