//! Tally Worker
//!
//! Consumes `{job_id}` messages from the job queue and runs the pipeline stage
//! each job names: profile the upload, ask the model for KPI proposals, compute
//! approved KPIs, draft the advisory report.

pub mod config;
pub mod dispatch;
pub mod ingest;
pub mod llm;
pub mod profiler;
pub mod stages;

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use tally_db::TallyDb;
use tally_pipeline::SqliteQueue;
use tracing::info;

pub use config::{load_config, load_default_config, ConfigError, TallyConfig};
pub use dispatch::{
    process_message, DispatchConfig, DispatchError, Disposition, Worker, WorkerHandle,
};
pub use llm::{
    create_collaborator, DisabledCollaborator, LlmCollaborator, LlmError, OpenAiCollaborator,
};
pub use stages::{run_stage, HandlerError, StageContext};

#[derive(clap::Args, Debug, Clone, Default)]
pub struct WorkerArgs {
    /// Config file (defaults to ~/.tally/config.toml)
    #[arg(long, env = "TALLY_CONFIG")]
    pub config: Option<PathBuf>,

    /// SQLite database path (overrides [database] path)
    #[arg(long, env = "TALLY_DB")]
    pub db: Option<PathBuf>,
}

/// Load config, open the store and queue, and run the dispatch loop until Ctrl+C.
pub async fn run_worker(args: WorkerArgs) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => load_config(path),
        None => load_default_config(),
    }
    .context("Failed to load config")?;

    let db_path = args.db.unwrap_or_else(|| config.database.resolved_path());
    let db = TallyDb::open(&db_path)
        .await
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;

    let llm = create_collaborator(&config.llm).context("Failed to create LLM collaborator")?;
    let queue = Arc::new(SqliteQueue::new(db.clone(), config.worker.visibility_timeout()));
    let ctx = StageContext::new(db, llm)
        .with_llm_timeout(config.llm.timeout())
        .with_max_breakdown_entries(config.interpreter.max_breakdown_entries);
    let dispatch = DispatchConfig {
        poll_wait: config.worker.poll_wait(),
        error_backoff: config.worker.error_backoff(),
    };

    info!(
        db = %db_path.display(),
        llm_provider = %config.llm.provider,
        llm_model = %config.llm.model,
        "Starting Tally worker"
    );

    let handle = Worker::spawn(ctx, queue, dispatch);
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Ctrl+C received, finishing current message");
    handle.shutdown().await
}
