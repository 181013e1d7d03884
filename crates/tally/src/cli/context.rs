//! Shared state for one CLI invocation: resolved config and database path.

use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tally_db::TallyDb;
use tally_pipeline::{JobQueue, SqliteQueue};
use tally_worker::{load_config, load_default_config, TallyConfig};

use super::error::HelpfulError;

#[derive(Debug, Clone)]
pub struct CliContext {
    pub config: TallyConfig,
    pub db_path: PathBuf,
}

impl CliContext {
    /// Load the config file, then apply the `--db` override.
    pub fn load(config_path: Option<&Path>, db_override: Option<PathBuf>) -> anyhow::Result<Self> {
        let config = match config_path {
            Some(path) => load_config(path),
            None => load_default_config(),
        }
        .context("Failed to load config")?;
        Ok(Self::from_config(config, db_override))
    }

    pub fn from_config(config: TallyConfig, db_override: Option<PathBuf>) -> Self {
        let db_path = db_override.unwrap_or_else(|| config.database.resolved_path());
        Self { config, db_path }
    }

    /// Open (and create on first use) the local store.
    pub async fn open_db(&self) -> anyhow::Result<TallyDb> {
        TallyDb::open(&self.db_path).await.map_err(|e| {
            HelpfulError::new("Failed to open database")
                .with_context(format!("Database: {}", self.db_path.display()))
                .with_suggestion(format!("Error: {}", e))
                .with_suggestion("TRY: Check file permissions")
                .with_suggestion("TRY: Point at another file with --db or TALLY_DB")
                .into()
        })
    }

    /// The queue the worker consumes, backed by the same store.
    pub fn queue(&self, db: &TallyDb) -> Arc<dyn JobQueue> {
        Arc::new(SqliteQueue::new(
            db.clone(),
            self.config.worker.visibility_timeout(),
        ))
    }
}
