//! Persistence layer for Tally.
//!
//! Every read and write of pipeline state goes through [`TallyDb`]. Methods
//! are grouped by domain and prefixed accordingly (`project_*`, `dataset_*`,
//! `kpi_*`, `job_*`, `report_*`, `queue_*`).
//!
//! ```rust,ignore
//! use tally_db::TallyDb;
//!
//! let db = TallyDb::open("~/.tally/tally.db").await?;
//! let job = db.job_get(&job_id).await?;
//! let moved = db.job_compare_and_set(&job.id, JobStatus::Queued, JobStatus::Running, None).await?;
//! ```

mod error;
mod schema;

mod datasets;
mod jobs;
mod kpis;
mod projects;
pub mod queue;
mod reports;

pub use error::{DbError, Result};
pub use jobs::JobFilter;
pub use kpis::KpiComputation;
pub use queue::QueueRow;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tracing::info;

#[derive(Clone)]
pub struct TallyDb {
    pool: SqlitePool,
}

impl TallyDb {
    /// Open or create a database at the given path, creating tables as needed.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let url = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let db = Self { pool };
        db.ensure_schema().await?;

        info!(path = %path.display(), "Database opened");
        Ok(db)
    }

    /// Open an existing database (fails if not exists).
    pub async fn open_existing(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DbError::not_found(format!(
                "Database not found: {}",
                path.display()
            )));
        }
        Self::open(path).await
    }

    /// Private in-memory database. One connection, kept alive for the life of
    /// the pool, so every handle sees the same data.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let db = Self { pool };
        db.ensure_schema().await?;
        Ok(db)
    }

    /// Escape hatch for ad-hoc queries. Prefer the typed methods.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

// Timestamp utilities
impl TallyDb {
    /// Current time as milliseconds since Unix epoch.
    pub fn now_millis() -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// RFC 3339 with fixed precision so stored values sort lexically.
pub(crate) fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| DbError::corrupt(format!("bad timestamp '{}': {}", raw, e)))
}

pub(crate) fn parse_opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_ts).transpose()
}

pub(crate) fn parse_enum<T: std::str::FromStr<Err = String>>(raw: &str) -> Result<T> {
    raw.parse::<T>().map_err(DbError::corrupt)
}
