//! Database schema creation. All CREATE TABLE statements live here.

use crate::error::Result;
use crate::TallyDb;
use tracing::debug;

impl TallyDb {
    pub(crate) async fn ensure_schema(&self) -> Result<()> {
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA synchronous=NORMAL")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA foreign_keys=ON")
            .execute(&self.pool)
            .await?;

        self.create_project_tables().await?;
        self.create_pipeline_tables().await?;
        self.create_queue_tables().await?;

        debug!("Database schema verified");
        Ok(())
    }

    async fn create_project_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                business_description TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        // Content is immutable once written; the profile is filled in by the
        // profile stage and may be overwritten by a re-run.
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS datasets (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL REFERENCES projects(id),
                filename TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                content BLOB NOT NULL,
                profile_json TEXT,
                created_at TEXT NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_datasets_project ON datasets(project_id, created_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn create_pipeline_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL REFERENCES projects(id),
                dataset_id TEXT NOT NULL REFERENCES datasets(id),
                stage TEXT NOT NULL,
                status TEXT NOT NULL,
                error TEXT,
                parent_job_id TEXT UNIQUE,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_jobs_project_stage ON jobs(project_id, stage, created_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS kpis (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL REFERENCES projects(id),
                round_job_id TEXT NOT NULL REFERENCES jobs(id),
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                rationale TEXT NOT NULL DEFAULT '',
                formula TEXT NOT NULL DEFAULT '',
                plan_json TEXT NOT NULL,
                target TEXT,
                unit TEXT,
                status TEXT NOT NULL,
                value_json TEXT,
                value_label TEXT,
                breakdown_json TEXT,
                computed_at TEXT,
                created_at TEXT NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_kpis_round ON kpis(round_job_id)")
            .execute(&self.pool)
            .await?;

        // First interpretation wins; a redelivered round reads it back.
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS business_models (
                round_job_id TEXT PRIMARY KEY REFERENCES jobs(id),
                project_id TEXT NOT NULL REFERENCES projects(id),
                summary TEXT NOT NULL,
                created_at TEXT NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS reports (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL REFERENCES projects(id),
                job_id TEXT NOT NULL UNIQUE REFERENCES jobs(id),
                business_model_summary TEXT NOT NULL DEFAULT '',
                risks_json TEXT NOT NULL,
                compliance_json TEXT NOT NULL,
                forecasts_json TEXT NOT NULL,
                recommendations_json TEXT NOT NULL,
                created_at TEXT NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn create_queue_tables(&self) -> Result<()> {
        // Times are epoch milliseconds; a message is deliverable once
        // visible_at <= now.
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS queue_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                payload TEXT NOT NULL,
                visible_at INTEGER NOT NULL,
                receive_count INTEGER NOT NULL DEFAULT 0,
                enqueued_at INTEGER NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_queue_visible ON queue_messages(visible_at, id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
