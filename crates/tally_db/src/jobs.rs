//! Job operations.
//!
//! Status changes go through [`TallyDb::job_compare_and_set`] only. Callers
//! decide whether a transition is legal; this layer guarantees it is applied
//! against the status the caller saw.

use crate::error::{DbError, Result};
use crate::{fmt_ts, parse_enum, parse_ts, TallyDb};
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tally_ids::{DatasetId, JobId, ProjectId};
use tally_protocol::{Job, JobStage, JobStatus};
use tracing::debug;

/// Filter for listing jobs.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub project_id: Option<ProjectId>,
    pub stage: Option<JobStage>,
    pub status: Option<JobStatus>,
    pub limit: Option<u32>,
}

impl TallyDb {
    pub async fn job_create(&self, job: &Job) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (id, project_id, dataset_id, stage, status, error, parent_job_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.id.as_str())
        .bind(job.project_id.as_str())
        .bind(job.dataset_id.as_str())
        .bind(job.stage.as_str())
        .bind(job.status.as_str())
        .bind(job.error.as_deref())
        .bind(job.parent_job_id.as_ref().map(|id| id.as_str()))
        .bind(fmt_ts(&job.created_at))
        .bind(fmt_ts(&job.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert `job` unless its parent already has a successor, and return
    /// whichever job is stored for that parent.
    ///
    /// Replaying a stage after a crash therefore never creates a second
    /// successor.
    pub async fn job_create_successor(&self, job: &Job) -> Result<Job> {
        let parent = job
            .parent_job_id
            .as_ref()
            .ok_or_else(|| DbError::invalid_state("successor job has no parent"))?;

        let result = sqlx::query(
            r#"
            INSERT INTO jobs (id, project_id, dataset_id, stage, status, error, parent_job_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(parent_job_id) DO NOTHING
            "#,
        )
        .bind(job.id.as_str())
        .bind(job.project_id.as_str())
        .bind(job.dataset_id.as_str())
        .bind(job.stage.as_str())
        .bind(job.status.as_str())
        .bind(job.error.as_deref())
        .bind(parent.as_str())
        .bind(fmt_ts(&job.created_at))
        .bind(fmt_ts(&job.updated_at))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(parent_job_id = %parent, "Successor already exists");
        }

        self.job_child_of(parent)
            .await?
            .ok_or_else(|| DbError::not_found(format!("successor of job {}", parent)))
    }

    pub async fn job_get(&self, id: &JobId) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| row_to_job(&row)).transpose()
    }

    /// The job whose parent is `parent`, if one was created.
    pub async fn job_child_of(&self, parent: &JobId) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE parent_job_id = ?")
            .bind(parent.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| row_to_job(&row)).transpose()
    }

    /// Most recently created job of `stage` in a project.
    pub async fn job_latest_for_stage(
        &self,
        project_id: &ProjectId,
        stage: JobStage,
    ) -> Result<Option<Job>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM jobs
            WHERE project_id = ? AND stage = ?
            ORDER BY created_at DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .bind(project_id.as_str())
        .bind(stage.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| row_to_job(&row)).transpose()
    }

    pub async fn job_list(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let mut sql = String::from("SELECT * FROM jobs WHERE 1=1");
        if filter.project_id.is_some() {
            sql.push_str(" AND project_id = ?");
        }
        if filter.stage.is_some() {
            sql.push_str(" AND stage = ?");
        }
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        sql.push_str(" ORDER BY created_at DESC, rowid DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut query = sqlx::query(&sql);
        if let Some(project_id) = &filter.project_id {
            query = query.bind(project_id.as_str());
        }
        if let Some(stage) = filter.stage {
            query = query.bind(stage.as_str());
        }
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_job).collect()
    }

    /// Move a job from `from` to `to`, setting `error`. Returns false when the
    /// stored status was not `from` (nothing is written in that case).
    pub async fn job_compare_and_set(
        &self,
        id: &JobId,
        from: JobStatus,
        to: JobStatus,
        error: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET status = ?, error = ?, updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(to.as_str())
        .bind(error)
        .bind(fmt_ts(&Utc::now()))
        .bind(id.as_str())
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

fn row_to_job(row: &SqliteRow) -> Result<Job> {
    Ok(Job {
        id: JobId::from_stored(row.try_get("id")?),
        project_id: ProjectId::from_stored(row.try_get("project_id")?),
        dataset_id: DatasetId::from_stored(row.try_get("dataset_id")?),
        stage: parse_enum(&row.try_get::<String, _>("stage")?)?,
        status: parse_enum(&row.try_get::<String, _>("status")?)?,
        error: row.try_get("error")?,
        parent_job_id: row
            .try_get::<Option<String>, _>("parent_job_id")?
            .map(JobId::from_stored),
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_ts(&row.try_get::<String, _>("updated_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_protocol::{Dataset, Project};

    async fn setup() -> (TallyDb, Job) {
        let db = TallyDb::in_memory().await.unwrap();
        let project = Project::new("Acme", "");
        db.project_create(&project).await.unwrap();
        let dataset = Dataset::new(project.id.clone(), "orders.csv", 1);
        db.dataset_create(&dataset, b"x").await.unwrap();
        let job = Job::new(project.id, dataset.id, JobStage::Profile);
        db.job_create(&job).await.unwrap();
        (db, job)
    }

    #[tokio::test]
    async fn test_compare_and_set_only_from_expected_status() {
        let (db, job) = setup().await;

        assert!(db
            .job_compare_and_set(&job.id, JobStatus::Queued, JobStatus::Running, None)
            .await
            .unwrap());
        // Second claim of the same delivery loses.
        assert!(!db
            .job_compare_and_set(&job.id, JobStatus::Queued, JobStatus::Running, None)
            .await
            .unwrap());

        assert!(db
            .job_compare_and_set(&job.id, JobStatus::Running, JobStatus::Failed, Some("boom"))
            .await
            .unwrap());
        let stored = db.job_get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_successor_is_created_once() {
        let (db, job) = setup().await;

        let first = db
            .job_create_successor(&Job::successor_of(&job, JobStage::GenerateKpis))
            .await
            .unwrap();
        let second = db
            .job_create_successor(&Job::successor_of(&job, JobStage::GenerateKpis))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        let all = db.job_list(&JobFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_latest_for_stage_and_filters() {
        let (db, job) = setup().await;
        let kpis = db
            .job_create_successor(&Job::successor_of(&job, JobStage::GenerateKpis))
            .await
            .unwrap();

        let latest = db
            .job_latest_for_stage(&job.project_id, JobStage::GenerateKpis)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, kpis.id);

        let queued = db
            .job_list(&JobFilter {
                project_id: Some(job.project_id.clone()),
                stage: Some(JobStage::Profile),
                status: Some(JobStatus::Queued),
                limit: Some(10),
            })
            .await
            .unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].id, job.id);
    }
}
