//! Advisory report operations.

use crate::error::{DbError, Result};
use crate::{fmt_ts, parse_ts, TallyDb};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tally_ids::{JobId, ProjectId, ReportId};
use tally_protocol::{AdvisoryReport, Recommendation};

impl TallyDb {
    /// Insert a report unless its job already has one; returns the stored report.
    pub async fn report_insert(&self, report: &AdvisoryReport) -> Result<AdvisoryReport> {
        sqlx::query(
            r#"
            INSERT INTO reports (id, project_id, job_id, business_model_summary, risks_json,
                                 compliance_json, forecasts_json, recommendations_json, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(job_id) DO NOTHING
            "#,
        )
        .bind(report.id.as_str())
        .bind(report.project_id.as_str())
        .bind(report.job_id.as_str())
        .bind(&report.business_model_summary)
        .bind(serde_json::to_string(&report.risks)?)
        .bind(serde_json::to_string(&report.compliance_notes)?)
        .bind(serde_json::to_string(&report.forecasts)?)
        .bind(serde_json::to_string(&report.recommendations)?)
        .bind(fmt_ts(&report.created_at))
        .execute(&self.pool)
        .await?;

        self.report_for_job(&report.job_id)
            .await?
            .ok_or_else(|| DbError::not_found(format!("report for job {}", report.job_id)))
    }

    pub async fn report_get(&self, id: &ReportId) -> Result<Option<AdvisoryReport>> {
        let row = sqlx::query("SELECT * FROM reports WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| row_to_report(&row)).transpose()
    }

    pub async fn report_for_job(&self, job_id: &JobId) -> Result<Option<AdvisoryReport>> {
        let row = sqlx::query("SELECT * FROM reports WHERE job_id = ?")
            .bind(job_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| row_to_report(&row)).transpose()
    }

    pub async fn report_latest_for_project(
        &self,
        project_id: &ProjectId,
    ) -> Result<Option<AdvisoryReport>> {
        let row = sqlx::query(
            "SELECT * FROM reports WHERE project_id = ? ORDER BY created_at DESC, rowid DESC LIMIT 1",
        )
        .bind(project_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| row_to_report(&row)).transpose()
    }

    pub async fn report_set_recommendations(
        &self,
        id: &ReportId,
        recommendations: &[Recommendation],
    ) -> Result<()> {
        let result = sqlx::query("UPDATE reports SET recommendations_json = ? WHERE id = ?")
            .bind(serde_json::to_string(recommendations)?)
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found(format!("report {}", id)));
        }
        Ok(())
    }
}

fn row_to_report(row: &SqliteRow) -> Result<AdvisoryReport> {
    Ok(AdvisoryReport {
        id: ReportId::from_stored(row.try_get("id")?),
        project_id: ProjectId::from_stored(row.try_get("project_id")?),
        job_id: JobId::from_stored(row.try_get("job_id")?),
        business_model_summary: row.try_get("business_model_summary")?,
        risks: serde_json::from_str(&row.try_get::<String, _>("risks_json")?)?,
        compliance_notes: serde_json::from_str(&row.try_get::<String, _>("compliance_json")?)?,
        forecasts: serde_json::from_str(&row.try_get::<String, _>("forecasts_json")?)?,
        recommendations: serde_json::from_str(
            &row.try_get::<String, _>("recommendations_json")?,
        )?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_protocol::{Dataset, Job, JobStage, Project, ReportDraft, RiskSignal};

    #[tokio::test]
    async fn test_report_insert_is_idempotent_per_job() {
        let db = TallyDb::in_memory().await.unwrap();
        let project = Project::new("Acme", "");
        db.project_create(&project).await.unwrap();
        let dataset = Dataset::new(project.id.clone(), "orders.csv", 1);
        db.dataset_create(&dataset, b"x").await.unwrap();
        let job = Job::new(project.id.clone(), dataset.id, JobStage::GenerateReport);
        db.job_create(&job).await.unwrap();

        let draft = ReportDraft {
            business_model_summary: "Bakery".into(),
            risks: vec![RiskSignal {
                title: "Churn".into(),
                description: String::new(),
                severity: "high".into(),
            }],
            recommendations: vec![Recommendation {
                title: "Raise prices".into(),
                description: String::new(),
                requires_approval: true,
                approved: None,
            }],
            ..Default::default()
        };
        let first = db
            .report_insert(&AdvisoryReport::from_draft(
                project.id.clone(),
                job.id.clone(),
                draft.clone(),
            ))
            .await
            .unwrap();
        let second = db
            .report_insert(&AdvisoryReport::from_draft(project.id.clone(), job.id.clone(), draft))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);

        let mut recs = first.recommendations.clone();
        recs[0].approved = Some(true);
        db.report_set_recommendations(&first.id, &recs).await.unwrap();

        let latest = db.report_latest_for_project(&project.id).await.unwrap().unwrap();
        assert_eq!(latest.recommendations[0].approved, Some(true));
        assert_eq!(latest.risks[0].severity, "high");
    }
}
