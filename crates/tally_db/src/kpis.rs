//! KPI operations.

use crate::error::{DbError, Result};
use crate::{fmt_ts, parse_enum, parse_opt_ts, parse_ts, TallyDb};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tally_ids::{JobId, KpiId, ProjectId};
use tally_plan::{BreakdownEntry, KpiPlan, MetricValue};
use tally_protocol::{Kpi, KpiStatus};
use tracing::info;

/// Computed values for one approved KPI.
#[derive(Debug, Clone, PartialEq)]
pub struct KpiComputation {
    pub kpi_id: KpiId,
    pub value: MetricValue,
    pub value_label: Option<String>,
    pub value_breakdown: Option<Vec<BreakdownEntry>>,
    pub computed_at: DateTime<Utc>,
}

impl TallyDb {
    /// Insert a proposal round atomically.
    pub async fn kpi_insert_batch(&self, kpis: &[Kpi]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for kpi in kpis {
            sqlx::query(
                r#"
                INSERT INTO kpis (id, project_id, round_job_id, name, description, rationale, formula,
                                  plan_json, target, unit, status, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(kpi.id.as_str())
            .bind(kpi.project_id.as_str())
            .bind(kpi.round_job_id.as_str())
            .bind(&kpi.name)
            .bind(&kpi.description)
            .bind(&kpi.rationale)
            .bind(&kpi.formula)
            .bind(serde_json::to_string(&kpi.plan)?)
            .bind(kpi.target.as_deref())
            .bind(kpi.unit.as_deref())
            .bind(kpi.status.as_str())
            .bind(fmt_ts(&kpi.created_at))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn kpi_get(&self, id: &KpiId) -> Result<Option<Kpi>> {
        let row = sqlx::query("SELECT * FROM kpis WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| row_to_kpi(&row)).transpose()
    }

    pub async fn kpi_list_for_project(&self, project_id: &ProjectId) -> Result<Vec<Kpi>> {
        let rows = sqlx::query(
            "SELECT * FROM kpis WHERE project_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(project_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_kpi).collect()
    }

    /// KPIs proposed by one `generate_kpis` job, in proposal order.
    pub async fn kpi_list_for_round(&self, round_job_id: &JobId) -> Result<Vec<Kpi>> {
        let rows = sqlx::query(
            "SELECT * FROM kpis WHERE round_job_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(round_job_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_kpi).collect()
    }

    /// Apply review decisions atomically.
    pub async fn kpi_set_statuses(&self, decisions: &[(KpiId, KpiStatus)]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (id, status) in decisions {
            let result = sqlx::query("UPDATE kpis SET status = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(id.as_str())
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() == 0 {
                tx.rollback().await?;
                return Err(DbError::not_found(format!("kpi {}", id)));
            }
        }
        tx.commit().await?;
        Ok(())
    }

    /// Write computed values for a batch of KPIs, all or nothing.
    ///
    /// Each write is guarded by `status = 'approved'`; if any KPI is no longer
    /// approved the whole batch is rolled back.
    pub async fn kpi_store_results(&self, results: &[KpiComputation]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for result in results {
            let value_json = serde_json::to_string(&result.value)?;
            let breakdown_json = result
                .value_breakdown
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            let updated = sqlx::query(
                r#"
                UPDATE kpis SET value_json = ?, value_label = ?, breakdown_json = ?, computed_at = ?
                WHERE id = ? AND status = 'approved'
                "#,
            )
            .bind(value_json)
            .bind(result.value_label.as_deref())
            .bind(breakdown_json)
            .bind(fmt_ts(&result.computed_at))
            .bind(result.kpi_id.as_str())
            .execute(&mut *tx)
            .await?;

            if updated.rows_affected() == 0 {
                tx.rollback().await?;
                return Err(DbError::invalid_state(format!(
                    "kpi {} is not approved",
                    result.kpi_id
                )));
            }
        }
        tx.commit().await?;
        info!(count = results.len(), "KPI values stored");
        Ok(())
    }

    /// Record the business-model interpretation a proposal round was built on.
    ///
    /// Keeps the first summary stored for the round and returns whichever
    /// summary is stored afterwards.
    pub async fn kpi_round_set_business_model(
        &self,
        round_job_id: &JobId,
        project_id: &ProjectId,
        summary: &str,
    ) -> Result<String> {
        sqlx::query(
            r#"
            INSERT INTO business_models (round_job_id, project_id, summary, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(round_job_id) DO NOTHING
            "#,
        )
        .bind(round_job_id.as_str())
        .bind(project_id.as_str())
        .bind(summary)
        .bind(fmt_ts(&Utc::now()))
        .execute(&self.pool)
        .await?;

        self.kpi_round_business_model(round_job_id)
            .await?
            .ok_or_else(|| DbError::not_found(format!("business model for {}", round_job_id)))
    }

    pub async fn kpi_round_business_model(&self, round_job_id: &JobId) -> Result<Option<String>> {
        let summary = sqlx::query_scalar::<_, String>(
            "SELECT summary FROM business_models WHERE round_job_id = ?",
        )
        .bind(round_job_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(summary)
    }
}

fn row_to_kpi(row: &SqliteRow) -> Result<Kpi> {
    let plan: KpiPlan = serde_json::from_str(&row.try_get::<String, _>("plan_json")?)?;
    let value = row
        .try_get::<Option<String>, _>("value_json")?
        .map(|json| serde_json::from_str::<MetricValue>(&json))
        .transpose()?;
    let value_breakdown = row
        .try_get::<Option<String>, _>("breakdown_json")?
        .map(|json| serde_json::from_str::<Vec<BreakdownEntry>>(&json))
        .transpose()?;
    let status: KpiStatus = parse_enum(&row.try_get::<String, _>("status")?)?;

    Ok(Kpi {
        id: KpiId::from_stored(row.try_get("id")?),
        project_id: ProjectId::from_stored(row.try_get("project_id")?),
        round_job_id: JobId::from_stored(row.try_get("round_job_id")?),
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        rationale: row.try_get("rationale")?,
        formula: row.try_get("formula")?,
        plan,
        target: row.try_get("target")?,
        unit: row.try_get("unit")?,
        status,
        value,
        value_label: row.try_get("value_label")?,
        value_breakdown,
        computed_at: parse_opt_ts(row.try_get("computed_at")?)?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
    })
}
