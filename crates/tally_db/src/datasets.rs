//! Dataset operations. File content lives in the `content` blob and is only
//! read by [`TallyDb::dataset_content`].

use crate::error::{DbError, Result};
use crate::{fmt_ts, parse_ts, TallyDb};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tally_ids::{DatasetId, ProjectId};
use tally_protocol::{Dataset, DatasetProfile};
use tracing::info;

const DATASET_COLUMNS: &str =
    "id, project_id, filename, size_bytes, profile_json, created_at";

impl TallyDb {
    pub async fn dataset_create(&self, dataset: &Dataset, content: &[u8]) -> Result<()> {
        let profile_json = dataset
            .profile
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        sqlx::query(
            r#"
            INSERT INTO datasets (id, project_id, filename, size_bytes, content, profile_json, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(dataset.id.as_str())
        .bind(dataset.project_id.as_str())
        .bind(&dataset.filename)
        .bind(dataset.size_bytes as i64)
        .bind(content)
        .bind(profile_json)
        .bind(fmt_ts(&dataset.created_at))
        .execute(&self.pool)
        .await?;

        info!(dataset_id = %dataset.id, project_id = %dataset.project_id, bytes = content.len(), "Dataset stored");
        Ok(())
    }

    pub async fn dataset_get(&self, id: &DatasetId) -> Result<Option<Dataset>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM datasets WHERE id = ?",
            DATASET_COLUMNS
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| row_to_dataset(&row)).transpose()
    }

    pub async fn dataset_list(&self, project_id: &ProjectId) -> Result<Vec<Dataset>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM datasets WHERE project_id = ? ORDER BY created_at DESC",
            DATASET_COLUMNS
        ))
        .bind(project_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_dataset).collect()
    }

    /// Raw uploaded bytes.
    pub async fn dataset_content(&self, id: &DatasetId) -> Result<Vec<u8>> {
        let row = sqlx::query("SELECT content FROM datasets WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found(format!("dataset {}", id)))?;
        Ok(row.try_get::<Vec<u8>, _>("content")?)
    }

    /// Store the profile. Overwrites any previous profile of the same dataset.
    pub async fn dataset_set_profile(
        &self,
        id: &DatasetId,
        profile: &DatasetProfile,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE datasets SET profile_json = ? WHERE id = ?")
            .bind(serde_json::to_string(profile)?)
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found(format!("dataset {}", id)));
        }
        Ok(())
    }
}

fn row_to_dataset(row: &SqliteRow) -> Result<Dataset> {
    let profile = row
        .try_get::<Option<String>, _>("profile_json")?
        .map(|json| serde_json::from_str::<DatasetProfile>(&json))
        .transpose()?;
    Ok(Dataset {
        id: DatasetId::from_stored(row.try_get("id")?),
        project_id: ProjectId::from_stored(row.try_get("project_id")?),
        filename: row.try_get("filename")?,
        size_bytes: row.try_get::<i64, _>("size_bytes")?.max(0) as u64,
        profile,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
    })
}
