//! Project operations.

use crate::error::Result;
use crate::{fmt_ts, parse_ts, TallyDb};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tally_ids::ProjectId;
use tally_protocol::Project;

impl TallyDb {
    pub async fn project_create(&self, project: &Project) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO projects (id, name, business_description, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(project.id.as_str())
        .bind(&project.name)
        .bind(&project.business_description)
        .bind(fmt_ts(&project.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn project_get(&self, id: &ProjectId) -> Result<Option<Project>> {
        let row = sqlx::query("SELECT * FROM projects WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| row_to_project(&row)).transpose()
    }

    pub async fn project_list(&self) -> Result<Vec<Project>> {
        let rows = sqlx::query("SELECT * FROM projects ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_project).collect()
    }
}

fn row_to_project(row: &SqliteRow) -> Result<Project> {
    Ok(Project {
        id: ProjectId::from_stored(row.try_get("id")?),
        name: row.try_get("name")?,
        business_description: row.try_get("business_description")?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_project_roundtrip() {
        let db = TallyDb::in_memory().await.unwrap();
        let project = Project::new("Acme", "Subscription bakery");
        db.project_create(&project).await.unwrap();

        let loaded = db.project_get(&project.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "Acme");
        assert_eq!(loaded.business_description, "Subscription bakery");
        assert_eq!(db.project_list().await.unwrap().len(), 1);
        assert!(db.project_get(&ProjectId::new()).await.unwrap().is_none());
    }
}
