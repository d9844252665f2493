//! Project directory operations.

use chrono::Utc;
use sqlx::Row;
use tracing::{debug, info};

use super::records::ProjectRecord;
use super::Database;
use crate::errors::{storage, WorkflowError, WorkflowResult};

impl Database {
    /// Insert or refresh a project; `created_at` is kept from the first insert.
    pub async fn create_project(
        &self,
        project_id: &str,
        name: &str,
        description: Option<&str>,
    ) -> WorkflowResult<()> {
        sqlx::query(
            r#"
            INSERT INTO projects (project_id, name, description, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(project_id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description
            "#,
        )
        .bind(project_id)
        .bind(name)
        .bind(description)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(storage("create_project"))?;

        info!("Project '{}' ({}) is registered", project_id, name);
        Ok(())
    }

    pub async fn project_exists(&self, project_id: &str) -> WorkflowResult<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM projects WHERE project_id = ?")
            .bind(project_id)
            .fetch_one(&self.pool)
            .await
            .map_err(storage("project_exists"))?;
        Ok(count > 0)
    }

    pub async fn get_project(&self, project_id: &str) -> WorkflowResult<ProjectRecord> {
        debug!("Querying project: {}", project_id);

        let row = sqlx::query(
            "SELECT project_id, name, description, created_at FROM projects WHERE project_id = ?",
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage("get_project"))?
        .ok_or_else(|| WorkflowError::project_not_found(project_id))?;

        Ok(ProjectRecord {
            project_id: row.try_get("project_id").map_err(storage("get_project"))?,
            name: row.try_get("name").map_err(storage("get_project"))?,
            description: row.try_get("description").map_err(storage("get_project"))?,
            created_at: row.try_get("created_at").map_err(storage("get_project"))?,
        })
    }

    pub async fn list_projects(&self) -> WorkflowResult<Vec<ProjectRecord>> {
        let rows = sqlx::query(
            "SELECT project_id, name, description, created_at FROM projects ORDER BY project_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage("list_projects"))?;

        let mut projects = Vec::with_capacity(rows.len());
        for row in rows {
            projects.push(ProjectRecord {
                project_id: row.try_get("project_id").map_err(storage("list_projects"))?,
                name: row.try_get("name").map_err(storage("list_projects"))?,
                description: row.try_get("description").map_err(storage("list_projects"))?,
                created_at: row.try_get("created_at").map_err(storage("list_projects"))?,
            });
        }
        Ok(projects)
    }
}
