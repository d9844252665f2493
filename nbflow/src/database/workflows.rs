//! Workflow definition store.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::records::{TaskSpec, WorkflowDefinition};
use super::Database;
use crate::errors::{storage, StorageError, WorkflowError, WorkflowResult};
use crate::scheduler::ScheduleSpec;

const WORKFLOW_COLUMNS: &str =
    "workflow_id, project_id, alias, task, schedule, version, created_at, updated_at";

impl Database {
    /// Insert a new definition. An existing (project, alias) pair yields
    /// `Conflict` carrying the stored id; nothing is written in that case.
    pub async fn register_workflow(
        &self,
        project_id: &str,
        alias: &str,
        task: &TaskSpec,
        schedule: Option<&ScheduleSpec>,
    ) -> WorkflowResult<WorkflowDefinition> {
        if !self.project_exists(project_id).await? {
            return Err(WorkflowError::project_not_found(project_id));
        }

        let task_json = serde_json::to_string(task).map_err(StorageError::from)?;
        let schedule_json = encode_schedule(schedule)?;

        let mut tx = self.pool.begin().await.map_err(storage("register_workflow"))?;

        let existing: Option<String> = sqlx::query_scalar(
            "SELECT workflow_id FROM workflows WHERE project_id = ? AND alias = ?",
        )
        .bind(project_id)
        .bind(alias)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage("register_workflow"))?;

        if let Some(existing_workflow_id) = existing {
            debug!(
                "Workflow '{}' already registered in '{}' as {}",
                alias, project_id, existing_workflow_id
            );
            return Err(WorkflowError::Conflict {
                project_id: project_id.to_string(),
                alias: alias.to_string(),
                existing_workflow_id,
            });
        }

        let workflow_id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let inserted = sqlx::query(
            r#"
            INSERT INTO workflows (
                workflow_id, project_id, alias, task, schedule, version, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, 1, ?, ?)
            "#,
        )
        .bind(&workflow_id)
        .bind(project_id)
        .bind(alias)
        .bind(&task_json)
        .bind(&schedule_json)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            let unique_violation = e
                .as_database_error()
                .map(|db_err| db_err.is_unique_violation())
                .unwrap_or(false);
            tx.rollback().await.map_err(storage("register_workflow"))?;
            if unique_violation {
                warn!(
                    "Concurrent registration of '{}' in '{}' detected",
                    alias, project_id
                );
                if let Some(existing) = self.find_by_alias(project_id, alias).await? {
                    return Err(WorkflowError::Conflict {
                        project_id: project_id.to_string(),
                        alias: alias.to_string(),
                        existing_workflow_id: existing.workflow_id,
                    });
                }
            }
            return Err(storage("register_workflow")(e));
        }

        tx.commit().await.map_err(storage("register_workflow"))?;

        info!(
            "Registered workflow {} ('{}' in project '{}')",
            workflow_id, alias, project_id
        );

        Ok(WorkflowDefinition {
            workflow_id,
            project_id: project_id.to_string(),
            alias: alias.to_string(),
            task: task.clone(),
            schedule: schedule.cloned(),
            version: 1,
            created_at: now,
            updated_at: now,
        })
    }

    /// Replace task and schedule in one transaction and bump the version.
    pub async fn update_workflow(
        &self,
        workflow_id: &str,
        task: &TaskSpec,
        schedule: &ScheduleSpec,
    ) -> WorkflowResult<WorkflowDefinition> {
        let task_json = serde_json::to_string(task).map_err(StorageError::from)?;
        let schedule_json = encode_schedule(Some(schedule))?;

        let mut tx = self.pool.begin().await.map_err(storage("update_workflow"))?;

        let updated = sqlx::query(
            r#"
            UPDATE workflows
            SET task = ?, schedule = ?, version = version + 1, updated_at = ?
            WHERE workflow_id = ?
            "#,
        )
        .bind(&task_json)
        .bind(&schedule_json)
        .bind(Utc::now())
        .bind(workflow_id)
        .execute(&mut *tx)
        .await
        .map_err(storage("update_workflow"))?;

        if updated.rows_affected() == 0 {
            return Err(WorkflowError::workflow_not_found(workflow_id));
        }

        let query = format!("SELECT {} FROM workflows WHERE workflow_id = ?", WORKFLOW_COLUMNS);
        let row = sqlx::query(&query)
            .bind(workflow_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(storage("update_workflow"))?;
        let definition = row_to_definition(&row)?;

        tx.commit().await.map_err(storage("update_workflow"))?;

        info!(
            "Updated workflow {} to version {}",
            workflow_id, definition.version
        );
        Ok(definition)
    }

    /// Definition `workflow_id` of `project_id`
    pub async fn get_workflow(
        &self,
        project_id: &str,
        workflow_id: &str,
    ) -> WorkflowResult<WorkflowDefinition> {
        let query = format!(
            "SELECT {} FROM workflows WHERE project_id = ? AND workflow_id = ?",
            WORKFLOW_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(project_id)
            .bind(workflow_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("get_workflow"))?
            .ok_or_else(|| WorkflowError::workflow_not_found(workflow_id))?;
        row_to_definition(&row)
    }

    pub async fn find_by_alias(
        &self,
        project_id: &str,
        alias: &str,
    ) -> WorkflowResult<Option<WorkflowDefinition>> {
        let query = format!(
            "SELECT {} FROM workflows WHERE project_id = ? AND alias = ?",
            WORKFLOW_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(project_id)
            .bind(alias)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("find_by_alias"))?;
        row.as_ref().map(row_to_definition).transpose()
    }

    pub async fn find_workflow(&self, workflow_id: &str) -> WorkflowResult<WorkflowDefinition> {
        let query = format!("SELECT {} FROM workflows WHERE workflow_id = ?", WORKFLOW_COLUMNS);
        let row = sqlx::query(&query)
            .bind(workflow_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("find_workflow"))?
            .ok_or_else(|| WorkflowError::workflow_not_found(workflow_id))?;
        row_to_definition(&row)
    }

    /// All definitions, optionally restricted to one project, ordered by alias
    pub async fn list_workflows(
        &self,
        project_id: Option<&str>,
    ) -> WorkflowResult<Vec<WorkflowDefinition>> {
        let rows = match project_id {
            Some(project_id) => {
                let query = format!(
                    "SELECT {} FROM workflows WHERE project_id = ? ORDER BY alias",
                    WORKFLOW_COLUMNS
                );
                sqlx::query(&query)
                    .bind(project_id)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                let query = format!(
                    "SELECT {} FROM workflows ORDER BY project_id, alias",
                    WORKFLOW_COLUMNS
                );
                sqlx::query(&query).fetch_all(&self.pool).await
            }
        }
        .map_err(storage("list_workflows"))?;

        rows.iter().map(row_to_definition).collect()
    }

    /// Definitions that carry a schedule, used to re-arm the queue at boot
    pub async fn list_scheduled_workflows(&self) -> WorkflowResult<Vec<WorkflowDefinition>> {
        let query = format!(
            "SELECT {} FROM workflows WHERE schedule IS NOT NULL ORDER BY created_at",
            WORKFLOW_COLUMNS
        );
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(storage("list_scheduled_workflows"))?;

        rows.iter().map(row_to_definition).collect()
    }

    pub async fn delete_workflow(&self, workflow_id: &str) -> WorkflowResult<()> {
        let deleted = sqlx::query("DELETE FROM workflows WHERE workflow_id = ?")
            .bind(workflow_id)
            .execute(&self.pool)
            .await
            .map_err(storage("delete_workflow"))?;

        if deleted.rows_affected() == 0 {
            return Err(WorkflowError::workflow_not_found(workflow_id));
        }

        info!("Deleted workflow definition {}", workflow_id);
        Ok(())
    }
}

fn encode_schedule(schedule: Option<&ScheduleSpec>) -> WorkflowResult<Option<String>> {
    match schedule {
        Some(schedule) => Ok(Some(
            serde_json::to_string(schedule).map_err(StorageError::from)?,
        )),
        None => Ok(None),
    }
}

fn row_to_definition(row: &SqliteRow) -> WorkflowResult<WorkflowDefinition> {
    let task_json: String = row.try_get("task").map_err(storage("decode_workflow"))?;
    let schedule_json: Option<String> =
        row.try_get("schedule").map_err(storage("decode_workflow"))?;

    let task: TaskSpec = serde_json::from_str(&task_json).map_err(StorageError::from)?;
    let schedule = match schedule_json {
        Some(json) => Some(serde_json::from_str(&json).map_err(StorageError::from)?),
        None => None,
    };

    Ok(WorkflowDefinition {
        workflow_id: row.try_get("workflow_id").map_err(storage("decode_workflow"))?,
        project_id: row.try_get("project_id").map_err(storage("decode_workflow"))?,
        alias: row.try_get("alias").map_err(storage("decode_workflow"))?,
        task,
        schedule,
        version: row.try_get("version").map_err(storage("decode_workflow"))?,
        created_at: row.try_get("created_at").map_err(storage("decode_workflow"))?,
        updated_at: row.try_get("updated_at").map_err(storage("decode_workflow"))?,
    })
}
