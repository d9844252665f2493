//! Execution history operations.

use sqlx::Row;
use tracing::debug;

use super::records::{ExecutionResult, HistoryRecord};
use super::Database;
use crate::errors::{storage, StorageError, WorkflowResult};

impl Database {
    pub async fn insert_history(&self, record: &HistoryRecord) -> WorkflowResult<()> {
        let result_json = serde_json::to_string(&record.result).map_err(StorageError::from)?;

        sqlx::query(
            r#"
            INSERT INTO history (
                execution_id, workflow_id, project_id, notebook, status,
                elapsed_seconds, result, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.execution_id)
        .bind(&record.workflow_id)
        .bind(&record.project_id)
        .bind(&record.notebook)
        .bind(record.status)
        .bind(record.elapsed_seconds)
        .bind(&result_json)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(storage("insert_history"))?;

        debug!(
            "Stored history {} for workflow {} (status {})",
            record.execution_id, record.workflow_id, record.status
        );
        Ok(())
    }

    /// Newest `limit` records for a workflow; insertion order breaks ties.
    pub async fn get_last_history(
        &self,
        workflow_id: &str,
        limit: u32,
    ) -> WorkflowResult<Vec<HistoryRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT execution_id, workflow_id, project_id, notebook, status,
                   elapsed_seconds, result, created_at
            FROM history
            WHERE workflow_id = ?
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(workflow_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(storage("get_last_history"))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let result_json: String = row.try_get("result").map_err(storage("get_last_history"))?;
            let result: ExecutionResult =
                serde_json::from_str(&result_json).map_err(StorageError::from)?;

            records.push(HistoryRecord {
                execution_id: row.try_get("execution_id").map_err(storage("get_last_history"))?,
                workflow_id: row.try_get("workflow_id").map_err(storage("get_last_history"))?,
                project_id: row.try_get("project_id").map_err(storage("get_last_history"))?,
                notebook: row.try_get("notebook").map_err(storage("get_last_history"))?,
                status: row.try_get("status").map_err(storage("get_last_history"))?,
                elapsed_seconds: row
                    .try_get("elapsed_seconds")
                    .map_err(storage("get_last_history"))?,
                result,
                created_at: row.try_get("created_at").map_err(storage("get_last_history"))?,
            });
        }

        debug!(
            "Loaded {} history records for workflow {}",
            records.len(),
            workflow_id
        );
        Ok(records)
    }
}
