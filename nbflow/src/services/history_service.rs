use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, instrument};

use super::notification_service::NotificationDispatcher;
use crate::constants::defaults::HISTORY_LIMIT;
use crate::database::{Database, ExecutionResult, HistoryRecord, TaskSpec};
use crate::errors::WorkflowResult;
use crate::queue::{ResultSink, WorkflowTask};

/// Append-only execution history
pub struct HistoryRecorder {
    database: Arc<Database>,
}

impl HistoryRecorder {
    pub fn new(database: Arc<Database>) -> Self {
        Self { database }
    }

    #[instrument(skip(self, result, task), fields(execution_id = %result.execution_id))]
    pub async fn record(
        &self,
        result: ExecutionResult,
        task: &TaskSpec,
    ) -> WorkflowResult<HistoryRecord> {
        let record = HistoryRecord::from_result(result);
        self.database.insert_history(&record).await?;

        info!(
            "Recorded execution {} of {} ({}, status {})",
            record.execution_id, record.workflow_id, task.notebook, record.status
        );
        Ok(record)
    }

    /// Newest first; `None` means the default page size of one
    pub async fn get_last(
        &self,
        workflow_id: &str,
        limit: Option<u32>,
    ) -> WorkflowResult<Vec<HistoryRecord>> {
        self.database
            .get_last_history(workflow_id, limit.unwrap_or(HISTORY_LIMIT))
            .await
    }
}

/// Records every finished execution and then notifies its channels.
#[derive(Clone)]
pub struct ExecutionReporter {
    recorder: Arc<HistoryRecorder>,
    notifier: NotificationDispatcher,
}

impl ExecutionReporter {
    pub fn new(recorder: Arc<HistoryRecorder>, notifier: NotificationDispatcher) -> Self {
        Self { recorder, notifier }
    }

    /// Record then notify in the background. Notification never blocks or
    /// fails the recording.
    pub async fn report(
        &self,
        result: ExecutionResult,
        task: &WorkflowTask,
    ) -> WorkflowResult<HistoryRecord> {
        let record = self.recorder.record(result, &task.task).await?;
        self.notifier.spawn_notify(
            record.clone(),
            task.alias.clone(),
            task.task.notifications_ok.clone(),
            task.task.notifications_fail.clone(),
        );
        Ok(record)
    }
}

#[async_trait]
impl ResultSink for ExecutionReporter {
    async fn ingest(&self, result: ExecutionResult, task: &WorkflowTask) {
        let execution_id = result.execution_id.clone();
        if let Err(e) = self.report(result, task).await {
            error!("Failed to record execution {}: {}", execution_id, e);
        }
    }
}
