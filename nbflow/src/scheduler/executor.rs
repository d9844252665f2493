//! Workflow lifecycle facade
//!
//! Ties the definition store, the queue and the history recorder together.
//! Every mutation of a workflow runs under its `WorkflowLocks` key.

use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use super::locks::{ActiveOperation, WorkflowLocks};
use super::{planner, ScheduleData};
use crate::database::{Database, ExecutionResult, HistoryRecord, TaskSpec, WorkflowDefinition};
use crate::errors::{ValidationError, WorkflowError, WorkflowResult};
use crate::queue::{JobOutcome, JobState, QueueDispatcher, QueuedJob, RecurringSummary};
use crate::services::{ExecutionReporter, HistoryRecorder};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Registration {
    pub workflow_id: String,
    /// False when the alias was already registered
    pub created: bool,
}

/// What happened when a configured workflow was reconciled with the store
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    Created(String),
    Updated(String),
    Unchanged(String),
    /// Stored definition differs but has no schedule to update with
    Stale(String),
    Disabled(Option<String>),
}

pub struct SchedulerExecutor {
    database: Arc<Database>,
    dispatcher: QueueDispatcher,
    recorder: Arc<HistoryRecorder>,
    reporter: ExecutionReporter,
    locks: WorkflowLocks,
}

impl SchedulerExecutor {
    pub fn new(
        database: Arc<Database>,
        dispatcher: QueueDispatcher,
        recorder: Arc<HistoryRecorder>,
        reporter: ExecutionReporter,
    ) -> Self {
        Self {
            database,
            dispatcher,
            recorder,
            reporter,
            locks: WorkflowLocks::new(),
        }
    }

    #[instrument(skip(self, task, schedule), fields(project = %project_id, alias = %alias))]
    pub async fn register(
        &self,
        project_id: &str,
        alias: &str,
        task: TaskSpec,
        schedule: Option<ScheduleData>,
    ) -> WorkflowResult<Registration> {
        task.validate()?;
        let schedule = schedule.as_ref().map(planner::validate).transpose()?;

        let _guard = self
            .locks
            .acquire(&format!("{}/{}", project_id, alias), "register")
            .await;

        let definition = match self
            .database
            .register_workflow(project_id, alias, &task, schedule.as_ref())
            .await
        {
            Ok(definition) => definition,
            Err(WorkflowError::Conflict {
                existing_workflow_id,
                ..
            }) => {
                if let Some(registration) = self
                    .confirm_existing(project_id, alias, &existing_workflow_id)
                    .await?
                {
                    return Ok(registration);
                }
                info!(
                    "Workflow {} was deleted during registration of '{}', registering again",
                    existing_workflow_id, alias
                );
                self.database
                    .register_workflow(project_id, alias, &task, schedule.as_ref())
                    .await?
            }
            Err(e) => return Err(e),
        };

        if let Some(schedule) = &definition.schedule {
            self.dispatcher
                .schedule_recurring(&definition.to_task(), schedule)
                .await?;
        }

        Ok(Registration {
            workflow_id: definition.workflow_id,
            created: true,
        })
    }

    /// Conflict path of `register`. Re-reads the alias under the workflow's
    /// own lock and arms its schedule if an earlier dispatch never landed.
    /// `None` means the workflow was deleted in the meantime.
    async fn confirm_existing(
        &self,
        project_id: &str,
        alias: &str,
        workflow_id: &str,
    ) -> WorkflowResult<Option<Registration>> {
        let _guard = self.locks.acquire(workflow_id, "register").await;

        let Some(definition) = self.database.find_by_alias(project_id, alias).await? else {
            return Ok(None);
        };

        if let Some(schedule) = &definition.schedule {
            let armed = self
                .dispatcher
                .list_recurring()
                .await?
                .iter()
                .any(|entry| entry.workflow_id == definition.workflow_id);
            if !armed {
                warn!(
                    "Workflow '{}' ({}) is stored without a queue entry, dispatching it",
                    alias, definition.workflow_id
                );
                self.dispatcher
                    .schedule_recurring(&definition.to_task(), schedule)
                    .await?;
            }
        }

        info!(
            "Workflow '{}' already registered as {}",
            alias, definition.workflow_id
        );
        Ok(Some(Registration {
            workflow_id: definition.workflow_id,
            created: false,
        }))
    }

    /// Replace task and schedule; the schedule is mandatory.
    #[instrument(skip(self, task, schedule), fields(workflow_id = %workflow_id))]
    pub async fn update(
        &self,
        workflow_id: &str,
        task: TaskSpec,
        schedule: Option<ScheduleData>,
    ) -> WorkflowResult<String> {
        let data = schedule.ok_or(ValidationError::MissingSchedule)?;
        task.validate()?;
        let schedule = planner::validate(&data)?;

        let _guard = self.locks.acquire(workflow_id, "update").await;

        let definition = self
            .database
            .update_workflow(workflow_id, &task, &schedule)
            .await?;
        self.dispatcher
            .schedule_recurring(&definition.to_task(), &schedule)
            .await?;

        info!(
            "Workflow {} updated to version {} ({})",
            workflow_id, definition.version, schedule
        );
        Ok(definition.workflow_id)
    }

    #[instrument(skip(self), fields(workflow_id = %workflow_id))]
    pub async fn run_now(&self, workflow_id: &str) -> WorkflowResult<String> {
        let definition = self.database.find_workflow(workflow_id).await?;
        self.dispatcher.enqueue_now(&definition.to_task()).await
    }

    /// Remove the workflow's queue entry; the stored definition is untouched
    pub async fn cancel(&self, workflow_id: &str) -> WorkflowResult<bool> {
        let _guard = self.locks.acquire(workflow_id, "cancel").await;
        self.dispatcher.cancel(workflow_id).await
    }

    pub async fn cancel_all(&self) -> WorkflowResult<usize> {
        self.dispatcher.cancel_all().await
    }

    /// Queue first, then store. A queue failure keeps the definition; a store
    /// failure after the queue entry is gone leaves a definition that is no
    /// longer scheduled and is returned as the error.
    #[instrument(skip(self), fields(workflow_id = %workflow_id))]
    pub async fn delete_workflow(&self, workflow_id: &str) -> WorkflowResult<()> {
        let _guard = self.locks.acquire(workflow_id, "delete").await;

        self.database.find_workflow(workflow_id).await?;

        if let Err(e) = self.dispatcher.cancel(workflow_id).await {
            warn!(
                "Queue removal of {} failed, definition kept: {}",
                workflow_id, e
            );
            return Err(e);
        }

        if let Err(e) = self.database.delete_workflow(workflow_id).await {
            warn!(
                "Workflow {} removed from the queue but its definition remains (ghost): {}",
                workflow_id, e
            );
            return Err(e);
        }

        info!("Workflow {} deleted", workflow_id);
        Ok(())
    }

    /// Record a result produced outside this process's queue and notify on it
    pub async fn ingest_result(&self, result: ExecutionResult) -> WorkflowResult<HistoryRecord> {
        let definition = self.database.find_workflow(&result.workflow_id).await?;
        self.reporter.report(result, &definition.to_task()).await
    }

    /// Re-arm every stored schedule; the in-process queue starts empty.
    pub async fn restore_schedules(&self) -> WorkflowResult<usize> {
        let definitions = self.database.list_scheduled_workflows().await?;
        let mut restored = 0;

        for definition in &definitions {
            let Some(schedule) = &definition.schedule else {
                continue;
            };
            let _guard = self
                .locks
                .acquire(&definition.workflow_id, "restore")
                .await;
            match self
                .dispatcher
                .schedule_recurring(&definition.to_task(), schedule)
                .await
            {
                Ok(_) => {
                    restored += 1;
                    info!(
                        "✓ Restored schedule of {} ('{}'): {}",
                        definition.workflow_id, definition.alias, schedule
                    );
                }
                Err(e) => {
                    error!(
                        "✗ Failed to restore schedule of {} ('{}'): {}",
                        definition.workflow_id, definition.alias, e
                    );
                }
            }
        }

        info!(
            "Restored {}/{} stored schedules",
            restored,
            definitions.len()
        );
        Ok(restored)
    }

    /// Bring one configured workflow in line with the store: register it,
    /// update it when task or schedule changed, or cancel it when disabled.
    #[instrument(skip(self, task, schedule), fields(project = %project_id, alias = %alias))]
    pub async fn sync_workflow(
        &self,
        project_id: &str,
        alias: &str,
        task: TaskSpec,
        schedule: Option<ScheduleData>,
        enabled: bool,
    ) -> WorkflowResult<SyncOutcome> {
        let existing = self.database.find_by_alias(project_id, alias).await?;

        if !enabled {
            return match existing {
                Some(definition) => {
                    self.cancel(&definition.workflow_id).await?;
                    info!("Workflow '{}' is disabled, queue entry removed", alias);
                    Ok(SyncOutcome::Disabled(Some(definition.workflow_id)))
                }
                None => Ok(SyncOutcome::Disabled(None)),
            };
        }

        let Some(definition) = existing else {
            let registration = self.register(project_id, alias, task, schedule).await?;
            return Ok(SyncOutcome::Created(registration.workflow_id));
        };

        let validated = schedule.as_ref().map(planner::validate).transpose()?;
        if definition.task == task && definition.schedule == validated {
            return Ok(SyncOutcome::Unchanged(definition.workflow_id));
        }

        if schedule.is_none() {
            warn!(
                "Workflow '{}' changed but has no schedule; stored definition kept",
                alias
            );
            return Ok(SyncOutcome::Stale(definition.workflow_id));
        }

        let workflow_id = self.update(&definition.workflow_id, task, schedule).await?;
        Ok(SyncOutcome::Updated(workflow_id))
    }

    pub async fn get_workflow(
        &self,
        project_id: &str,
        workflow_id: &str,
    ) -> WorkflowResult<WorkflowDefinition> {
        self.database.get_workflow(project_id, workflow_id).await
    }

    pub async fn list_workflows(
        &self,
        project_id: Option<&str>,
    ) -> WorkflowResult<Vec<WorkflowDefinition>> {
        self.database.list_workflows(project_id).await
    }

    pub async fn get_last_history(
        &self,
        workflow_id: &str,
        limit: Option<u32>,
    ) -> WorkflowResult<Vec<HistoryRecord>> {
        self.recorder.get_last(workflow_id, limit).await
    }

    pub async fn list_jobs(&self, state: Option<JobState>) -> WorkflowResult<Vec<QueuedJob>> {
        self.dispatcher.list_jobs(state).await
    }

    pub async fn fetch_result(&self, job_id: &str) -> WorkflowResult<JobOutcome> {
        self.dispatcher.fetch_result(job_id).await
    }

    pub async fn list_recurring(&self) -> WorkflowResult<Vec<RecurringSummary>> {
        self.dispatcher.list_recurring().await
    }

    pub async fn remove_jobs(&self, state: JobState) -> WorkflowResult<Vec<String>> {
        self.dispatcher.remove_jobs(state).await
    }

    pub fn active_operations(&self) -> Vec<ActiveOperation> {
        self.locks.active_operations()
    }
}
