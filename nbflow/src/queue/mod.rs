//! Queue dispatch: immediate jobs, recurring entries and the job registry
//!
//! `QueueBackend` is the seam between the workflow facade and whatever
//! actually holds jobs. `CronQueue` is the in-process backend built on
//! tokio-cron-scheduler; tests substitute their own backends.

pub mod cron_queue;
pub mod runner;

pub use cron_queue::CronQueue;
pub use runner::{CommandRunner, NotebookRunner};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::database::{ExecutionResult, TaskSpec};
use crate::errors::{DispatchError, WorkflowError, WorkflowResult};
use crate::scheduler::ScheduleSpec;

/// Snapshot of a workflow handed to the queue; later edits to the stored
/// definition do not change it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowTask {
    pub workflow_id: String,
    pub project_id: String,
    pub alias: String,
    pub task: TaskSpec,
}

/// One execution of a workflow task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionTask {
    pub execution_id: String,
    pub workflow: WorkflowTask,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Started,
    Finished,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Finished | JobState::Failed | JobState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Started => "started",
            JobState::Finished => "finished",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobOrigin {
    Manual,
    Scheduled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedJob {
    pub job_id: String,
    pub workflow_id: String,
    pub state: JobState,
    pub origin: JobOrigin,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Job status plus its result once one exists
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobOutcome {
    pub job: QueuedJob,
    /// Zero-based position among queued jobs; `None` once the job has left the queue
    pub position: Option<usize>,
    pub result: Option<ExecutionResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecurringSummary {
    pub workflow_id: String,
    pub entry_id: String,
    pub schedule: ScheduleSpec,
    pub fired: u32,
    pub next_fire: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

/// Storage for jobs and recurring entries.
///
/// Implementations keep at most one recurring entry per workflow id and must
/// only touch entries they created themselves.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    fn queue_name(&self) -> &str;

    /// Enqueue a one-off execution; returns the job id
    async fn enqueue_now(&self, task: &WorkflowTask) -> Result<String, DispatchError>;

    /// Install or replace the recurring entry for `task.workflow_id`;
    /// returns the entry id
    async fn schedule_recurring(
        &self,
        task: &WorkflowTask,
        schedule: &ScheduleSpec,
    ) -> Result<String, DispatchError>;

    /// Remove the recurring entry and any queued jobs of a workflow.
    /// Returns whether anything was removed.
    async fn cancel(&self, workflow_id: &str) -> Result<bool, DispatchError>;

    /// Remove every recurring entry of this queue; returns how many
    async fn cancel_all(&self) -> Result<usize, DispatchError>;

    async fn list_jobs(&self, state: Option<JobState>) -> Result<Vec<QueuedJob>, DispatchError>;

    async fn fetch_result(&self, job_id: &str) -> Result<Option<JobOutcome>, DispatchError>;

    async fn list_recurring(&self) -> Result<Vec<RecurringSummary>, DispatchError>;

    /// Drop records in a terminal state; returns the removed job ids
    async fn remove_jobs(&self, state: JobState) -> Result<Vec<String>, DispatchError>;

    /// Drop terminal records older than `max_age_hours`; returns how many
    async fn cleanup_finished(&self, max_age_hours: i64) -> Result<usize, DispatchError>;
}

/// Consumer of execution results, invoked once per finished job
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn ingest(&self, result: ExecutionResult, task: &WorkflowTask);
}

/// Logging wrapper that converts backend failures into `WorkflowError`.
#[derive(Clone)]
pub struct QueueDispatcher {
    backend: Arc<dyn QueueBackend>,
}

impl QueueDispatcher {
    pub fn new(backend: Arc<dyn QueueBackend>) -> Self {
        Self { backend }
    }

    pub fn queue_name(&self) -> &str {
        self.backend.queue_name()
    }

    #[instrument(skip(self, task), fields(workflow_id = %task.workflow_id))]
    pub async fn enqueue_now(&self, task: &WorkflowTask) -> WorkflowResult<String> {
        match self.backend.enqueue_now(task).await {
            Ok(job_id) => {
                info!(
                    "Enqueued job {} for workflow {} on '{}'",
                    job_id,
                    task.workflow_id,
                    self.queue_name()
                );
                Ok(job_id)
            }
            Err(e) => {
                error!("Failed to enqueue workflow {}: {}", task.workflow_id, e);
                Err(e.into())
            }
        }
    }

    #[instrument(skip(self, task, schedule), fields(workflow_id = %task.workflow_id))]
    pub async fn schedule_recurring(
        &self,
        task: &WorkflowTask,
        schedule: &ScheduleSpec,
    ) -> WorkflowResult<String> {
        match self.backend.schedule_recurring(task, schedule).await {
            Ok(entry_id) => {
                info!(
                    "Workflow {} scheduled on '{}': {}",
                    task.workflow_id,
                    self.queue_name(),
                    schedule
                );
                Ok(entry_id)
            }
            Err(e) => {
                error!("Failed to schedule workflow {}: {}", task.workflow_id, e);
                Err(e.into())
            }
        }
    }

    pub async fn cancel(&self, workflow_id: &str) -> WorkflowResult<bool> {
        match self.backend.cancel(workflow_id).await {
            Ok(removed) => {
                if removed {
                    info!("Cancelled workflow {} on '{}'", workflow_id, self.queue_name());
                }
                Ok(removed)
            }
            Err(e) => {
                error!("Failed to cancel workflow {}: {}", workflow_id, e);
                Err(e.into())
            }
        }
    }

    pub async fn cancel_all(&self) -> WorkflowResult<usize> {
        let removed = self.backend.cancel_all().await.map_err(|e| {
            error!("Failed to cancel recurring entries: {}", e);
            WorkflowError::from(e)
        })?;
        info!(
            "Cancelled {} recurring entries on '{}'",
            removed,
            self.queue_name()
        );
        Ok(removed)
    }

    pub async fn list_jobs(&self, state: Option<JobState>) -> WorkflowResult<Vec<QueuedJob>> {
        Ok(self.backend.list_jobs(state).await?)
    }

    pub async fn fetch_result(&self, job_id: &str) -> WorkflowResult<JobOutcome> {
        self.backend
            .fetch_result(job_id)
            .await?
            .ok_or_else(|| WorkflowError::job_not_found(job_id))
    }

    pub async fn list_recurring(&self) -> WorkflowResult<Vec<RecurringSummary>> {
        Ok(self.backend.list_recurring().await?)
    }

    pub async fn remove_jobs(&self, state: JobState) -> WorkflowResult<Vec<String>> {
        if !state.is_terminal() {
            warn!("Refusing to remove jobs in non-terminal state '{}'", state);
            return Ok(Vec::new());
        }
        let removed = self.backend.remove_jobs(state).await?;
        info!("Removed {} {} jobs", removed.len(), state);
        Ok(removed)
    }

    pub async fn cleanup_finished(&self, max_age_hours: i64) -> WorkflowResult<usize> {
        Ok(self.backend.cleanup_finished(max_age_hours).await?)
    }
}
