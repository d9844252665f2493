//! In-memory queue backend with injectable faults
//!
//! Keeps recurring entries and enqueued tasks in maps, never executes
//! anything, and can be told to fail `cancel`/`schedule_recurring` or to
//! close the database while cancelling (to reach the state where the queue
//! entry is gone but the definition could not be deleted).

use async_trait::async_trait;
use chrono::Utc;
use nbflow::errors::DispatchError;
use nbflow::queue::{
    JobOrigin, JobOutcome, JobState, QueueBackend, QueuedJob, RecurringSummary, WorkflowTask,
};
use nbflow::{Database, ScheduleSpec};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

pub struct FakeQueue {
    name: String,
    recurring: Mutex<HashMap<String, (String, WorkflowTask, ScheduleSpec)>>,
    enqueued: Mutex<Vec<(String, WorkflowTask)>>,
    calls: Mutex<Vec<String>>,
    fail_cancel: AtomicBool,
    fail_schedule: AtomicBool,
    close_on_cancel: Mutex<Option<Arc<Database>>>,
}

impl FakeQueue {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            recurring: Mutex::new(HashMap::new()),
            enqueued: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            fail_cancel: AtomicBool::new(false),
            fail_schedule: AtomicBool::new(false),
            close_on_cancel: Mutex::new(None),
        })
    }

    pub fn fail_cancel(&self, fail: bool) {
        self.fail_cancel.store(fail, Ordering::SeqCst);
    }

    pub fn fail_schedule(&self, fail: bool) {
        self.fail_schedule.store(fail, Ordering::SeqCst);
    }

    /// Close `database` right after the next successful cancel
    pub async fn close_database_on_cancel(&self, database: Arc<Database>) {
        *self.close_on_cancel.lock().await = Some(database);
    }

    pub async fn recurring_count(&self) -> usize {
        self.recurring.lock().await.len()
    }

    pub async fn recurring_schedule(&self, workflow_id: &str) -> Option<ScheduleSpec> {
        self.recurring
            .lock()
            .await
            .get(workflow_id)
            .map(|(_, _, schedule)| schedule.clone())
    }

    pub async fn enqueued(&self) -> Vec<(String, WorkflowTask)> {
        self.enqueued.lock().await.clone()
    }

    /// Backend operations in call order, e.g. `schedule_recurring:<workflow_id>`
    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }

    async fn record(&self, call: String) {
        self.calls.lock().await.push(call);
    }

    fn unavailable(&self) -> DispatchError {
        DispatchError::Unavailable {
            queue: self.name.clone(),
            reason: "injected fault".to_string(),
        }
    }
}

#[async_trait]
impl QueueBackend for FakeQueue {
    fn queue_name(&self) -> &str {
        &self.name
    }

    async fn enqueue_now(&self, task: &WorkflowTask) -> Result<String, DispatchError> {
        self.record(format!("enqueue_now:{}", task.workflow_id)).await;
        let job_id = Uuid::new_v4().to_string();
        self.enqueued.lock().await.push((job_id.clone(), task.clone()));
        Ok(job_id)
    }

    async fn schedule_recurring(
        &self,
        task: &WorkflowTask,
        schedule: &ScheduleSpec,
    ) -> Result<String, DispatchError> {
        self.record(format!("schedule_recurring:{}", task.workflow_id)).await;
        if self.fail_schedule.load(Ordering::SeqCst) {
            return Err(self.unavailable());
        }
        let entry_id = Uuid::new_v4().to_string();
        self.recurring.lock().await.insert(
            task.workflow_id.clone(),
            (entry_id.clone(), task.clone(), schedule.clone()),
        );
        Ok(entry_id)
    }

    async fn cancel(&self, workflow_id: &str) -> Result<bool, DispatchError> {
        self.record(format!("cancel:{}", workflow_id)).await;
        if self.fail_cancel.load(Ordering::SeqCst) {
            return Err(self.unavailable());
        }
        let removed = self.recurring.lock().await.remove(workflow_id).is_some();
        if let Some(database) = self.close_on_cancel.lock().await.take() {
            database.close().await;
        }
        Ok(removed)
    }

    async fn cancel_all(&self) -> Result<usize, DispatchError> {
        self.record("cancel_all".to_string()).await;
        let mut recurring = self.recurring.lock().await;
        let count = recurring.len();
        recurring.clear();
        Ok(count)
    }

    async fn list_jobs(&self, state: Option<JobState>) -> Result<Vec<QueuedJob>, DispatchError> {
        if state.is_some_and(|s| s != JobState::Queued) {
            return Ok(Vec::new());
        }
        Ok(self
            .enqueued
            .lock()
            .await
            .iter()
            .map(|(job_id, task)| QueuedJob {
                job_id: job_id.clone(),
                workflow_id: task.workflow_id.clone(),
                state: JobState::Queued,
                origin: JobOrigin::Manual,
                enqueued_at: Utc::now(),
                started_at: None,
                ended_at: None,
            })
            .collect())
    }

    async fn fetch_result(&self, job_id: &str) -> Result<Option<JobOutcome>, DispatchError> {
        let jobs = self.list_jobs(None).await?;
        Ok(jobs
            .iter()
            .position(|job| job.job_id == job_id)
            .map(|position| JobOutcome {
                job: jobs[position].clone(),
                position: Some(position),
                result: None,
            }))
    }

    async fn list_recurring(&self) -> Result<Vec<RecurringSummary>, DispatchError> {
        Ok(self
            .recurring
            .lock()
            .await
            .iter()
            .map(|(workflow_id, (entry_id, _, schedule))| RecurringSummary {
                workflow_id: workflow_id.clone(),
                entry_id: entry_id.clone(),
                schedule: schedule.clone(),
                fired: 0,
                next_fire: Utc::now(),
                registered_at: Utc::now(),
            })
            .collect())
    }

    async fn remove_jobs(&self, _state: JobState) -> Result<Vec<String>, DispatchError> {
        Ok(Vec::new())
    }

    async fn cleanup_finished(&self, _max_age_hours: i64) -> Result<usize, DispatchError> {
        Ok(0)
    }
}
