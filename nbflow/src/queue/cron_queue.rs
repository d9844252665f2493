//! In-process queue backend on top of tokio-cron-scheduler
//!
//! Every recurring entry is a chain of one-shot scheduler jobs: each fire
//! enqueues an execution and arms the next one-shot at the time the planner
//! computes. Entries carry a generation number, so a fire that belongs to a
//! replaced or cancelled entry does nothing.
//!
//! Executions run on a bounded worker pool (a semaphore) and their results
//! are handed to a `ResultSink`.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    ExecutionTask, JobOrigin, JobOutcome, JobState, NotebookRunner, QueueBackend, QueuedJob,
    RecurringSummary, ResultSink, WorkflowTask,
};
use crate::database::ExecutionResult;
use crate::errors::DispatchError;
use crate::scheduler::{planner, ScheduleSpec};

pub struct CronQueue {
    state: Arc<QueueState>,
}

struct QueueState {
    queue_name: String,
    scheduler: JobScheduler,
    recurring: Mutex<HashMap<String, RecurringEntry>>,
    jobs: RwLock<JobRegistry>,
    workers: Arc<Semaphore>,
    runner: Arc<dyn NotebookRunner>,
    sink: Arc<dyn ResultSink>,
    generation: AtomicU64,
    closed: AtomicBool,
}

struct RecurringEntry {
    generation: u64,
    job_guid: Uuid,
    task: WorkflowTask,
    schedule: ScheduleSpec,
    fired: u32,
    next_fire: DateTime<Utc>,
    registered_at: DateTime<Utc>,
}

#[derive(Default)]
struct JobRegistry {
    jobs: HashMap<String, JobEntry>,
    sequence: u64,
}

struct JobEntry {
    seq: u64,
    job: QueuedJob,
    result: Option<ExecutionResult>,
}

impl CronQueue {
    /// Create a queue with its own job scheduler
    pub async fn new(
        queue_name: &str,
        max_workers: usize,
        runner: Arc<dyn NotebookRunner>,
        sink: Arc<dyn ResultSink>,
    ) -> Result<Self, DispatchError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| DispatchError::Unavailable {
                queue: queue_name.to_string(),
                reason: format!("Failed to create JobScheduler: {}", e),
            })?;
        Ok(Self::with_scheduler(
            queue_name, scheduler, max_workers, runner, sink,
        ))
    }

    /// Create a queue on a scheduler that may be shared with other queues
    pub fn with_scheduler(
        queue_name: &str,
        scheduler: JobScheduler,
        max_workers: usize,
        runner: Arc<dyn NotebookRunner>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        Self {
            state: Arc::new(QueueState {
                queue_name: queue_name.to_string(),
                scheduler,
                recurring: Mutex::new(HashMap::new()),
                jobs: RwLock::new(JobRegistry::default()),
                workers: Arc::new(Semaphore::new(max_workers.max(1))),
                runner,
                sink,
                generation: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub async fn start(&self) -> Result<(), DispatchError> {
        self.state
            .scheduler
            .start()
            .await
            .map_err(|e| self.state.unavailable(format!("Failed to start scheduler: {}", e)))?;
        info!("Queue '{}' started", self.state.queue_name);
        Ok(())
    }

    /// Stop accepting work and drop every recurring entry. Jobs already
    /// running finish; queued jobs are cancelled. Returns the number of
    /// recurring entries dropped.
    pub async fn close(&self) -> usize {
        self.state.closed.store(true, Ordering::SeqCst);
        let drained = self.state.drain_recurring().await;
        self.state.workers.close();
        info!(
            "Queue '{}' closed ({} recurring entries dropped)",
            self.state.queue_name, drained
        );
        drained
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }
}

impl QueueState {
    fn unavailable(&self, reason: String) -> DispatchError {
        DispatchError::Unavailable {
            queue: self.queue_name.clone(),
            reason,
        }
    }

    fn ensure_open(&self) -> Result<(), DispatchError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(self.unavailable("queue is closed".to_string()));
        }
        Ok(())
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn submit(self: &Arc<Self>, task: WorkflowTask, origin: JobOrigin) -> String {
        let job_id = Uuid::new_v4().to_string();

        {
            let mut registry = self.jobs.write().await;
            registry.sequence += 1;
            let seq = registry.sequence;
            registry.jobs.insert(
                job_id.clone(),
                JobEntry {
                    seq,
                    job: QueuedJob {
                        job_id: job_id.clone(),
                        workflow_id: task.workflow_id.clone(),
                        state: JobState::Queued,
                        origin,
                        enqueued_at: Utc::now(),
                        started_at: None,
                        ended_at: None,
                    },
                    result: None,
                },
            );
        }

        let state = Arc::clone(self);
        let worker_job_id = job_id.clone();
        tokio::spawn(async move {
            state.execute(worker_job_id, task).await;
        });

        job_id
    }

    async fn execute(self: Arc<Self>, job_id: String, task: WorkflowTask) {
        let permit = match Arc::clone(&self.workers).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                self.finish(&job_id, JobState::Cancelled, None).await;
                debug!("Job {} dropped: queue '{}' closed", job_id, self.queue_name);
                return;
            }
        };

        if !self.try_start(&job_id).await {
            debug!("Job {} was cancelled before it started", job_id);
            return;
        }

        info!(
            "Executing job {} for workflow {} ({})",
            job_id, task.workflow_id, task.task.notebook
        );

        let execution = ExecutionTask {
            execution_id: job_id.clone(),
            workflow: task.clone(),
        };
        let result = self.runner.run(&execution).await;
        drop(permit);

        let state = if result.error.is_some() {
            JobState::Failed
        } else {
            JobState::Finished
        };
        info!(
            "Job {} {} in {:.1}s",
            job_id, state, result.elapsed_seconds
        );

        self.finish(&job_id, state, Some(result.clone())).await;
        self.sink.ingest(result, &task).await;
    }

    async fn try_start(&self, job_id: &str) -> bool {
        let mut registry = self.jobs.write().await;
        match registry.jobs.get_mut(job_id) {
            Some(entry) if entry.job.state == JobState::Queued => {
                entry.job.state = JobState::Started;
                entry.job.started_at = Some(Utc::now());
                true
            }
            _ => false,
        }
    }

    async fn finish(&self, job_id: &str, state: JobState, result: Option<ExecutionResult>) {
        let mut registry = self.jobs.write().await;
        if let Some(entry) = registry.jobs.get_mut(job_id) {
            entry.job.state = state;
            entry.job.ended_at = Some(Utc::now());
            entry.result = result;
        }
    }

    async fn cancel_queued(&self, workflow_id: &str) -> usize {
        let mut registry = self.jobs.write().await;
        let now = Utc::now();
        let mut cancelled = 0;
        for entry in registry.jobs.values_mut() {
            if entry.job.workflow_id == workflow_id && entry.job.state == JobState::Queued {
                entry.job.state = JobState::Cancelled;
                entry.job.ended_at = Some(now);
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Install a one-shot job that fires entry `generation` of `workflow_id` at `at`
    async fn arm(
        self: &Arc<Self>,
        workflow_id: &str,
        generation: u64,
        at: DateTime<Utc>,
    ) -> Result<Uuid, DispatchError> {
        let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let weak: Weak<QueueState> = Arc::downgrade(self);
        let target = workflow_id.to_string();

        let job = Job::new_one_shot_async(delay, move |_uuid, _scheduler| {
            let weak = weak.clone();
            let workflow_id = target.clone();

            Box::pin(async move {
                if let Some(state) = weak.upgrade() {
                    QueueState::fire(state, workflow_id, generation).await;
                }
            })
        })
        .map_err(|e| DispatchError::SchedulingFailed {
            workflow_id: workflow_id.to_string(),
            reason: format!("Failed to create job: {}", e),
        })?;

        self.scheduler
            .add(job)
            .await
            .map_err(|e| DispatchError::SchedulingFailed {
                workflow_id: workflow_id.to_string(),
                reason: format!("Failed to add job to scheduler: {}", e),
            })
    }

    async fn unschedule(&self, guid: Uuid) {
        if let Err(e) = self.scheduler.remove(&guid).await {
            debug!("Scheduler job {} already gone: {}", guid, e);
        }
    }

    fn fire(state: Arc<QueueState>, workflow_id: String, generation: u64) -> BoxFuture<'static, ()> {
        async move {
            if state.closed.load(Ordering::SeqCst) {
                return;
            }

            let mut recurring = state.recurring.lock().await;
            let (task, schedule, fired, last_fire) = match recurring.get_mut(&workflow_id) {
                Some(entry) if entry.generation == generation => {
                    entry.fired += 1;
                    (
                        entry.task.clone(),
                        entry.schedule.clone(),
                        entry.fired,
                        entry.next_fire,
                    )
                }
                _ => {
                    debug!(
                        "Ignoring stale fire of workflow {} (generation {})",
                        workflow_id, generation
                    );
                    return;
                }
            };

            let job_id = state.submit(task, JobOrigin::Scheduled).await;
            debug!(
                "Workflow {} fired (#{}) as job {}",
                workflow_id, fired, job_id
            );

            if !planner::may_fire_again(schedule.repeat, fired) {
                recurring.remove(&workflow_id);
                info!(
                    "Workflow {} finished its repeats after {} runs",
                    workflow_id, fired
                );
                return;
            }

            let next = match planner::next_fire(&schedule, Utc::now(), Some(last_fire)) {
                Ok(next) => next,
                Err(e) => {
                    recurring.remove(&workflow_id);
                    warn!("Workflow {} has no further fire time: {}", workflow_id, e);
                    return;
                }
            };

            match state.arm(&workflow_id, generation, next).await {
                Ok(guid) => {
                    if let Some(entry) = recurring.get_mut(&workflow_id) {
                        entry.job_guid = guid;
                        entry.next_fire = next;
                    }
                }
                Err(e) => {
                    recurring.remove(&workflow_id);
                    error!("Failed to re-arm workflow {}: {}", workflow_id, e);
                }
            }
        }
        .boxed()
    }

    async fn drain_recurring(&self) -> usize {
        let drained: Vec<RecurringEntry> = {
            let mut recurring = self.recurring.lock().await;
            recurring.drain().map(|(_, entry)| entry).collect()
        };
        for entry in &drained {
            self.unschedule(entry.job_guid).await;
        }
        drained.len()
    }
}

#[async_trait]
impl QueueBackend for CronQueue {
    fn queue_name(&self) -> &str {
        &self.state.queue_name
    }

    async fn enqueue_now(&self, task: &WorkflowTask) -> Result<String, DispatchError> {
        self.state.ensure_open()?;
        Ok(self.state.submit(task.clone(), JobOrigin::Manual).await)
    }

    async fn schedule_recurring(
        &self,
        task: &WorkflowTask,
        schedule: &ScheduleSpec,
    ) -> Result<String, DispatchError> {
        self.state.ensure_open()?;

        let now = Utc::now();
        let next = planner::next_fire(schedule, now, None).map_err(|e| {
            DispatchError::SchedulingFailed {
                workflow_id: task.workflow_id.clone(),
                reason: e.to_string(),
            }
        })?;

        let mut recurring = self.state.recurring.lock().await;
        let generation = self.state.next_generation();
        let job_guid = self.state.arm(&task.workflow_id, generation, next).await?;

        let previous = recurring.insert(
            task.workflow_id.clone(),
            RecurringEntry {
                generation,
                job_guid,
                task: task.clone(),
                schedule: schedule.clone(),
                fired: 0,
                next_fire: next,
                registered_at: now,
            },
        );
        drop(recurring);

        if let Some(previous) = previous {
            self.state.unschedule(previous.job_guid).await;
            debug!(
                "Replaced recurring entry of workflow {} (generation {} -> {})",
                task.workflow_id, previous.generation, generation
            );
        }

        debug!(
            "Workflow {} next fires at {}",
            task.workflow_id,
            next.to_rfc3339()
        );
        Ok(job_guid.to_string())
    }

    async fn cancel(&self, workflow_id: &str) -> Result<bool, DispatchError> {
        self.state.ensure_open()?;

        let removed = self.state.recurring.lock().await.remove(workflow_id);
        if let Some(entry) = &removed {
            self.state.unschedule(entry.job_guid).await;
        }
        let cancelled_jobs = self.state.cancel_queued(workflow_id).await;

        Ok(removed.is_some() || cancelled_jobs > 0)
    }

    async fn cancel_all(&self) -> Result<usize, DispatchError> {
        self.state.ensure_open()?;
        Ok(self.state.drain_recurring().await)
    }

    async fn list_jobs(&self, state: Option<JobState>) -> Result<Vec<QueuedJob>, DispatchError> {
        let registry = self.state.jobs.read().await;
        let mut entries: Vec<&JobEntry> = registry
            .jobs
            .values()
            .filter(|entry| state.map_or(true, |s| entry.job.state == s))
            .collect();
        entries.sort_by_key(|entry| entry.seq);
        Ok(entries.into_iter().map(|entry| entry.job.clone()).collect())
    }

    async fn fetch_result(&self, job_id: &str) -> Result<Option<JobOutcome>, DispatchError> {
        let registry = self.state.jobs.read().await;
        let Some(entry) = registry.jobs.get(job_id) else {
            return Ok(None);
        };

        let position = (entry.job.state == JobState::Queued).then(|| {
            registry
                .jobs
                .values()
                .filter(|other| other.job.state == JobState::Queued && other.seq < entry.seq)
                .count()
        });

        Ok(Some(JobOutcome {
            job: entry.job.clone(),
            position,
            result: entry.result.clone(),
        }))
    }

    async fn list_recurring(&self) -> Result<Vec<RecurringSummary>, DispatchError> {
        let recurring = self.state.recurring.lock().await;
        let mut summaries: Vec<RecurringSummary> = recurring
            .iter()
            .map(|(workflow_id, entry)| RecurringSummary {
                workflow_id: workflow_id.clone(),
                entry_id: entry.job_guid.to_string(),
                schedule: entry.schedule.clone(),
                fired: entry.fired,
                next_fire: entry.next_fire,
                registered_at: entry.registered_at,
            })
            .collect();
        summaries.sort_by(|a, b| a.workflow_id.cmp(&b.workflow_id));
        Ok(summaries)
    }

    async fn remove_jobs(&self, state: JobState) -> Result<Vec<String>, DispatchError> {
        if !state.is_terminal() {
            return Ok(Vec::new());
        }
        let mut registry = self.state.jobs.write().await;
        let removed: Vec<String> = registry
            .jobs
            .iter()
            .filter(|(_, entry)| entry.job.state == state)
            .map(|(job_id, _)| job_id.clone())
            .collect();
        for job_id in &removed {
            registry.jobs.remove(job_id);
        }
        Ok(removed)
    }

    async fn cleanup_finished(&self, max_age_hours: i64) -> Result<usize, DispatchError> {
        let cutoff = Utc::now() - ChronoDuration::hours(max_age_hours);
        let mut registry = self.state.jobs.write().await;
        let before = registry.jobs.len();
        registry.jobs.retain(|_, entry| {
            !entry.job.state.is_terminal() || entry.job.ended_at.map_or(true, |ended| ended > cutoff)
        });
        let removed = before - registry.jobs.len();
        if removed > 0 {
            debug!(
                "Removed {} job records older than {}h from '{}'",
                removed, max_age_hours, self.state.queue_name
            );
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::TaskSpec;
    use std::sync::atomic::AtomicUsize;

    struct InstantRunner;

    #[async_trait]
    impl NotebookRunner for InstantRunner {
        async fn run(&self, execution: &ExecutionTask) -> ExecutionResult {
            ExecutionResult {
                execution_id: execution.execution_id.clone(),
                workflow_id: execution.workflow.workflow_id.clone(),
                project_id: execution.workflow.project_id.clone(),
                notebook: execution.workflow.task.notebook.clone(),
                params: execution.workflow.task.params.clone(),
                output_location: Some("out.ipynb".to_string()),
                error: None,
                elapsed_seconds: 0.0,
                created_at: Utc::now(),
            }
        }
    }

    #[derive(Default)]
    struct CountingSink {
        count: AtomicUsize,
    }

    #[async_trait]
    impl ResultSink for CountingSink {
        async fn ingest(&self, _result: ExecutionResult, _task: &WorkflowTask) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn task(workflow_id: &str) -> WorkflowTask {
        WorkflowTask {
            workflow_id: workflow_id.to_string(),
            project_id: "analytics".to_string(),
            alias: workflow_id.to_string(),
            task: TaskSpec::new("daily.ipynb"),
        }
    }

    async fn queue(sink: Arc<CountingSink>) -> CronQueue {
        CronQueue::new("test", 2, Arc::new(InstantRunner), sink)
            .await
            .unwrap()
    }

    async fn wait_for_state(queue: &CronQueue, job_id: &str, state: JobState) -> JobOutcome {
        for _ in 0..100 {
            let outcome = queue.fetch_result(job_id).await.unwrap().unwrap();
            if outcome.job.state == state {
                return outcome;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("job {} never reached {}", job_id, state);
    }

    #[tokio::test]
    async fn test_enqueue_now_runs_and_stores_result() {
        let sink = Arc::new(CountingSink::default());
        let queue = queue(sink.clone()).await;

        let job_id = queue.enqueue_now(&task("wf-1")).await.unwrap();
        let outcome = wait_for_state(&queue, &job_id, JobState::Finished).await;

        assert_eq!(outcome.position, None);
        assert_eq!(outcome.result.unwrap().execution_id, job_id);
        assert_eq!(outcome.job.origin, JobOrigin::Manual);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sink.count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_schedule_recurring_replaces_entry() {
        let queue = queue(Arc::new(CountingSink::default())).await;
        let first = ScheduleSpec::cron("0 0 3 * * *");
        let second = ScheduleSpec::interval(600).with_start_offset(30);

        let id1 = queue.schedule_recurring(&task("wf-1"), &first).await.unwrap();
        let id2 = queue.schedule_recurring(&task("wf-1"), &second).await.unwrap();

        let entries = queue.list_recurring().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_ne!(id1, id2);
        assert_eq!(entries[0].entry_id, id2);
        assert_eq!(entries[0].schedule, second);
    }

    #[tokio::test]
    async fn test_closed_queue_is_unavailable() {
        let queue = queue(Arc::new(CountingSink::default())).await;
        queue
            .schedule_recurring(&task("wf-1"), &ScheduleSpec::interval(600).with_start_offset(30))
            .await
            .unwrap();

        assert_eq!(queue.close().await, 1);
        assert!(queue.is_closed());

        let err = queue.enqueue_now(&task("wf-1")).await.unwrap_err();
        assert!(matches!(err, DispatchError::Unavailable { .. }));
        assert!(queue.list_recurring().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_keeps_recent_and_active_jobs() {
        let queue = queue(Arc::new(CountingSink::default())).await;
        let job_id = queue.enqueue_now(&task("wf-1")).await.unwrap();
        wait_for_state(&queue, &job_id, JobState::Finished).await;

        assert_eq!(queue.cleanup_finished(1).await.unwrap(), 0);
        assert_eq!(queue.cleanup_finished(-1).await.unwrap(), 1);
        assert!(queue.fetch_result(&job_id).await.unwrap().is_none());
    }
}
