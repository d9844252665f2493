//! Recording doubles for the runner, result sink and channel sender
//!
//! Each double keeps what it was asked to do so tests can assert on it.

use async_trait::async_trait;
use chrono::Utc;
use nbflow::queue::{ExecutionTask, NotebookRunner, ResultSink, WorkflowTask};
use nbflow::services::{ChannelSender, NotifyError};
use nbflow::ExecutionResult;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};

/// Notebooks whose name starts with this prefix produce a failed result
pub const BROKEN_PREFIX: &str = "broken";

/// Runner that returns immediately, or waits for `release` when gated
pub struct RecordingRunner {
    executions: Mutex<Vec<ExecutionTask>>,
    gate: Option<Arc<Semaphore>>,
}

impl RecordingRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            executions: Mutex::new(Vec::new()),
            gate: None,
        })
    }

    pub fn gated() -> Arc<Self> {
        Arc::new(Self {
            executions: Mutex::new(Vec::new()),
            gate: Some(Arc::new(Semaphore::new(0))),
        })
    }

    /// Let `n` gated executions finish
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub async fn executions(&self) -> Vec<ExecutionTask> {
        self.executions.lock().await.clone()
    }

    pub async fn execution_count(&self) -> usize {
        self.executions.lock().await.len()
    }
}

#[async_trait]
impl NotebookRunner for RecordingRunner {
    async fn run(&self, execution: &ExecutionTask) -> ExecutionResult {
        self.executions.lock().await.push(execution.clone());

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let notebook = &execution.workflow.task.notebook;
        let error = notebook
            .starts_with(BROKEN_PREFIX)
            .then(|| format!("{} raised an exception", notebook));

        ExecutionResult {
            execution_id: execution.execution_id.clone(),
            workflow_id: execution.workflow.workflow_id.clone(),
            project_id: execution.workflow.project_id.clone(),
            notebook: notebook.clone(),
            params: execution.workflow.task.params.clone(),
            output_location: error.is_none().then(|| format!("outputs/{}", notebook)),
            error,
            elapsed_seconds: 0.5,
            created_at: Utc::now(),
        }
    }
}

/// Sink that keeps every ingested result
#[derive(Default)]
pub struct RecordingSink {
    results: Mutex<Vec<(ExecutionResult, WorkflowTask)>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn results(&self) -> Vec<(ExecutionResult, WorkflowTask)> {
        self.results.lock().await.clone()
    }

    /// Poll until at least `count` results arrived or `timeout` passed
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let current = self.results.lock().await.len();
            if current >= count || tokio::time::Instant::now() >= deadline {
                return current;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

#[async_trait]
impl ResultSink for RecordingSink {
    async fn ingest(&self, result: ExecutionResult, task: &WorkflowTask) {
        self.results.lock().await.push((result, task.clone()));
    }
}

/// Channel sender that knows a fixed set of channels and records messages
pub struct RecordingSender {
    known: HashSet<String>,
    failing: HashSet<String>,
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingSender {
    pub fn new(known: &[&str]) -> Arc<Self> {
        Self::with_failures(known, &[])
    }

    /// `failing` channels are known but every delivery to them fails
    pub fn with_failures(known: &[&str], failing: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            known: known.iter().map(|c| c.to_string()).collect(),
            failing: failing.iter().map(|c| c.to_string()).collect(),
            sent: Mutex::new(Vec::new()),
        })
    }

    /// Delivered (channel, message) pairs in send order
    pub async fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().await.clone()
    }

    pub async fn wait_for(&self, count: usize, timeout: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let current = self.sent.lock().await.len();
            if current >= count || tokio::time::Instant::now() >= deadline {
                return current;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

#[async_trait]
impl ChannelSender for RecordingSender {
    async fn send(&self, channel: &str, message: &str) -> Result<(), NotifyError> {
        if !self.known.contains(channel) {
            return Err(NotifyError::UnknownChannel(channel.to_string()));
        }
        if self.failing.contains(channel) {
            return Err(NotifyError::Delivery {
                channel: channel.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        self.sent
            .lock()
            .await
            .push((channel.to_string(), message.to_string()));
        Ok(())
    }
}
