//! Database record types (entities).
//!
//! This module contains the records persisted by the database layer and the
//! task spec they embed.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::defaults;
use crate::errors::ValidationError;
use crate::queue::WorkflowTask;
use crate::scheduler::ScheduleSpec;

pub const STATUS_OK: i32 = 0;
pub const STATUS_FAILED: i32 = -1;

// ============================================================================
// Workflow entities
// ============================================================================

/// What to run: a notebook, its parameters, and who hears about the outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSpec {
    pub notebook: String,
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
    /// Seconds; passed through to the runner
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub notifications_ok: Vec<String>,
    #[serde(default)]
    pub notifications_fail: Vec<String>,
}

fn default_timeout() -> u64 {
    defaults::TASK_TIMEOUT_SECONDS
}

impl TaskSpec {
    pub fn new(notebook: &str) -> Self {
        Self {
            notebook: notebook.to_string(),
            params: BTreeMap::new(),
            timeout: default_timeout(),
            notifications_ok: Vec::new(),
            notifications_fail: Vec::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: serde_json::Value) -> Self {
        self.params.insert(key.to_string(), value);
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout = seconds;
        self
    }

    pub fn notify_ok(mut self, channels: &[&str]) -> Self {
        self.notifications_ok = channels.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn notify_fail(mut self, channels: &[&str]) -> Self {
        self.notifications_fail = channels.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.notebook.trim().is_empty() {
            return Err(invalid_task("notebook", "must not be empty"));
        }
        if self.timeout == 0 {
            return Err(invalid_task("timeout", "must be greater than zero"));
        }
        if self.params.keys().any(|k| k.trim().is_empty()) {
            return Err(invalid_task("params", "parameter names must not be empty"));
        }
        let channels = self.notifications_ok.iter().chain(&self.notifications_fail);
        for channel in channels {
            if channel.trim().is_empty() {
                return Err(invalid_task("notifications", "channel names must not be empty"));
            }
        }
        Ok(())
    }
}

fn invalid_task(field: &str, reason: &str) -> ValidationError {
    ValidationError::InvalidTask {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowDefinition {
    pub workflow_id: String,
    pub project_id: String,
    pub alias: String,
    pub task: TaskSpec,
    pub schedule: Option<ScheduleSpec>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowDefinition {
    /// Snapshot handed to the queue on dispatch
    pub fn to_task(&self) -> WorkflowTask {
        WorkflowTask {
            workflow_id: self.workflow_id.clone(),
            project_id: self.project_id.clone(),
            alias: self.alias.clone(),
            task: self.task.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectRecord {
    pub project_id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Execution entities
// ============================================================================

/// Outcome of a single notebook run, as reported by the runner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResult {
    pub execution_id: String,
    pub workflow_id: String,
    pub project_id: String,
    pub notebook: String,
    pub params: BTreeMap<String, serde_json::Value>,
    pub output_location: Option<String>,
    pub error: Option<String>,
    pub elapsed_seconds: f64,
    pub created_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn status(&self) -> i32 {
        if self.error.is_some() {
            STATUS_FAILED
        } else {
            STATUS_OK
        }
    }
}

/// Persisted history row: the full result plus its derived status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryRecord {
    pub execution_id: String,
    pub workflow_id: String,
    pub project_id: String,
    pub notebook: String,
    pub status: i32,
    pub elapsed_seconds: f64,
    pub result: ExecutionResult,
    pub created_at: DateTime<Utc>,
}

impl HistoryRecord {
    pub fn from_result(result: ExecutionResult) -> Self {
        Self {
            execution_id: result.execution_id.clone(),
            workflow_id: result.workflow_id.clone(),
            project_id: result.project_id.clone(),
            notebook: result.notebook.clone(),
            status: result.status(),
            elapsed_seconds: result.elapsed_seconds,
            created_at: result.created_at,
            result,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }
}
