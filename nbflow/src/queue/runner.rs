//! Notebook execution
//!
//! The queue hands every started job to a `NotebookRunner`. The default
//! `CommandRunner` shells out to papermill (or any command with the same
//! `<input> <output> -p key value` convention).

use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};

use super::ExecutionTask;
use crate::config::RunnerConfig;
use crate::database::ExecutionResult;

/// Bytes of stderr kept in a failed result
const STDERR_TAIL_BYTES: usize = 2000;

#[async_trait]
pub trait NotebookRunner: Send + Sync {
    /// Execute one task. Failures are reported through `ExecutionResult::error`.
    async fn run(&self, execution: &ExecutionTask) -> ExecutionResult;
}

pub struct CommandRunner {
    command: String,
    notebooks_dir: PathBuf,
    output_dir: PathBuf,
}

impl CommandRunner {
    pub fn new(command: &str, notebooks_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            command: command.to_string(),
            notebooks_dir: notebooks_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    pub fn from_config(config: &RunnerConfig) -> Self {
        Self::new(&config.command, &config.notebooks_dir, &config.output_dir)
    }

    pub fn input_path(&self, execution: &ExecutionTask) -> PathBuf {
        self.notebooks_dir.join(&execution.workflow.task.notebook)
    }

    /// `<output_dir>/<project>/<workflow_id>/<execution_id>-<notebook file>`
    pub fn output_path(&self, execution: &ExecutionTask) -> PathBuf {
        let notebook_file = Path::new(&execution.workflow.task.notebook)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output.ipynb".to_string());

        self.output_dir
            .join(&execution.workflow.project_id)
            .join(&execution.workflow.workflow_id)
            .join(format!("{}-{}", execution.execution_id, notebook_file))
    }

    fn build_command(&self, execution: &ExecutionTask, output: &Path) -> Command {
        let mut command = Command::new(&self.command);
        command.arg(self.input_path(execution)).arg(output);
        for (key, value) in &execution.workflow.task.params {
            command.arg("-p").arg(key).arg(param_value(value));
        }
        command.kill_on_drop(true);
        command
    }
}

#[async_trait]
impl NotebookRunner for CommandRunner {
    async fn run(&self, execution: &ExecutionTask) -> ExecutionResult {
        let started = Instant::now();
        let output = self.output_path(execution);
        let timeout = Duration::from_secs(execution.workflow.task.timeout);

        let error = match prepare_output_dir(&output).await {
            Err(e) => Some(e),
            Ok(()) => {
                debug!(
                    "Running {} for execution {} -> {}",
                    self.command,
                    execution.execution_id,
                    output.display()
                );
                let mut command = self.build_command(execution, &output);
                match tokio::time::timeout(timeout, command.output()).await {
                    Ok(Ok(out)) if out.status.success() => None,
                    Ok(Ok(out)) => Some(format!(
                        "{} exited with {}: {}",
                        self.command,
                        out.status,
                        stderr_tail(&out.stderr)
                    )),
                    Ok(Err(e)) => Some(format!("Failed to start {}: {}", self.command, e)),
                    Err(_) => Some(format!(
                        "Execution timed out after {} seconds",
                        timeout.as_secs()
                    )),
                }
            }
        };

        if let Some(error) = &error {
            warn!("Execution {} failed: {}", execution.execution_id, error);
        }

        ExecutionResult {
            execution_id: execution.execution_id.clone(),
            workflow_id: execution.workflow.workflow_id.clone(),
            project_id: execution.workflow.project_id.clone(),
            notebook: execution.workflow.task.notebook.clone(),
            params: execution.workflow.task.params.clone(),
            output_location: error
                .is_none()
                .then(|| output.to_string_lossy().into_owned()),
            error,
            elapsed_seconds: started.elapsed().as_secs_f64(),
            created_at: Utc::now(),
        }
    }
}

async fn prepare_output_dir(output: &Path) -> Result<(), String> {
    match output.parent() {
        Some(parent) => tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("Failed to create output directory {}: {}", parent.display(), e)),
        None => Ok(()),
    }
}

/// Strings are passed raw; everything else as JSON text
fn param_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();
    if trimmed.len() <= STDERR_TAIL_BYTES {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - STDERR_TAIL_BYTES;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_string()
}
