pub mod manager;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
pub use manager::ConfigManager;

use crate::constants::{cleanup, defaults, queue};
use crate::database::TaskSpec;
use crate::scheduler::ScheduleData;
use crate::services::ChannelConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_queue_name")]
    pub queue_name: String,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_job_retention_hours")]
    pub job_retention_hours: i64,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub channels: HashMap<String, ChannelConfig>,
    // Populated from individual project config files
    #[serde(skip)]
    pub projects: BTreeMap<String, ProjectConfig>,
}

fn default_database_path() -> String {
    defaults::DATABASE_PATH.to_string()
}

fn default_queue_name() -> String {
    queue::DEFAULT_QUEUE_NAME.to_string()
}

fn default_max_workers() -> usize {
    queue::DEFAULT_MAX_WORKERS
}

fn default_job_retention_hours() -> i64 {
    cleanup::JOB_RETENTION_HOURS
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunnerConfig {
    #[serde(default = "default_runner_command")]
    pub command: String,
    #[serde(default = "default_notebooks_dir")]
    pub notebooks_dir: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            command: default_runner_command(),
            notebooks_dir: default_notebooks_dir(),
            output_dir: default_output_dir(),
        }
    }
}

fn default_runner_command() -> String {
    defaults::RUNNER_COMMAND.to_string()
}

fn default_notebooks_dir() -> String {
    defaults::NOTEBOOKS_DIR.to_string()
}

fn default_output_dir() -> String {
    defaults::OUTPUT_DIR.to_string()
}

/// Layout of one `<project>.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfigFile {
    pub project: ProjectInfo,
    #[serde(default)]
    pub workflows: BTreeMap<String, WorkflowConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectInfo {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowConfig {
    #[serde(flatten)]
    pub task: TaskSpec,
    pub schedule: Option<ScheduleData>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectConfig {
    /// File stem of the project's config file
    pub project_id: String,
    pub name: String,
    pub description: Option<String>,
    pub workflows: BTreeMap<String, WorkflowConfig>,
}
