pub mod config;
pub mod constants;
pub mod database;
pub mod errors;
pub mod queue;
pub mod scheduler;
pub mod services;

// Re-export commonly used types
pub use config::{Config, ConfigManager, ProjectConfig, WorkflowConfig};
pub use database::{Database, ExecutionResult, HistoryRecord, TaskSpec, WorkflowDefinition};
pub use errors::{WorkflowError, WorkflowResult};
pub use queue::{CommandRunner, CronQueue, QueueBackend, QueueDispatcher, WorkflowTask};
pub use scheduler::{Registration, ScheduleData, ScheduleSpec, SchedulerExecutor};
pub use services::{ExecutionReporter, HistoryRecorder, NotificationDispatcher, WebhookChannels};
