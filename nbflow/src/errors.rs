//! Error taxonomy for the workflow scheduler
//!
//! Every component maps its backend failures (sqlx, the job scheduler, the
//! runner) into one of these kinds before returning. Callers only ever see a
//! `WorkflowError`.

use std::fmt;

pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Main error type for the scheduler core
#[derive(Debug)]
pub enum WorkflowError {
    /// Malformed schedule or task spec, rejected before any mutation
    Validation(ValidationError),

    /// Alias already registered under the project
    Conflict {
        project_id: String,
        alias: String,
        existing_workflow_id: String,
    },

    /// Unknown project, workflow or job
    NotFound(NotFoundError),

    /// Queue backend failure; the caller decides whether to retry
    Dispatch(DispatchError),

    /// Database failure; fatal for the current operation
    Storage(StorageError),
}

/// Validation error variants
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Update issued without schedule data
    MissingSchedule,

    /// Both `cron` and `interval` were given
    ConflictingTriggers,

    /// Neither `cron` nor `interval` was given
    MissingTrigger,

    /// Cron expression does not parse as a 6-field expression
    InvalidCron { expression: String, reason: String },

    /// Cron expression never fires within the planning horizon
    NoUpcomingFire { expression: String },

    /// Interval is not a positive number of seconds
    InvalidInterval { value: String },

    /// Repeat is neither a non-negative integer nor "infinite"
    InvalidRepeat { value: String },

    /// Task spec field rejected
    InvalidTask { field: String, reason: String },
}

/// Lookup failures
#[derive(Debug, Clone, PartialEq)]
pub enum NotFoundError {
    Project { project_id: String },
    Workflow { workflow_id: String },
    Job { job_id: String },
}

/// Queue backend error variants
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchError {
    /// Queue is closed or its scheduler cannot be reached
    Unavailable { queue: String, reason: String },

    /// The backend refused to register a job for the workflow
    SchedulingFailed { workflow_id: String, reason: String },
}

/// Database error variants
#[derive(Debug, Clone, PartialEq)]
pub enum StorageError {
    /// Connection failed or the pool is closed
    ConnectionFailed { reason: String },

    /// Query execution failed
    QueryFailed { operation: String, reason: String },

    /// Stored JSON could not be encoded or decoded
    Serialization { reason: String },
}

impl WorkflowError {
    pub fn project_not_found(project_id: &str) -> Self {
        WorkflowError::NotFound(NotFoundError::Project {
            project_id: project_id.to_string(),
        })
    }

    pub fn workflow_not_found(workflow_id: &str) -> Self {
        WorkflowError::NotFound(NotFoundError::Workflow {
            workflow_id: workflow_id.to_string(),
        })
    }

    pub fn job_not_found(job_id: &str) -> Self {
        WorkflowError::NotFound(NotFoundError::Job {
            job_id: job_id.to_string(),
        })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, WorkflowError::Validation(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, WorkflowError::NotFound(_))
    }

    pub fn is_dispatch(&self) -> bool {
        matches!(self, WorkflowError::Dispatch(_))
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, WorkflowError::Storage(_))
    }

    /// Only queue failures are worth retrying from the caller's side
    pub fn is_retryable(&self) -> bool {
        self.is_dispatch()
    }
}

impl StorageError {
    /// Classify a sqlx error raised while running `operation`
    pub fn from_sqlx(operation: &str, err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                StorageError::ConnectionFailed {
                    reason: err.to_string(),
                }
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StorageError::Serialization {
                    reason: err.to_string(),
                }
            }
            _ => StorageError::QueryFailed {
                operation: operation.to_string(),
                reason: err.to_string(),
            },
        }
    }
}

/// Shorthand used with `map_err` at sqlx call sites
pub fn storage(operation: &'static str) -> impl FnOnce(sqlx::Error) -> WorkflowError {
    move |err| WorkflowError::Storage(StorageError::from_sqlx(operation, err))
}

impl fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowError::Validation(e) => write!(f, "Validation error: {}", e),
            WorkflowError::Conflict {
                project_id,
                alias,
                existing_workflow_id,
            } => write!(
                f,
                "Workflow '{}' already exists in project '{}' as {}",
                alias, project_id, existing_workflow_id
            ),
            WorkflowError::NotFound(e) => write!(f, "Not found: {}", e),
            WorkflowError::Dispatch(e) => write!(f, "Dispatch error: {}", e),
            WorkflowError::Storage(e) => write!(f, "Storage error: {}", e),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::MissingSchedule => write!(f, "schedule information is needed"),
            ValidationError::ConflictingTriggers => {
                write!(f, "cron and interval are mutually exclusive")
            }
            ValidationError::MissingTrigger => {
                write!(f, "schedule needs either a cron expression or an interval")
            }
            ValidationError::InvalidCron { expression, reason } => {
                write!(f, "Invalid cron expression '{}': {}", expression, reason)
            }
            ValidationError::NoUpcomingFire { expression } => {
                write!(f, "Cron expression '{}' never fires", expression)
            }
            ValidationError::InvalidInterval { value } => {
                write!(f, "Interval must be a positive number of seconds, got '{}'", value)
            }
            ValidationError::InvalidRepeat { value } => write!(
                f,
                "Repeat must be a non-negative integer or \"infinite\", got '{}'",
                value
            ),
            ValidationError::InvalidTask { field, reason } => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
        }
    }
}

impl fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotFoundError::Project { project_id } => write!(f, "project '{}'", project_id),
            NotFoundError::Workflow { workflow_id } => write!(f, "workflow '{}'", workflow_id),
            NotFoundError::Job { job_id } => write!(f, "job '{}'", job_id),
        }
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::Unavailable { queue, reason } => {
                write!(f, "Queue '{}' unavailable: {}", queue, reason)
            }
            DispatchError::SchedulingFailed {
                workflow_id,
                reason,
            } => write!(f, "Failed to schedule {}: {}", workflow_id, reason),
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ConnectionFailed { reason } => {
                write!(f, "Database connection failed: {}", reason)
            }
            StorageError::QueryFailed { operation, reason } => {
                write!(f, "Query '{}' failed: {}", operation, reason)
            }
            StorageError::Serialization { reason } => {
                write!(f, "Serialization error: {}", reason)
            }
        }
    }
}

impl std::error::Error for WorkflowError {}
impl std::error::Error for ValidationError {}
impl std::error::Error for NotFoundError {}
impl std::error::Error for DispatchError {}
impl std::error::Error for StorageError {}

impl From<ValidationError> for WorkflowError {
    fn from(err: ValidationError) -> Self {
        WorkflowError::Validation(err)
    }
}

impl From<NotFoundError> for WorkflowError {
    fn from(err: NotFoundError) -> Self {
        WorkflowError::NotFound(err)
    }
}

impl From<DispatchError> for WorkflowError {
    fn from(err: DispatchError) -> Self {
        WorkflowError::Dispatch(err)
    }
}

impl From<StorageError> for WorkflowError {
    fn from(err: StorageError) -> Self {
        WorkflowError::Storage(err)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization {
            reason: err.to_string(),
        }
    }
}
