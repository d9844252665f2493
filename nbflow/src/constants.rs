//! Central repository for timeouts, limits and default configuration values
//!
//! Constants are grouped by concern so that config defaults, the queue and the
//! planner agree on the same numbers.

/// Schedule planning constants
pub mod planner {
    /// Cron expressions must fire at least once within this many days
    pub const HORIZON_DAYS: i64 = 5 * 366;

    /// Longest accepted interval, the same horizon in seconds
    pub const MAX_INTERVAL_SECONDS: i64 = HORIZON_DAYS * 24 * 3600;

    /// Number of fields in a second-level cron expression
    pub const CRON_FIELDS: usize = 6;
}

/// Queue and worker pool constants
pub mod queue {
    /// Logical queue used when main.toml does not name one
    pub const DEFAULT_QUEUE_NAME: &str = "default";

    /// Concurrent notebook executions per queue
    pub const DEFAULT_MAX_WORKERS: usize = 4;
}

/// Cleanup and retention constants
pub mod cleanup {
    /// Hours a finished/failed/cancelled job record is kept in the queue registry
    pub const JOB_RETENTION_HOURS: i64 = 48;

    /// Cleanup interval in seconds
    pub const CLEANUP_INTERVAL_SECONDS: u64 = 3600; // 1 hour
}

/// Notification constants
pub mod notifications {
    /// Webhook request timeout
    pub const WEBHOOK_TIMEOUT_SECONDS: u64 = 10;

    pub const EMOJI_OK: &str = "✅";
    pub const EMOJI_ERROR: &str = "🔥";
}

/// Default values for task specs and the notebook runner
pub mod defaults {
    /// Default notebook timeout hint in seconds (3 hours)
    pub const TASK_TIMEOUT_SECONDS: u64 = 10800;

    /// Default history page size
    pub const HISTORY_LIMIT: u32 = 1;

    /// Command used to execute notebooks
    pub const RUNNER_COMMAND: &str = "papermill";

    pub const NOTEBOOKS_DIR: &str = "notebooks";

    pub const OUTPUT_DIR: &str = "outputs";

    pub const DATABASE_PATH: &str = "data/nbflow.db";
}
