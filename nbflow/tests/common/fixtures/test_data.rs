//! Common test data and constants

use chrono::{DateTime, Duration, TimeZone, Utc};
use nbflow::scheduler::ScalarValue;
use nbflow::{ExecutionResult, ScheduleData, TaskSpec};
use serde_json::json;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Generate a random execution ID for testing
pub fn random_execution_id() -> String {
    Uuid::new_v4().to_string()
}

/// Fixed reference instant, 2026-03-01 00:00:00 UTC
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
}

/// Common test project ids
pub mod projects {
    pub const ANALYTICS: &str = "analytics";
    pub const MISSING: &str = "no-such-project";
}

/// Common channel names
pub mod channels {
    pub const SLACK: &str = "team-slack";
    pub const DISCORD: &str = "ops-discord";
    pub const UNKNOWN: &str = "nobody";
}

pub fn sample_task() -> TaskSpec {
    TaskSpec::new("daily.ipynb")
        .with_param("region", json!("eu"))
        .with_param("days", json!(7))
        .notify_ok(&[channels::SLACK])
        .notify_fail(&[channels::DISCORD])
}

pub fn cron_schedule(expression: &str) -> ScheduleData {
    ScheduleData {
        cron: Some(expression.to_string()),
        ..ScheduleData::default()
    }
}

pub fn interval_schedule(seconds: i64) -> ScheduleData {
    ScheduleData {
        interval: Some(ScalarValue::Number(seconds)),
        ..ScheduleData::default()
    }
}

/// Execution result for `workflow_id` created `offset_secs` after `base_time()`
pub fn sample_result(workflow_id: &str, offset_secs: i64, error: Option<&str>) -> ExecutionResult {
    ExecutionResult {
        execution_id: random_execution_id(),
        workflow_id: workflow_id.to_string(),
        project_id: projects::ANALYTICS.to_string(),
        notebook: "daily.ipynb".to_string(),
        params: BTreeMap::new(),
        output_location: error.is_none().then(|| "outputs/daily.ipynb".to_string()),
        error: error.map(str::to_string),
        elapsed_seconds: 3.0,
        created_at: base_time() + Duration::seconds(offset_secs),
    }
}
