//! Schedule types, planning, and the workflow lifecycle facade
//!
//! This module provides:
//! - `ScheduleData`: the raw schedule shape accepted from configuration or callers
//! - `ScheduleSpec`: the validated form, where cron and interval are exclusive by type
//! - `planner`: validation and next-fire computation
//! - `SchedulerExecutor`: register/update/delete/run workflows against the store and queue
//!
//! # Cron format
//!
//! Cron expressions use 6 fields (sec min hour day month dow):
//!
//! ```toml
//! [workflows.daily-report.schedule]
//! cron = "0 0 8 * * *"   # Daily at 8 AM
//! repeat = "infinite"
//!
//! [workflows.poller.schedule]
//! interval = 300          # Every five minutes
//! repeat = 10             # First run plus ten repeats
//! start_in_min = 5
//! ```

pub mod executor;
pub mod locks;
pub mod planner;

pub use executor::{Registration, SchedulerExecutor, SyncOutcome};
pub use locks::WorkflowLocks;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw schedule as it arrives from TOML or JSON. Converted once by
/// [`planner::validate`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScheduleData {
    #[serde(default)]
    pub cron: Option<String>,
    #[serde(default)]
    pub interval: Option<ScalarValue>,
    #[serde(default)]
    pub repeat: Option<ScalarValue>,
    #[serde(default)]
    pub start_in_min: u32,
}

/// Integer-or-string scalar; intervals historically arrive as strings ("5").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ScalarValue {
    Number(i64),
    Text(String),
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Number(n) => write!(f, "{}", n),
            ScalarValue::Text(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// 6-field cron expression
    Cron(String),
    /// Seconds between fires
    Interval(u64),
}

/// How many more times an entry fires after its first fire
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Repeat {
    Times(u32),
    Infinite,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduleSpec {
    pub trigger: Trigger,
    pub repeat: Repeat,
    pub start_offset_minutes: u32,
}

impl ScheduleSpec {
    pub fn cron(expression: &str) -> Self {
        Self {
            trigger: Trigger::Cron(expression.to_string()),
            repeat: Repeat::Infinite,
            start_offset_minutes: 0,
        }
    }

    pub fn interval(seconds: u64) -> Self {
        Self {
            trigger: Trigger::Interval(seconds),
            repeat: Repeat::Infinite,
            start_offset_minutes: 0,
        }
    }

    pub fn with_repeat(mut self, repeat: Repeat) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn with_start_offset(mut self, minutes: u32) -> Self {
        self.start_offset_minutes = minutes;
        self
    }
}

impl fmt::Display for ScheduleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.trigger {
            Trigger::Cron(expr) => write!(f, "cron '{}'", expr)?,
            Trigger::Interval(secs) => write!(f, "every {}s", secs)?,
        }
        match self.repeat {
            Repeat::Times(n) => write!(f, ", repeat {}", n)?,
            Repeat::Infinite => write!(f, ", repeat forever")?,
        }
        if self.start_offset_minutes > 0 {
            write!(f, ", starting in {}m", self.start_offset_minutes)?;
        }
        Ok(())
    }
}
