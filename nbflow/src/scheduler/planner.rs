//! Schedule validation and next-fire computation.
//!
//! Cron expressions are checked field by field first (so errors name the
//! offending field), then handed to the `cron` crate for evaluation. The
//! day-of-week field accepts 0-7 with both 0 and 7 meaning Sunday; numbers are
//! rewritten to day names before parsing because the `cron` crate counts
//! Sunday as 1.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use tracing::debug;

use super::{Repeat, ScalarValue, ScheduleData, ScheduleSpec, Trigger};
use crate::constants::planner::{CRON_FIELDS, HORIZON_DAYS, MAX_INTERVAL_SECONDS};
use crate::errors::ValidationError;

const DAY_NAMES: [&str; 8] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

/// Convert raw schedule data into a validated [`ScheduleSpec`].
pub fn validate(data: &ScheduleData) -> Result<ScheduleSpec, ValidationError> {
    let cron = data
        .cron
        .as_deref()
        .map(str::trim)
        .filter(|expr| !expr.is_empty());

    let trigger = match (cron, &data.interval) {
        (Some(_), Some(_)) => return Err(ValidationError::ConflictingTriggers),
        (None, None) => return Err(ValidationError::MissingTrigger),
        (Some(expr), None) => {
            let schedule = parse_cron(expr)?;
            ensure_upcoming(&schedule, expr, Utc::now())?;
            Trigger::Cron(expr.to_string())
        }
        (None, Some(value)) => Trigger::Interval(parse_interval(value)?),
    };

    let repeat = match &data.repeat {
        None => Repeat::Infinite,
        Some(value) => parse_repeat(value)?,
    };

    Ok(ScheduleSpec {
        trigger,
        repeat,
        start_offset_minutes: data.start_in_min,
    })
}

/// Next time the schedule fires.
///
/// Without `last_fire` this is the first fire: interval schedules fire at
/// `now + start_offset`, cron schedules at the first match strictly after
/// `now + start_offset`. Afterwards interval schedules advance from the
/// previous fire and cron schedules from whichever of `now`/`last_fire` is later.
pub fn next_fire(
    schedule: &ScheduleSpec,
    now: DateTime<Utc>,
    last_fire: Option<DateTime<Utc>>,
) -> Result<DateTime<Utc>, ValidationError> {
    let offset = Duration::minutes(i64::from(schedule.start_offset_minutes));

    match &schedule.trigger {
        Trigger::Cron(expr) => {
            let parsed = parse_cron(expr)?;
            let reference = match last_fire {
                Some(last) => now.max(last),
                None => now + offset,
            };
            upcoming(&parsed, reference).ok_or_else(|| ValidationError::NoUpcomingFire {
                expression: expr.clone(),
            })
        }
        Trigger::Interval(seconds) => {
            let next = match last_fire {
                None => now.checked_add_signed(offset),
                Some(last) => i64::try_from(*seconds)
                    .ok()
                    .and_then(Duration::try_seconds)
                    .and_then(|step| last.checked_add_signed(step)),
            };
            next.ok_or_else(|| ValidationError::InvalidInterval {
                value: seconds.to_string(),
            })
        }
    }
}

/// Whether an entry that already fired `fired` times may fire again.
pub fn may_fire_again(repeat: Repeat, fired: u32) -> bool {
    match repeat {
        Repeat::Infinite => true,
        Repeat::Times(n) => fired <= n,
    }
}

/// Parse a 6-field cron expression after range-checking each field.
pub fn parse_cron(expression: &str) -> Result<Schedule, ValidationError> {
    validate_6_field_cron(expression)?;

    let parts: Vec<&str> = expression.split_whitespace().collect();
    let dow = translate_day_of_week(parts[5]);
    let normalized = format!(
        "{} {} {} {} {} {}",
        parts[0], parts[1], parts[2], parts[3], parts[4], dow
    );

    Schedule::from_str(&normalized).map_err(|e| ValidationError::InvalidCron {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

fn upcoming(schedule: &Schedule, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let horizon = reference + Duration::days(HORIZON_DAYS);
    schedule
        .after(&reference)
        .next()
        .filter(|next| *next <= horizon)
}

fn ensure_upcoming(
    schedule: &Schedule,
    expression: &str,
    now: DateTime<Utc>,
) -> Result<(), ValidationError> {
    match upcoming(schedule, now) {
        Some(next) => {
            debug!("Cron '{}' next fires at {}", expression, next);
            Ok(())
        }
        None => Err(ValidationError::NoUpcomingFire {
            expression: expression.to_string(),
        }),
    }
}

fn parse_interval(value: &ScalarValue) -> Result<u64, ValidationError> {
    let seconds = match value {
        ScalarValue::Number(n) => Some(*n),
        ScalarValue::Text(s) => s.trim().parse::<i64>().ok(),
    };

    match seconds {
        Some(n) if n > 0 && n <= MAX_INTERVAL_SECONDS => Ok(n as u64),
        _ => Err(ValidationError::InvalidInterval {
            value: value.to_string(),
        }),
    }
}

fn parse_repeat(value: &ScalarValue) -> Result<Repeat, ValidationError> {
    let invalid = || ValidationError::InvalidRepeat {
        value: value.to_string(),
    };

    let count = match value {
        ScalarValue::Number(n) => *n,
        ScalarValue::Text(s) if s.trim().eq_ignore_ascii_case("infinite") => {
            return Ok(Repeat::Infinite)
        }
        ScalarValue::Text(s) => s.trim().parse::<i64>().map_err(|_| invalid())?,
    };

    u32::try_from(count).map(Repeat::Times).map_err(|_| invalid())
}

fn validate_6_field_cron(schedule: &str) -> Result<(), ValidationError> {
    let parts: Vec<&str> = schedule.split_whitespace().collect();

    if parts.len() != CRON_FIELDS {
        return Err(invalid_cron(
            schedule,
            format!(
                "expected {} fields (second minute hour day month dayofweek), got {}",
                CRON_FIELDS,
                parts.len()
            ),
        ));
    }

    let checks = [
        (parts[0], "second", 0, 59),
        (parts[1], "minute", 0, 59),
        (parts[2], "hour", 0, 23),
        (parts[3], "day", 1, 31),
        (parts[4], "month", 1, 12),
        (parts[5], "dayofweek", 0, 7),
    ];

    for (field, name, min, max) in checks {
        validate_cron_field(field, name, min, max).map_err(|reason| invalid_cron(schedule, reason))?;
    }

    Ok(())
}

fn validate_cron_field(field: &str, name: &str, min: u32, max: u32) -> Result<(), String> {
    for item in field.split(',') {
        validate_cron_item(item, name, min, max)?;
    }
    Ok(())
}

fn validate_cron_item(item: &str, name: &str, min: u32, max: u32) -> Result<(), String> {
    if item.is_empty() {
        return Err(format!("empty {} value", name));
    }

    let (base, step) = match item.split_once('/') {
        Some((base, step)) => (base, Some(step)),
        None => (item, None),
    };

    if let Some(step) = step {
        let step = step
            .parse::<u32>()
            .map_err(|_| format!("Invalid {} step value: {}", name, step))?;
        if step == 0 {
            return Err(format!("{} step value cannot be 0", name));
        }
    }

    if base == "*" || base == "?" {
        return Ok(());
    }

    // Month and weekday names are left to the cron parser
    if base.chars().all(|c| c.is_ascii_alphabetic() || c == '-') {
        return Ok(());
    }

    if let Some((start, end)) = base.split_once('-') {
        let start = parse_bounded(start, name, min, max)?;
        let end = parse_bounded(end, name, min, max)?;
        if start > end {
            return Err(format!("{} range {}-{} is reversed", name, start, end));
        }
        return Ok(());
    }

    parse_bounded(base, name, min, max).map(|_| ())
}

fn parse_bounded(value: &str, name: &str, min: u32, max: u32) -> Result<u32, String> {
    let parsed = value
        .parse::<u32>()
        .map_err(|_| format!("Invalid {} value: {}", name, value))?;
    if parsed < min || parsed > max {
        return Err(format!(
            "{} value {} is outside valid range {}-{}",
            name, parsed, min, max
        ));
    }
    Ok(parsed)
}

fn invalid_cron(expression: &str, reason: String) -> ValidationError {
    ValidationError::InvalidCron {
        expression: expression.to_string(),
        reason,
    }
}

/// Rewrite numeric weekdays (0-7, Sunday = 0 or 7) as names.
fn translate_day_of_week(field: &str) -> String {
    field
        .split(',')
        .map(|item| {
            let (base, step) = match item.split_once('/') {
                Some((base, step)) => (base, Some(step)),
                None => (item, None),
            };

            let translated = match base.split_once('-') {
                Some((start, end)) => match (start.parse::<usize>(), end.parse::<usize>()) {
                    (Ok(0), Ok(7)) => "SUN-SAT".to_string(),
                    // A range ending on Sunday-as-7 wraps in the cron crate's numbering
                    (Ok(s), Ok(7)) if s < 7 => format!("{}-SAT,SUN", DAY_NAMES[s]),
                    (Ok(s), Ok(e)) if s <= 7 && e <= 7 => {
                        format!("{}-{}", DAY_NAMES[s], DAY_NAMES[e])
                    }
                    _ => base.to_string(),
                },
                None => match base.parse::<usize>() {
                    Ok(n) if n <= 7 => DAY_NAMES[n].to_string(),
                    _ => base.to_string(),
                },
            };

            match step {
                Some(step) => format!("{}/{}", translated, step),
                None => translated,
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}
