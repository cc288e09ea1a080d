//! Next-run computation for cron schedules.
//!
//! Cron expressions are evaluated with the `cron` crate, which uses a
//! leading seconds field and numbers weekdays 1-7 from Sunday. Classic
//! 5-field expressions (weekdays 0-7, Sunday = 0 or 7) are normalized first.
//! Without an explicit timezone, expressions run in the system local zone.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::str::FromStr;

use super::types::CronSchedule;
use super::CronError;

/// Longest accepted `every` period (about 100 years)
pub const MAX_EVERY_MS: i64 = 100 * 365 * 24 * 3600 * 1000;

/// Next fire time strictly after `now_ms`, or `None` if the schedule will not fire again.
pub fn compute_next_run(schedule: &CronSchedule, now_ms: i64) -> Option<i64> {
    match schedule {
        CronSchedule::At { at_ms } => (*at_ms > now_ms).then_some(*at_ms),
        CronSchedule::Every { every_ms } if *every_ms > 0 => now_ms.checked_add(*every_ms),
        CronSchedule::Every { .. } => None,
        CronSchedule::Cron { expr, tz } => next_cron_fire(expr, tz.as_deref(), now_ms).ok().flatten(),
    }
}

/// Reject schedules that can never be evaluated
pub fn validate_schedule(schedule: &CronSchedule) -> Result<(), CronError> {
    match schedule {
        CronSchedule::At { .. } => Ok(()),
        CronSchedule::Every { every_ms } if *every_ms <= 0 || *every_ms > MAX_EVERY_MS => {
            Err(CronError::InvalidInterval(*every_ms))
        }
        CronSchedule::Every { .. } => Ok(()),
        CronSchedule::Cron { expr, tz } => {
            parse_expr(expr)?;
            if let Some(name) = tz {
                parse_tz(name)?;
            }
            Ok(())
        }
    }
}

/// Next fire of a cron expression after `now_ms`
pub fn next_cron_fire(expr: &str, tz: Option<&str>, now_ms: i64) -> Result<Option<i64>, CronError> {
    let schedule = parse_expr(expr)?;
    let Some(now) = DateTime::<Utc>::from_timestamp_millis(now_ms) else {
        return Ok(None);
    };
    let next = match tz {
        Some(name) => next_in(&schedule, &now.with_timezone(&parse_tz(name)?)),
        None => next_in(&schedule, &now.with_timezone(&Local)),
    };
    Ok(next)
}

/// Parse an ISO-8601 time for one-shot jobs. Times without an offset are local.
pub fn parse_at_time(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp_millis());
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .map(|dt| dt.timestamp_millis())
}

fn next_in<Z: TimeZone>(schedule: &Schedule, after: &DateTime<Z>) -> Option<i64> {
    schedule.after(after).next().map(|dt| dt.timestamp_millis())
}

fn parse_tz(name: &str) -> Result<Tz, CronError> {
    Tz::from_str(name).map_err(|_| CronError::UnknownTimezone(name.to_string()))
}

fn parse_expr(expr: &str) -> Result<Schedule, CronError> {
    let normalized = normalize_expr(expr);
    Schedule::from_str(&normalized).map_err(|e| CronError::InvalidExpression {
        expr: expr.to_string(),
        reason: e.to_string(),
    })
}

/// Convert a classic 5-field expression to the 6-field form (seconds first).
/// Expressions with 6-7 fields and `@` macros pass through unchanged.
pub fn normalize_expr(expr: &str) -> String {
    let trimmed = expr.trim();
    if trimmed.starts_with('@') {
        return trimmed.to_string();
    }
    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    if fields.len() != 5 {
        return fields.join(" ");
    }
    let weekdays = fields[4]
        .split(',')
        .map(map_weekday_token)
        .collect::<Vec<_>>()
        .join(",");
    format!("0 {} {} {} {} {}", fields[0], fields[1], fields[2], fields[3], weekdays)
}

/// Map one weekday list item from 0-7 (Sunday = 0/7) to 1-7 (Sunday = 1)
fn map_weekday_token(token: &str) -> String {
    let (base, step) = match token.split_once('/') {
        Some((base, step)) => (base, Some(step)),
        None => (token, None),
    };
    let with_step = |mapped: String| match step {
        Some(step) => format!("{}/{}", mapped, step),
        None => mapped,
    };

    if let Some((start, end)) = base.split_once('-') {
        if let (Ok(start), Ok(end)) = (start.parse::<u32>(), end.parse::<u32>()) {
            if end == 7 && start > 0 && step.is_none() {
                // "5-7" wraps to Sunday: Fri-Sat plus Sun
                return format!("{}-7,1", start + 1);
            }
            let end = if end == 7 { 7 } else { end % 7 + 1 };
            return with_step(format!("{}-{}", start % 7 + 1, end));
        }
        return token.to_string();
    }

    match base.parse::<u32>() {
        Ok(day) => with_step((day % 7 + 1).to_string()),
        Err(_) => token.to_string(),
    }
}
