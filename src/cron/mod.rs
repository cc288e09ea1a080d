//! Persistent job scheduler.
//!
//! Jobs live in a JSON store (`~/.pocketbot/cron/jobs.json`) and fire on
//! one of three schedules: once at a timestamp, at a fixed period, or by
//! cron expression. A single ticker task sleeps until the earliest due job
//! and hands each due job to the registered callback.

pub mod schedule;
pub mod service;
pub mod types;

pub use schedule::{compute_next_run, normalize_expr, parse_at_time, validate_schedule};
pub use service::{AddJob, CronService, JobCallback};
pub use types::{
    CronJob, CronJobState, CronPayload, CronSchedule, CronStatus, CronStore, JobStatus, PayloadKind,
    CRON_STORE_VERSION,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CronError {
    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidExpression { expr: String, reason: String },

    #[error("unknown timezone: {0}")]
    UnknownTimezone(String),

    #[error("interval must be positive and at most 100 years, got {0}ms")]
    InvalidInterval(i64),

    #[error("cron store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cron store serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
