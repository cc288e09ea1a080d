//! Cron job types and the persisted store format.

use serde::{Deserialize, Serialize};

/// Current on-disk store version
pub const CRON_STORE_VERSION: u32 = 1;

/// When a job fires
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CronSchedule {
    /// Once, at an absolute time (Unix ms)
    At {
        #[serde(rename = "atMs")]
        at_ms: i64,
    },
    /// Repeatedly, every period (ms)
    Every {
        #[serde(rename = "everyMs")]
        every_ms: i64,
    },
    /// Cron expression, optionally in an IANA timezone
    Cron {
        expr: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tz: Option<String>,
    },
}

impl CronSchedule {
    pub fn every_secs(secs: i64) -> Self {
        Self::Every {
            every_ms: secs.saturating_mul(1000),
        }
    }

    pub fn cron(expr: &str, tz: Option<&str>) -> Self {
        Self::Cron {
            expr: expr.to_string(),
            tz: tz.map(|t| t.to_string()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::At { .. } => "at",
            Self::Every { .. } => "every",
            Self::Cron { .. } => "cron",
        }
    }

    /// Short human description for listings
    pub fn describe(&self) -> String {
        match self {
            Self::At { at_ms } => match chrono::DateTime::from_timestamp_millis(*at_ms) {
                Some(dt) => format!("at {}", dt.format("%Y-%m-%d %H:%M UTC")),
                None => format!("at {}ms", at_ms),
            },
            Self::Every { every_ms } => format!("every {}s", every_ms / 1000),
            Self::Cron { expr, tz: Some(tz) } => format!("{} ({})", expr, tz),
            Self::Cron { expr, tz: None } => expr.clone(),
        }
    }
}

/// What a job does when it fires
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    SystemEvent,
    #[default]
    AgentTurn,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronPayload {
    #[serde(default)]
    pub kind: PayloadKind,
    #[serde(default)]
    pub message: String,
    /// Forward the agent's response to `channel`/`to`
    #[serde(default)]
    pub deliver: bool,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
}

/// Outcome of the last run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Ok,
    Error,
    Skipped,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Skipped => "skipped",
        }
    }
}

/// Runtime state of a job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronJobState {
    #[serde(default)]
    pub next_run_at_ms: Option<i64>,
    #[serde(default)]
    pub last_run_at_ms: Option<i64>,
    #[serde(default)]
    pub last_status: Option<JobStatus>,
    #[serde(default)]
    pub last_error: Option<String>,
}

/// A scheduled job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronJob {
    pub id: String,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub schedule: CronSchedule,
    #[serde(default)]
    pub payload: CronPayload,
    #[serde(default)]
    pub state: CronJobState,
    #[serde(default)]
    pub created_at_ms: i64,
    #[serde(default)]
    pub updated_at_ms: i64,
    /// One-shot jobs only: delete instead of disabling after firing
    #[serde(default)]
    pub delete_after_run: bool,
}

fn default_enabled() -> bool {
    true
}

/// Persisted job collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronStore {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub jobs: Vec<CronJob>,
}

fn default_version() -> u32 {
    CRON_STORE_VERSION
}

impl Default for CronStore {
    fn default() -> Self {
        Self {
            version: CRON_STORE_VERSION,
            jobs: Vec::new(),
        }
    }
}

/// Service summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CronStatus {
    /// Ticker running
    pub enabled: bool,
    pub jobs: usize,
    pub next_wake_at_ms: Option<i64>,
}
