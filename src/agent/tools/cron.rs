//! Cron tool: lets the agent schedule reminders and recurring tasks.

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::Arc;

use super::{optional_str, required_str, Schema, Tool, ToolContext};
use crate::cron::{parse_at_time, AddJob, CronSchedule, CronService};
use crate::utils::short_label;

pub struct CronTool {
    service: Arc<CronService>,
    context: Mutex<ToolContext>,
}

impl CronTool {
    pub fn new(service: Arc<CronService>) -> Self {
        Self {
            service,
            context: Mutex::new(ToolContext::default()),
        }
    }

    /// Where new jobs deliver their results
    pub fn set_context(&self, channel: &str, chat_id: &str) {
        *self.context.lock() = ToolContext {
            channel: channel.to_string(),
            chat_id: chat_id.to_string(),
        };
    }

    async fn add(&self, args: &Map<String, Value>) -> Result<String> {
        let message = required_str(args, "message")?;
        let schedule = schedule_from_args(args)?;
        let one_shot = matches!(schedule, CronSchedule::At { .. });

        let ctx = self.context.lock().clone();
        let mut request = AddJob::new(short_label(message, 30), schedule, message)
            .deliver_to(ctx.channel, ctx.chat_id);
        if one_shot {
            request = request.delete_after_run();
        }

        let job = self.service.add_job(request).await?;
        Ok(format!("Created job '{}' (id: {}, {})", job.name, job.id, job.schedule.describe()))
    }

    async fn list(&self) -> Result<String> {
        let jobs = self.service.list_jobs(false).await;
        if jobs.is_empty() {
            return Ok("No scheduled jobs.".to_string());
        }
        let lines: Vec<String> = jobs
            .iter()
            .map(|j| format!("- {} (id: {}, {})", j.name, j.id, j.schedule.describe()))
            .collect();
        Ok(format!("Scheduled jobs:\n{}", lines.join("\n")))
    }

    async fn remove(&self, args: &Map<String, Value>) -> Result<String> {
        let id = required_str(args, "job_id")?;
        if self.service.remove_job(id).await? {
            Ok(format!("Removed job {}", id))
        } else {
            Ok(format!("Job {} not found", id))
        }
    }
}

fn schedule_from_args(args: &Map<String, Value>) -> Result<CronSchedule> {
    if let Some(secs) = args.get("every_seconds").and_then(Value::as_i64) {
        return Ok(CronSchedule::every_secs(secs));
    }
    if let Some(expr) = optional_str(args, "cron_expr") {
        return Ok(CronSchedule::cron(expr, optional_str(args, "tz")));
    }
    if let Some(at) = optional_str(args, "at") {
        return match parse_at_time(at) {
            Some(at_ms) => Ok(CronSchedule::At { at_ms }),
            None => bail!("invalid 'at' time '{}', expected ISO format like 2026-01-31T09:00:00", at),
        };
    }
    bail!("one of every_seconds, cron_expr or at is required")
}

#[async_trait]
impl Tool for CronTool {
    fn name(&self) -> &str {
        "cron"
    }

    fn description(&self) -> &str {
        "Schedule reminders and recurring tasks. Actions: add, list, remove."
    }

    fn parameters(&self) -> Schema {
        Schema::object()
            .required_property(
                "action",
                Schema::string()
                    .with_enum(["add", "list", "remove"])
                    .describe("Action to perform"),
            )
            .property("message", Schema::string().describe("Reminder message (for add)"))
            .property(
                "every_seconds",
                Schema::integer().min(1.0).describe("Interval in seconds (for recurring tasks)"),
            )
            .property(
                "cron_expr",
                Schema::string().describe("Cron expression like '0 9 * * *' (for scheduled tasks)"),
            )
            .property("tz", Schema::string().describe("IANA timezone for cron_expr, e.g. 'Europe/Paris'"))
            .property(
                "at",
                Schema::string().describe("ISO datetime for one-time execution, e.g. '2026-02-12T10:30:00'"),
            )
            .property("job_id", Schema::string().describe("Job ID (for remove)"))
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<String> {
        match required_str(&args, "action")? {
            "add" => self.add(&args).await,
            "list" => self.list().await,
            "remove" => self.remove(&args).await,
            other => bail!("unknown action: {}", other),
        }
    }
}
