//! Spawn tool: hand a task to a background subagent.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::Arc;

use super::{optional_str, required_str, Schema, Tool, ToolContext};
use crate::agent::subagent::SubagentManager;

pub struct SpawnTool {
    manager: Arc<SubagentManager>,
    context: Mutex<ToolContext>,
}

impl SpawnTool {
    pub fn new(manager: Arc<SubagentManager>) -> Self {
        Self {
            manager,
            context: Mutex::new(ToolContext::default()),
        }
    }

    /// Where the subagent's result should be announced
    pub fn set_context(&self, channel: &str, chat_id: &str) {
        *self.context.lock() = ToolContext {
            channel: channel.to_string(),
            chat_id: chat_id.to_string(),
        };
    }
}

#[async_trait]
impl Tool for SpawnTool {
    fn name(&self) -> &str {
        "spawn"
    }

    fn description(&self) -> &str {
        "Spawn a subagent to handle a task in the background. \
         Use this for complex or time-consuming tasks that can run independently. \
         The subagent will complete the task and report back when done."
    }

    fn parameters(&self) -> Schema {
        Schema::object()
            .required_property(
                "task",
                Schema::string().min_len(1).describe("The task for the subagent to complete"),
            )
            .property(
                "label",
                Schema::string().describe("Optional short label for the task (for display)"),
            )
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<String> {
        let task = required_str(&args, "task")?;
        let label = optional_str(&args, "label");
        let ctx = self.context.lock().clone();
        Ok(self.manager.spawn(task, label, &ctx.channel, &ctx.chat_id))
    }
}
