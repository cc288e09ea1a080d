//! Message tool: lets the agent push a message to a chat channel mid-turn.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::Arc;

use super::{optional_str, required_str, Schema, Tool, ToolContext};
use crate::bus::{MessageBus, OutboundMessage};

pub struct MessageTool {
    bus: Arc<MessageBus>,
    context: Mutex<ToolContext>,
}

impl MessageTool {
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self {
            bus,
            context: Mutex::new(ToolContext::default()),
        }
    }

    /// Default destination for the current turn
    pub fn set_context(&self, channel: &str, chat_id: &str) {
        *self.context.lock() = ToolContext {
            channel: channel.to_string(),
            chat_id: chat_id.to_string(),
        };
    }
}

#[async_trait]
impl Tool for MessageTool {
    fn name(&self) -> &str {
        "message"
    }

    fn description(&self) -> &str {
        "Send a message to the user. Use this when you want to communicate something."
    }

    fn parameters(&self) -> Schema {
        Schema::object()
            .required_property("content", Schema::string().describe("The message content to send"))
            .property("channel", Schema::string().describe("Optional: target channel (telegram, cli, ...)"))
            .property("chat_id", Schema::string().describe("Optional: target chat/user ID"))
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<String> {
        let content = required_str(&args, "content")?;
        let ctx = self.context.lock().clone();
        let channel = optional_str(&args, "channel").unwrap_or(&ctx.channel);
        let chat_id = optional_str(&args, "chat_id").unwrap_or(&ctx.chat_id);

        self.bus.publish_outbound(OutboundMessage::new(channel, chat_id, content));
        Ok(format!("Message sent to {}:{}", channel, chat_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_message_uses_context() {
        let bus = Arc::new(MessageBus::new());
        let tool = MessageTool::new(bus.clone());
        tool.set_context("telegram", "99");

        let args = json!({"content": "done!"}).as_object().cloned().unwrap();
        let out = tool.execute(args).await.unwrap();
        assert_eq!(out, "Message sent to telegram:99");

        let msg = bus.try_consume_outbound().unwrap();
        assert_eq!(msg.channel, "telegram");
        assert_eq!(msg.chat_id, "99");
        assert_eq!(msg.content, "done!");
    }

    #[tokio::test]
    async fn test_message_explicit_target() {
        let bus = Arc::new(MessageBus::new());
        let tool = MessageTool::new(bus.clone());
        let args = json!({"content": "hi", "channel": "discord", "chat_id": "c1"})
            .as_object()
            .cloned()
            .unwrap();
        tool.execute(args).await.unwrap();
        assert_eq!(bus.try_consume_outbound().unwrap().channel, "discord");
    }
}
