//! Message events carried on the bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Channel name reserved for internal announcements (subagent results).
pub const SYSTEM_CHANNEL: &str = "system";

/// Message received from a chat channel (or injected internally)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Channel name (telegram, cli, system, ...)
    pub channel: String,
    /// User identifier
    pub sender_id: String,
    /// Chat/conversation identifier
    pub chat_id: String,
    /// Message text
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Media references (paths or URLs)
    #[serde(default)]
    pub media: Vec<String>,
    /// Channel-specific data
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl InboundMessage {
    pub fn new(channel: &str, sender_id: &str, chat_id: &str, content: impl Into<String>) -> Self {
        Self {
            channel: channel.to_string(),
            sender_id: sender_id.to_string(),
            chat_id: chat_id.to_string(),
            content: content.into(),
            timestamp: Utc::now(),
            media: Vec::new(),
            metadata: Map::new(),
        }
    }

    pub fn with_media(mut self, media: Vec<String>) -> Self {
        self.media = media;
        self
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Unique key for session identification: `channel:chat_id`
    pub fn session_key(&self) -> String {
        format!("{}:{}", self.channel, self.chat_id)
    }

    pub fn is_system(&self) -> bool {
        self.channel == SYSTEM_CHANNEL
    }
}

/// Message to send to a chat channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel: String,
    pub chat_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub media: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl OutboundMessage {
    pub fn new(channel: &str, chat_id: &str, content: impl Into<String>) -> Self {
        Self {
            channel: channel.to_string(),
            chat_id: chat_id.to_string(),
            content: content.into(),
            reply_to: None,
            media: Vec::new(),
            metadata: Map::new(),
        }
    }

    pub fn reply_to(mut self, message_id: &str) -> Self {
        self.reply_to = Some(message_id.to_string());
        self
    }
}
