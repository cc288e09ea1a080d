//! Channel Trait Definitions
//!
//! Interfaces every chat platform adapter implements.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::warn;

use crate::bus::{InboundMessage, MessageBus, OutboundMessage};

/// Error types for channel operations
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Channel not ready")]
    NotReady,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Senders permitted to talk to the bot. Empty allows everyone.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    entries: Vec<String>,
}

impl AllowList {
    pub fn new(entries: Vec<String>) -> Self {
        Self { entries }
    }

    /// Sender ids may carry several `|`-separated forms (`12345|alice`); any match is enough.
    pub fn is_allowed(&self, sender_id: &str) -> bool {
        if self.entries.is_empty() {
            return true;
        }
        if self.entries.iter().any(|e| e == sender_id) {
            return true;
        }
        sender_id
            .split('|')
            .filter(|part| !part.is_empty())
            .any(|part| self.entries.iter().any(|e| e == part))
    }
}

/// Channel trait - implement for each platform
#[async_trait]
pub trait Channel: Send + Sync {
    /// Channel name identifier
    fn name(&self) -> &str;

    /// Connect and listen for inbound messages until stopped
    async fn start(&self) -> Result<(), ChannelError>;

    /// Stop listening and release resources
    async fn stop(&self);

    /// Deliver an outbound message
    async fn send(&self, msg: &OutboundMessage) -> Result<(), ChannelError>;

    fn is_running(&self) -> bool;
}

/// Check the allow-list and forward an inbound message to the bus.
/// Returns false when the sender was rejected.
pub fn forward_inbound(
    bus: &MessageBus,
    allow: &AllowList,
    channel: &str,
    sender_id: &str,
    chat_id: &str,
    content: &str,
    metadata: Map<String, Value>,
) -> bool {
    if !allow.is_allowed(sender_id) {
        warn!("Rejected message from {} on {} (not in allow list)", sender_id, channel);
        return false;
    }
    let mut msg = InboundMessage::new(channel, sender_id, chat_id, content);
    msg.metadata = metadata;
    bus.publish_inbound(msg);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_list() {
        let open = AllowList::default();
        assert!(open.is_allowed("anyone"));

        let list = AllowList::new(vec!["alice".into(), "42".into()]);
        assert!(list.is_allowed("alice"));
        assert!(list.is_allowed("42|bob"));
        assert!(list.is_allowed("99|alice"));
        assert!(!list.is_allowed("99|bob"));
        assert!(!list.is_allowed("|"));
    }

    #[test]
    fn test_forward_inbound_respects_allow_list() {
        let bus = MessageBus::new();
        let allow = AllowList::new(vec!["alice".into()]);

        assert!(!forward_inbound(&bus, &allow, "cli", "mallory", "direct", "hi", Map::new()));
        assert!(bus.try_consume_inbound().is_none());

        assert!(forward_inbound(&bus, &allow, "cli", "alice", "direct", "hi", Map::new()));
        let msg = bus.try_consume_inbound().unwrap();
        assert_eq!(msg.session_key(), "cli:direct");
    }
}
