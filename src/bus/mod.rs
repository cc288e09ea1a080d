//! Message Bus
//!
//! Decouples chat channels from the agent core:
//! - Inbound queue: channels -> agent
//! - Outbound queue: agent -> channels
//!
//! One bus is created at startup and shared as `Arc<MessageBus>`.
//! Each queue is FIFO and expects a single consumer.

pub mod events;

pub use events::{InboundMessage, OutboundMessage, SYSTEM_CHANNEL};

use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Async message bus with an inbound and an outbound queue
pub struct MessageBus {
    inbound_tx: UnboundedSender<InboundMessage>,
    inbound_rx: Mutex<UnboundedReceiver<InboundMessage>>,
    outbound_tx: UnboundedSender<OutboundMessage>,
    outbound_rx: Mutex<UnboundedReceiver<OutboundMessage>>,
}

impl MessageBus {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            outbound_tx,
            outbound_rx: Mutex::new(outbound_rx),
        }
    }

    /// Publish a message from a channel to the agent
    pub fn publish_inbound(&self, msg: InboundMessage) {
        debug!("Inbound from {}:{}", msg.channel, msg.chat_id);
        if self.inbound_tx.send(msg).is_err() {
            warn!("Inbound queue closed, message dropped");
        }
    }

    /// Publish a response from the agent to channels
    pub fn publish_outbound(&self, msg: OutboundMessage) {
        debug!("Outbound to {}:{}", msg.channel, msg.chat_id);
        if self.outbound_tx.send(msg).is_err() {
            warn!("Outbound queue closed, message dropped");
        }
    }

    /// Wait for the next inbound message
    pub async fn consume_inbound(&self) -> Option<InboundMessage> {
        self.inbound_rx.lock().await.recv().await
    }

    /// Wait for the next outbound message
    pub async fn consume_outbound(&self) -> Option<OutboundMessage> {
        self.outbound_rx.lock().await.recv().await
    }

    /// Take the next inbound message if one is queued
    pub fn try_consume_inbound(&self) -> Option<InboundMessage> {
        let mut rx = self.inbound_rx.try_lock().ok()?;
        match rx.try_recv() {
            Ok(msg) => Some(msg),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Take the next outbound message if one is queued
    pub fn try_consume_outbound(&self) -> Option<OutboundMessage> {
        let mut rx = self.outbound_rx.try_lock().ok()?;
        match rx.try_recv() {
            Ok(msg) => Some(msg),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_inbound_fifo() {
        let bus = MessageBus::new();
        for i in 0..5 {
            bus.publish_inbound(InboundMessage::new("cli", "u", "direct", format!("msg {}", i)));
        }
        for i in 0..5 {
            let msg = bus.consume_inbound().await.unwrap();
            assert_eq!(msg.content, format!("msg {}", i));
        }
        assert!(bus.try_consume_inbound().is_none());
    }

    #[tokio::test]
    async fn test_queues_are_independent() {
        let bus = MessageBus::new();
        bus.publish_outbound(OutboundMessage::new("cli", "direct", "out"));
        assert!(bus.try_consume_inbound().is_none());
        let out = bus.try_consume_outbound().unwrap();
        assert_eq!(out.content, "out");
    }

    #[tokio::test]
    async fn test_consumer_wakes_on_publish() {
        let bus = Arc::new(MessageBus::new());
        let consumer = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.consume_outbound().await })
        };
        tokio::task::yield_now().await;
        bus.publish_outbound(OutboundMessage::new("telegram", "7", "late"));
        let msg = consumer.await.unwrap().unwrap();
        assert_eq!(msg.chat_id, "7");
    }
}
