//! Terminal channel: stdin lines in, replies on stdout.

use async_trait::async_trait;
use serde_json::Map;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Notify;
use tracing::{debug, info};

use super::traits::{forward_inbound, AllowList, Channel, ChannelError};
use crate::bus::{MessageBus, OutboundMessage};

pub const CLI_CHANNEL: &str = "cli";
pub const CLI_CHAT_ID: &str = "direct";
const CLI_SENDER: &str = "user";

pub struct CliChannel {
    bus: Arc<MessageBus>,
    allow: AllowList,
    running: AtomicBool,
    stop_signal: Notify,
}

impl CliChannel {
    pub fn new(bus: Arc<MessageBus>, allow: AllowList) -> Self {
        Self {
            bus,
            allow,
            running: AtomicBool::new(false),
            stop_signal: Notify::new(),
        }
    }

    /// Publish one input line. Returns false when the line ends the session.
    fn handle_line(&self, line: &str) -> bool {
        let line = line.trim();
        match line {
            "" => true,
            "exit" | "quit" | "/exit" | "/quit" => false,
            text => {
                forward_inbound(&self.bus, &self.allow, CLI_CHANNEL, CLI_SENDER, CLI_CHAT_ID, text, Map::new());
                true
            }
        }
    }
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        CLI_CHANNEL
    }

    async fn start(&self) -> Result<(), ChannelError> {
        self.running.store(true, Ordering::SeqCst);
        info!("CLI channel listening on stdin");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if !self.handle_line(&line) {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("stdin closed");
                        break;
                    }
                    Err(e) => {
                        self.running.store(false, Ordering::SeqCst);
                        return Err(ChannelError::ConnectionFailed(e.to_string()));
                    }
                },
                _ = self.stop_signal.notified() => break,
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.stop_signal.notify_one();
    }

    async fn send(&self, msg: &OutboundMessage) -> Result<(), ChannelError> {
        println!("\npocketbot: {}\n", msg.content);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_line() {
        let bus = Arc::new(MessageBus::new());
        let cli = CliChannel::new(bus.clone(), AllowList::default());

        assert!(cli.handle_line("   "));
        assert!(bus.try_consume_inbound().is_none());

        assert!(cli.handle_line("what's on my calendar?\n"));
        let msg = bus.try_consume_inbound().unwrap();
        assert_eq!(msg.channel, "cli");
        assert_eq!(msg.chat_id, "direct");
        assert_eq!(msg.content, "what's on my calendar?");

        assert!(!cli.handle_line("quit"));
    }
}
