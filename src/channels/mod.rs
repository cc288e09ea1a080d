//! Chat channels
//!
//! Each platform adapter implements the `Channel` trait. The `ChannelManager`
//! starts them and routes outbound bus messages to the adapter named in
//! `OutboundMessage::channel`.

pub mod cli;
pub mod traits;

pub use cli::CliChannel;
pub use traits::{forward_inbound, AllowList, Channel, ChannelError};

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::bus::{MessageBus, OutboundMessage};

type ChannelMap = HashMap<String, Arc<dyn Channel>>;

/// Channel status for `status` output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStatus {
    pub name: String,
    pub running: bool,
}

pub struct ChannelManager {
    bus: Arc<MessageBus>,
    channels: ChannelMap,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ChannelManager {
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self {
            bus,
            channels: HashMap::new(),
            dispatcher: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn register(&mut self, channel: Arc<dyn Channel>) {
        let name = channel.name().to_string();
        if self.channels.insert(name.clone(), channel).is_some() {
            warn!("Channel {} registered twice, replacing", name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Channel>> {
        self.channels.get(name).cloned()
    }

    pub fn enabled_channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn status(&self) -> Vec<ChannelStatus> {
        let mut status: Vec<ChannelStatus> = self
            .channels
            .iter()
            .map(|(name, ch)| ChannelStatus {
                name: name.clone(),
                running: ch.is_running(),
            })
            .collect();
        status.sort_by(|a, b| a.name.cmp(&b.name));
        status
    }

    /// Spawn the outbound dispatcher and every registered channel
    pub fn start_all(&self) {
        if self.channels.is_empty() {
            warn!("No channels enabled");
            return;
        }

        let bus = self.bus.clone();
        let channels = self.channels.clone();
        *self.dispatcher.lock() = Some(tokio::spawn(async move {
            info!("Outbound dispatcher started");
            while let Some(msg) = bus.consume_outbound().await {
                dispatch(&channels, &msg).await;
            }
        }));

        let mut tasks = self.tasks.lock();
        for (name, channel) in &self.channels {
            info!("Starting {} channel...", name);
            let channel = channel.clone();
            let name = name.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = channel.start().await {
                    error!("Channel {} failed: {}", name, e);
                }
            }));
        }
    }

    /// Stop the dispatcher, then every channel
    pub async fn stop_all(&self) {
        info!("Stopping all channels...");
        if let Some(dispatcher) = self.dispatcher.lock().take() {
            dispatcher.abort();
        }

        for (name, channel) in &self.channels {
            channel.stop().await;
            info!("Stopped {} channel", name);
        }

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            task.abort();
        }
    }
}

/// Route one outbound message. Unknown channels and send failures are logged and dropped.
async fn dispatch(channels: &ChannelMap, msg: &OutboundMessage) {
    match channels.get(&msg.channel) {
        Some(channel) => {
            if let Err(e) = channel.send(msg).await {
                error!("Error sending to {}: {}", msg.channel, e);
            }
        }
        None => warn!("Unknown channel: {}", msg.channel),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Recorder {
        sent: Mutex<Vec<String>>,
        running: AtomicBool,
    }

    #[async_trait]
    impl Channel for Recorder {
        fn name(&self) -> &str {
            "test"
        }
        async fn start(&self) -> Result<(), ChannelError> {
            self.running.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn stop(&self) {
            self.running.store(false, Ordering::SeqCst);
        }
        async fn send(&self, msg: &OutboundMessage) -> Result<(), ChannelError> {
            self.sent.lock().push(msg.content.clone());
            Ok(())
        }
        fn is_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn test_dispatch_routes_by_channel_name() {
        let recorder = Arc::new(Recorder {
            sent: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        });
        let mut channels: ChannelMap = HashMap::new();
        channels.insert("test".into(), recorder.clone());

        dispatch(&channels, &OutboundMessage::new("test", "1", "hello")).await;
        dispatch(&channels, &OutboundMessage::new("nowhere", "1", "lost")).await;

        assert_eq!(recorder.sent.lock().as_slice(), &["hello".to_string()]);
    }

    #[tokio::test]
    async fn test_start_and_stop_all() {
        let bus = Arc::new(MessageBus::new());
        let recorder = Arc::new(Recorder {
            sent: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        });
        let mut manager = ChannelManager::new(bus.clone());
        manager.register(recorder.clone());
        manager.start_all();

        bus.publish_outbound(OutboundMessage::new("test", "1", "routed"));
        for _ in 0..50 {
            if !recorder.sent.lock().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(recorder.sent.lock().len(), 1);

        manager.stop_all().await;
        assert!(!recorder.is_running());
    }
}
