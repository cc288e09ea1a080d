//! Primary agent loop
//!
//! Consumes inbound bus messages, runs one reasoning turn per message with
//! the full tool set, stores the exchange, and publishes the reply.
//! Announcements arriving on the `system` channel are answered in the
//! session of the conversation that started the work.

use anyhow::Result;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use super::context::ContextBuilder;
use super::reasoning::run_tool_loop;
use super::subagent::SubagentManager;
use super::tools::{
    CronTool, ExecTool, ListDirTool, MessageTool, ReadFileTool, SpawnTool, ToolRegistry, WebFetchTool,
    WebSearchTool, WriteFileTool,
};
use crate::bus::{InboundMessage, MessageBus, OutboundMessage, SYSTEM_CHANNEL};
use crate::config::Config;
use crate::cron::CronService;
use crate::providers::{ChatOptions, LlmProvider};
use crate::session::SessionStore;
use crate::utils::{parse_session_key, truncate_chars};

/// Prior messages included in each turn
const HISTORY_LIMIT: usize = 50;

/// Reply when the model produced no text
pub const EMPTY_REPLY: &str = "I've completed processing but have no response to give.";

pub struct AgentLoop {
    bus: Arc<MessageBus>,
    provider: Arc<dyn LlmProvider>,
    context: ContextBuilder,
    sessions: Mutex<SessionStore>,
    tools: ToolRegistry,
    message_tool: Arc<MessageTool>,
    spawn_tool: Arc<SpawnTool>,
    cron_tool: Option<Arc<CronTool>>,
    subagents: Arc<SubagentManager>,
    options: ChatOptions,
    max_iterations: usize,
    /// Serializes turns; tool context is per turn
    turn_lock: tokio::sync::Mutex<()>,
    running: AtomicBool,
    stop_signal: Notify,
}

impl AgentLoop {
    pub fn new(
        config: &Config,
        bus: Arc<MessageBus>,
        provider: Arc<dyn LlmProvider>,
        sessions: SessionStore,
        cron: Option<Arc<CronService>>,
    ) -> Self {
        let workspace = config.workspace_path();
        let restrict = config.tools.restrict_to_workspace;
        let allowed_dir = restrict.then(|| workspace.clone());

        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(ReadFileTool::new(&workspace, allowed_dir.clone())));
        tools.register(Arc::new(WriteFileTool::new(&workspace, allowed_dir.clone())));
        tools.register(Arc::new(ListDirTool::new(&workspace, allowed_dir)));
        tools.register(Arc::new(ExecTool::new(
            &workspace,
            Duration::from_secs(config.tools.exec_timeout_secs),
            restrict,
        )));
        tools.register(Arc::new(WebSearchTool::new(
            config.tools.brave_api_key.clone(),
            config.tools.web_search_max_results,
        )));
        tools.register(Arc::new(WebFetchTool::default()));

        let message_tool = Arc::new(MessageTool::new(bus.clone()));
        tools.register(message_tool.clone());

        let subagents = Arc::new(SubagentManager::new(
            provider.clone(),
            bus.clone(),
            &workspace,
            config.subagent_settings(),
        ));
        let spawn_tool = Arc::new(SpawnTool::new(subagents.clone()));
        tools.register(spawn_tool.clone());

        let cron_tool = cron.map(|service| Arc::new(CronTool::new(service)));
        if let Some(tool) = &cron_tool {
            tools.register(tool.clone());
        }

        Self {
            bus,
            provider,
            context: ContextBuilder::new(workspace),
            sessions: Mutex::new(sessions),
            tools,
            message_tool,
            spawn_tool,
            cron_tool,
            subagents,
            options: config.chat_options(),
            max_iterations: config.agent.max_tool_iterations,
            turn_lock: tokio::sync::Mutex::new(()),
            running: AtomicBool::new(false),
            stop_signal: Notify::new(),
        }
    }

    pub fn subagents(&self) -> &Arc<SubagentManager> {
        &self.subagents
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.tool_names()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Process inbound messages until `stop()` or the bus closes
    pub async fn run(&self) {
        self.running.store(true, Ordering::SeqCst);
        info!("Agent loop started");

        while self.is_running() {
            let msg = tokio::select! {
                msg = self.bus.consume_inbound() => msg,
                _ = self.stop_signal.notified() => break,
            };
            let Some(msg) = msg else {
                break;
            };

            let (channel, chat_id) = reply_target(&msg);
            match self.process_message(msg).await {
                Ok(Some(reply)) => self.bus.publish_outbound(reply),
                Ok(None) => {}
                Err(e) => {
                    error!("Error processing message: {:#}", e);
                    self.bus.publish_outbound(OutboundMessage::new(
                        &channel,
                        &chat_id,
                        format!("Sorry, I encountered an error: {}", e),
                    ));
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("Agent loop stopped");
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.stop_signal.notify_one();
    }

    /// Handle one inbound message and build the reply
    pub async fn process_message(&self, msg: InboundMessage) -> Result<Option<OutboundMessage>> {
        if msg.is_system() {
            return self.process_system_message(msg).await.map(Some);
        }

        info!(
            "Processing message from {}:{}: {}",
            msg.channel,
            msg.sender_id,
            truncate_chars(&msg.content, 80)
        );
        let reply = self
            .run_turn(&msg.session_key(), &msg.channel, &msg.chat_id, &msg.content)
            .await?;
        Ok(Some(OutboundMessage::new(&msg.channel, &msg.chat_id, reply)))
    }

    /// Answer an announcement in the originating session
    async fn process_system_message(&self, msg: InboundMessage) -> Result<OutboundMessage> {
        let (channel, chat_id) = reply_target(&msg);
        info!("Processing system message from {} for {}:{}", msg.sender_id, channel, chat_id);

        let content = format!("[System: {}] {}", msg.sender_id, msg.content);
        let session_key = format!("{}:{}", channel, chat_id);
        let reply = self.run_turn(&session_key, &channel, &chat_id, &content).await?;
        Ok(OutboundMessage::new(&channel, &chat_id, reply))
    }

    /// Run a turn outside the bus (CLI, cron, heartbeat)
    pub async fn process_direct(&self, content: &str, session_key: &str, channel: &str, chat_id: &str) -> Result<String> {
        self.run_turn(session_key, channel, chat_id, content).await
    }

    async fn run_turn(&self, session_key: &str, channel: &str, chat_id: &str, content: &str) -> Result<String> {
        let _turn = self.turn_lock.lock().await;
        self.set_tool_context(channel, chat_id);

        let history = self.sessions.lock().get_history(session_key, HISTORY_LIMIT)?;
        let mut messages = self.context.build_messages(&history, content, channel, chat_id);

        let outcome = run_tool_loop(
            self.provider.as_ref(),
            &self.tools,
            &mut messages,
            &self.options,
            self.max_iterations,
            None,
        )
        .await;

        if outcome.exhausted {
            warn!("Turn for {} hit the {}-iteration ceiling", session_key, self.max_iterations);
        }
        debug!(
            "Turn for {} used {} iterations, tools: {:?}",
            session_key, outcome.iterations, outcome.tools_used
        );

        let reply = outcome
            .content
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| EMPTY_REPLY.to_string());

        self.sessions.lock().add_exchange(session_key, content, &reply)?;
        Ok(reply)
    }

    fn set_tool_context(&self, channel: &str, chat_id: &str) {
        self.message_tool.set_context(channel, chat_id);
        self.spawn_tool.set_context(channel, chat_id);
        if let Some(cron) = &self.cron_tool {
            cron.set_context(channel, chat_id);
        }
    }
}

/// Where a reply to `msg` goes. System messages carry their origin in `chat_id`.
fn reply_target(msg: &InboundMessage) -> (String, String) {
    if msg.channel == SYSTEM_CHANNEL {
        match parse_session_key(&msg.chat_id) {
            Some((channel, chat_id)) => (channel.to_string(), chat_id.to_string()),
            None => ("cli".to_string(), msg.chat_id.clone()),
        }
    } else {
        (msg.channel.clone(), msg.chat_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_target() {
        let user = InboundMessage::new("telegram", "42", "42", "hi");
        assert_eq!(reply_target(&user), ("telegram".into(), "42".into()));

        let system = InboundMessage::new(SYSTEM_CHANNEL, "subagent", "discord:room:7", "done");
        assert_eq!(reply_target(&system), ("discord".into(), "room:7".into()));

        let bare = InboundMessage::new(SYSTEM_CHANNEL, "subagent", "direct", "done");
        assert_eq!(reply_target(&bare), ("cli".into(), "direct".into()));
    }
}
