//! Agent Loop Integration Tests
//!
//! Turns against a scripted provider: history, tool context and routing
//! of system announcements.

use async_trait::async_trait;
use parking_lot::Mutex;
use pocketbot::agent::runner::EMPTY_REPLY;
use pocketbot::agent::tools::ToolDefinition;
use pocketbot::bus::SYSTEM_CHANNEL;
use pocketbot::providers::ToolCallRequest;
use pocketbot::{
    AgentLoop, ChatMessage, ChatOptions, Config, CronService, InboundMessage, LlmProvider, LlmResponse,
    MessageBus, SessionStore,
};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Replays canned responses and records every transcript it was sent
struct ScriptedProvider {
    responses: Mutex<VecDeque<LlmResponse>>,
    transcripts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<LlmResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            transcripts: Mutex::new(Vec::new()),
        })
    }

    fn last_transcript(&self) -> Vec<ChatMessage> {
        self.transcripts.lock().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat(&self, messages: &[ChatMessage], _: &[ToolDefinition], _: &ChatOptions) -> LlmResponse {
        self.transcripts.lock().push(messages.to_vec());
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| LlmResponse::text("default reply"))
    }

    fn default_model(&self) -> &str {
        "scripted"
    }
}

fn test_config(workspace: &TempDir) -> Config {
    let mut config = Config::default();
    config.agent.workspace = workspace.path().display().to_string();
    config
}

fn create_agent(provider: Arc<ScriptedProvider>) -> (AgentLoop, Arc<MessageBus>, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let bus = Arc::new(MessageBus::new());
    let sessions = SessionStore::in_memory().expect("Failed to create store");
    let agent = AgentLoop::new(&test_config(&temp_dir), bus.clone(), provider, sessions, None);
    (agent, bus, temp_dir)
}

#[tokio::test]
async fn test_process_direct_keeps_history() {
    let provider = ScriptedProvider::new(vec![
        LlmResponse::text("Nice to meet you, Max!"),
        LlmResponse::text("Your name is Max."),
    ]);
    let (agent, _bus, _temp) = create_agent(provider.clone());

    let first = agent
        .process_direct("My name is Max", "cli:default", "cli", "direct")
        .await
        .unwrap();
    assert_eq!(first, "Nice to meet you, Max!");

    let second = agent
        .process_direct("What's my name?", "cli:default", "cli", "direct")
        .await
        .unwrap();
    assert_eq!(second, "Your name is Max.");

    let transcript = provider.last_transcript();
    assert_eq!(transcript.len(), 4);
    assert!(transcript[0].text().contains("Channel: cli\nChat ID: direct"));
    assert_eq!(transcript[1].text(), "My name is Max");
    assert_eq!(transcript[2].text(), "Nice to meet you, Max!");
    assert_eq!(transcript[3].text(), "What's my name?");
}

#[tokio::test]
async fn test_empty_model_reply_gets_placeholder() {
    let provider = ScriptedProvider::new(vec![LlmResponse::text("   ")]);
    let (agent, _bus, _temp) = create_agent(provider);

    let reply = agent.process_direct("hi", "cli:default", "cli", "direct").await.unwrap();
    assert_eq!(reply, EMPTY_REPLY);
}

#[tokio::test]
async fn test_message_tool_targets_current_chat() {
    let provider = ScriptedProvider::new(vec![
        LlmResponse::with_tool_calls(
            None,
            vec![ToolCallRequest {
                id: "call_1".to_string(),
                name: "message".to_string(),
                arguments: json!({"content": "working on it"}),
            }],
        ),
        LlmResponse::text("Done."),
    ]);
    let (agent, bus, _temp) = create_agent(provider.clone());

    let reply = agent
        .process_message(InboundMessage::new("telegram", "7", "42", "do the thing"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply.channel, "telegram");
    assert_eq!(reply.chat_id, "42");
    assert_eq!(reply.content, "Done.");

    let progress = bus.try_consume_outbound().unwrap();
    assert_eq!(progress.channel, "telegram");
    assert_eq!(progress.chat_id, "42");
    assert_eq!(progress.content, "working on it");

    let transcript = provider.last_transcript();
    let tool_result = transcript.last().unwrap();
    assert_eq!(tool_result.text(), "Message sent to telegram:42");
}

#[tokio::test]
async fn test_system_message_routes_to_origin() {
    let provider = ScriptedProvider::new(vec![LlmResponse::text("The report is ready.")]);
    let (agent, _bus, _temp) = create_agent(provider.clone());

    let announcement = InboundMessage::new(SYSTEM_CHANNEL, "subagent", "discord:room-9", "[Subagent 'report' completed successfully]");
    let reply = agent.process_message(announcement).await.unwrap().unwrap();

    assert_eq!(reply.channel, "discord");
    assert_eq!(reply.chat_id, "room-9");
    assert_eq!(reply.content, "The report is ready.");

    let transcript = provider.last_transcript();
    assert!(transcript[0].text().contains("Channel: discord\nChat ID: room-9"));
    assert_eq!(
        transcript.last().unwrap().text(),
        "[System: subagent] [Subagent 'report' completed successfully]"
    );
}

#[tokio::test]
async fn test_cron_tool_registered_with_service() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let bus = Arc::new(MessageBus::new());
    let cron = Arc::new(CronService::new(temp_dir.path().join("jobs.json")));
    let agent = AgentLoop::new(
        &test_config(&temp_dir),
        bus,
        ScriptedProvider::new(vec![]),
        SessionStore::in_memory().unwrap(),
        Some(cron),
    );

    let names = agent.tool_names();
    for expected in ["cron", "exec", "list_dir", "message", "read_file", "spawn", "web_fetch", "web_search", "write_file"] {
        assert!(names.iter().any(|n| n == expected), "missing tool {}", expected);
    }

    let (without, _bus, _temp) = create_agent(ScriptedProvider::new(vec![]));
    assert!(!without.tool_names().iter().any(|n| n == "cron"));
}

#[tokio::test]
async fn test_run_loop_replies_over_bus() {
    let provider = ScriptedProvider::new(vec![LlmResponse::text("pong")]);
    let (agent, bus, _temp) = create_agent(provider);
    let agent = Arc::new(agent);

    let runner = {
        let agent = agent.clone();
        tokio::spawn(async move { agent.run().await })
    };

    bus.publish_inbound(InboundMessage::new("cli", "user", "direct", "ping"));
    let reply = tokio::time::timeout(Duration::from_secs(5), bus.consume_outbound())
        .await
        .expect("reply timed out")
        .unwrap();
    assert_eq!(reply.channel, "cli");
    assert_eq!(reply.content, "pong");

    agent.stop();
    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("agent loop did not stop")
        .unwrap();
    assert!(!agent.is_running());
}
