//! Subagent Manager Integration Tests
//!
//! Concurrency, iteration ceiling, failure announcements and shutdown.

use async_trait::async_trait;
use pocketbot::agent::subagent::NO_FINAL_RESPONSE;
use pocketbot::agent::tools::ToolDefinition;
use pocketbot::providers::ToolCallRequest;
use pocketbot::{ChatMessage, ChatOptions, LlmProvider, LlmResponse, MessageBus, SubagentManager, SubagentSettings};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;

/// Blocks every call until a permit is released
struct GatedProvider {
    gate: Arc<Semaphore>,
}

#[async_trait]
impl LlmProvider for GatedProvider {
    async fn chat(&self, _: &[ChatMessage], _: &[ToolDefinition], _: &ChatOptions) -> LlmResponse {
        match self.gate.acquire().await {
            Ok(_permit) => LlmResponse::text("finished"),
            Err(_) => LlmResponse::error("gate closed"),
        }
    }

    fn default_model(&self) -> &str {
        "gated"
    }
}

/// Always asks for another tool call
struct LoopingProvider {
    calls: AtomicUsize,
}

#[async_trait]
impl LlmProvider for LoopingProvider {
    async fn chat(&self, _: &[ChatMessage], _: &[ToolDefinition], _: &ChatOptions) -> LlmResponse {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        LlmResponse::with_tool_calls(
            None,
            vec![ToolCallRequest {
                id: format!("call_{}", n),
                name: "list_dir".to_string(),
                arguments: json!({"path": "."}),
            }],
        )
    }

    fn default_model(&self) -> &str {
        "looping"
    }
}

struct PanickingProvider;

#[async_trait]
impl LlmProvider for PanickingProvider {
    async fn chat(&self, _: &[ChatMessage], _: &[ToolDefinition], _: &ChatOptions) -> LlmResponse {
        panic!("model exploded");
    }

    fn default_model(&self) -> &str {
        "panicking"
    }
}

fn manager(provider: Arc<dyn LlmProvider>) -> (SubagentManager, Arc<MessageBus>, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let bus = Arc::new(MessageBus::new());
    let manager = SubagentManager::new(provider, bus.clone(), temp_dir.path(), SubagentSettings::default());
    (manager, bus, temp_dir)
}

async fn wait_for_idle(manager: &SubagentManager) {
    for _ in 0..100 {
        if manager.get_running_count() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_subagents_run_concurrently() {
    let gate = Arc::new(Semaphore::new(0));
    let (manager, bus, _temp) = manager(Arc::new(GatedProvider { gate: gate.clone() }));

    manager.spawn("first task", Some("one"), "telegram", "1");
    manager.spawn("second task", Some("two"), "telegram", "2");
    manager.spawn("third task", Some("three"), "discord", "3");

    assert_eq!(manager.get_running_count(), 3);
    let running = manager.list_running();
    assert_eq!(running.len(), 3);
    assert!(running.iter().any(|r| r.label == "three" && r.origin_channel == "discord"));

    gate.add_permits(3);

    let mut chats = Vec::new();
    for _ in 0..3 {
        let msg = tokio::time::timeout(Duration::from_secs(5), bus.consume_inbound())
            .await
            .expect("announcement timed out")
            .unwrap();
        assert_eq!(msg.channel, "system");
        assert!(msg.content.contains("Result:\nfinished"));
        chats.push(msg.chat_id);
    }
    chats.sort();
    assert_eq!(chats, vec!["discord:3", "telegram:1", "telegram:2"]);

    wait_for_idle(&manager).await;
    assert_eq!(manager.get_running_count(), 0);
}

#[tokio::test]
async fn test_iteration_ceiling() {
    let provider = Arc::new(LoopingProvider { calls: AtomicUsize::new(0) });
    let (manager, bus, _temp) = manager(provider.clone());

    manager.spawn("never ends", None, "cli", "direct");

    let msg = tokio::time::timeout(Duration::from_secs(10), bus.consume_inbound())
        .await
        .expect("announcement timed out")
        .unwrap();
    assert_eq!(provider.calls.load(Ordering::SeqCst), 15);
    assert!(msg.content.contains("completed successfully"));
    assert!(msg.content.contains(NO_FINAL_RESPONSE));
    assert_eq!(msg.chat_id, "cli:direct");
}

#[tokio::test]
async fn test_panic_is_announced_as_failure() {
    let (manager, bus, _temp) = manager(Arc::new(PanickingProvider));

    manager.spawn("doomed", Some("doomed"), "telegram", "7");

    let msg = tokio::time::timeout(Duration::from_secs(5), bus.consume_inbound())
        .await
        .expect("announcement timed out")
        .unwrap();
    assert!(msg.content.starts_with("[Subagent 'doomed' failed]"));
    assert!(msg.content.contains("model exploded"));
    assert_eq!(msg.metadata["status"], "error");

    wait_for_idle(&manager).await;
    assert_eq!(manager.get_running_count(), 0);
}

#[tokio::test]
async fn test_shutdown_aborts_without_announcing() {
    let gate = Arc::new(Semaphore::new(0));
    let (manager, bus, _temp) = manager(Arc::new(GatedProvider { gate }));

    manager.spawn("stuck", None, "telegram", "1");
    assert_eq!(manager.shutdown(Duration::from_millis(100)).await, 1);

    wait_for_idle(&manager).await;
    assert_eq!(manager.get_running_count(), 0);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(bus.try_consume_inbound().is_none());

    let refused = manager.spawn("late", None, "telegram", "1");
    assert!(refused.starts_with("Error:"));
    assert_eq!(manager.get_running_count(), 0);
}

#[tokio::test]
async fn test_cancel_single_subagent() {
    let gate = Arc::new(Semaphore::new(0));
    let (manager, bus, _temp) = manager(Arc::new(GatedProvider { gate: gate.clone() }));

    manager.spawn("keep", Some("keep"), "cli", "direct");
    manager.spawn("drop", Some("drop"), "cli", "direct");
    let doomed = manager
        .list_running()
        .into_iter()
        .find(|r| r.label == "drop")
        .unwrap();

    assert!(manager.cancel(&doomed.id));
    assert!(!manager.cancel("nope"));

    gate.add_permits(1);
    let msg = tokio::time::timeout(Duration::from_secs(5), bus.consume_inbound())
        .await
        .expect("announcement timed out")
        .unwrap();
    assert!(msg.content.starts_with("[Subagent 'keep' completed successfully]"));

    wait_for_idle(&manager).await;
    assert!(bus.try_consume_inbound().is_none());
}
