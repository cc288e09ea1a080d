//! Subagent Manager
//!
//! Runs delegated tasks in the background:
//! - Each task gets its own transcript and a restricted tool set
//!   (files, shell, web; no messaging, no further spawning)
//! - Results are announced back through the bus on the `system` channel,
//!   addressed to the conversation that asked for the work
//! - Live tasks are tracked until they finish, fail, panic or are aborted
//!
//! There is no concurrency cap; every spawn starts immediately.

use anyhow::{Context, Result};
use futures_util::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use super::reasoning::run_tool_loop;
use super::tools::{
    ExecTool, ListDirTool, ReadFileTool, ToolRegistry, WebFetchTool, WebSearchTool, WriteFileTool,
};
use crate::bus::{InboundMessage, MessageBus, SYSTEM_CHANNEL};
use crate::providers::{ChatMessage, ChatOptions, LlmProvider};
use crate::utils::{panic_message, short_id, short_label};

/// Final text when the loop ends without an answer
pub const NO_FINAL_RESPONSE: &str = "Task completed but no final response was generated.";

/// Sender id used on announcements
pub const SUBAGENT_SENDER: &str = "subagent";

const LABEL_CHARS: usize = 30;

/// Subagent configuration
#[derive(Debug, Clone)]
pub struct SubagentSettings {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Reasoning-loop ceiling per task
    pub max_iterations: usize,
    pub exec_timeout: Duration,
    pub restrict_to_workspace: bool,
    pub brave_api_key: Option<String>,
}

impl Default for SubagentSettings {
    fn default() -> Self {
        Self {
            model: crate::config::DEFAULT_MODEL.to_string(),
            max_tokens: 4096,
            temperature: 0.7,
            max_iterations: 15,
            exec_timeout: Duration::from_secs(60),
            restrict_to_workspace: false,
            brave_api_key: None,
        }
    }
}

/// Terminal status of a subagent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubagentStatus {
    Completed,
    Failed,
}

impl SubagentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "ok",
            Self::Failed => "error",
        }
    }
}

/// Snapshot of a running subagent
#[derive(Debug, Clone)]
pub struct SubagentInfo {
    pub id: String,
    pub label: String,
    pub task: String,
    pub origin_channel: String,
    pub origin_chat_id: String,
    /// Current reasoning-loop iteration
    pub iteration: usize,
    pub elapsed: Duration,
}

struct RunningSubagent {
    label: String,
    task: String,
    origin_channel: String,
    origin_chat_id: String,
    started_at: Instant,
    iteration: Arc<AtomicUsize>,
    abort: AbortHandle,
}

type RunningMap = Arc<Mutex<HashMap<String, RunningSubagent>>>;

/// Removes a task's map entry when its future is dropped, however it ends
struct RunningGuard {
    id: String,
    running: RunningMap,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        if self.running.lock().remove(&self.id).is_some() {
            debug!("Subagent [{}] released", self.id);
        }
    }
}

/// Manages background subagent execution
pub struct SubagentManager {
    provider: Arc<dyn LlmProvider>,
    bus: Arc<MessageBus>,
    workspace: PathBuf,
    settings: SubagentSettings,
    running: RunningMap,
    accepting: AtomicBool,
}

impl SubagentManager {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        bus: Arc<MessageBus>,
        workspace: impl Into<PathBuf>,
        settings: SubagentSettings,
    ) -> Self {
        Self {
            provider,
            bus,
            workspace: workspace.into(),
            settings,
            running: Arc::new(Mutex::new(HashMap::new())),
            accepting: AtomicBool::new(true),
        }
    }

    /// Start a background task and return a status line immediately
    pub fn spawn(
        &self,
        task: &str,
        label: Option<&str>,
        origin_channel: &str,
        origin_chat_id: &str,
    ) -> String {
        if !self.accepting.load(Ordering::SeqCst) {
            return "Error: subagents are shutting down, task not started".to_string();
        }

        let task_id = short_id();
        let label = label
            .filter(|l| !l.trim().is_empty())
            .map(|l| l.to_string())
            .unwrap_or_else(|| short_label(task, LABEL_CHARS));
        let iteration = Arc::new(AtomicUsize::new(0));

        let job = SubagentJob {
            task_id: task_id.clone(),
            label: label.clone(),
            task: task.to_string(),
            origin_channel: origin_channel.to_string(),
            origin_chat_id: origin_chat_id.to_string(),
            provider: self.provider.clone(),
            bus: self.bus.clone(),
            workspace: self.workspace.clone(),
            settings: self.settings.clone(),
            iteration: iteration.clone(),
        };
        let guard = RunningGuard {
            id: task_id.clone(),
            running: self.running.clone(),
        };

        // Insert under the lock so the task cannot remove its entry before it exists
        let mut running = self.running.lock();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            job.run().await;
        });
        running.insert(
            task_id.clone(),
            RunningSubagent {
                label: label.clone(),
                task: task.to_string(),
                origin_channel: origin_channel.to_string(),
                origin_chat_id: origin_chat_id.to_string(),
                started_at: Instant::now(),
                iteration,
                abort: handle.abort_handle(),
            },
        );
        drop(running);

        info!("Spawned subagent [{}]: {}", task_id, label);
        format!(
            "Subagent [{}] started (id: {}). I'll notify you when it completes.",
            label, task_id
        )
    }

    /// Number of subagents still running
    pub fn get_running_count(&self) -> usize {
        self.running.lock().len()
    }

    /// Snapshot of running subagents, oldest first
    pub fn list_running(&self) -> Vec<SubagentInfo> {
        let mut infos: Vec<SubagentInfo> = self
            .running
            .lock()
            .iter()
            .map(|(id, r)| SubagentInfo {
                id: id.clone(),
                label: r.label.clone(),
                task: r.task.clone(),
                origin_channel: r.origin_channel.clone(),
                origin_chat_id: r.origin_chat_id.clone(),
                iteration: r.iteration.load(Ordering::Relaxed),
                elapsed: r.started_at.elapsed(),
            })
            .collect();
        infos.sort_by(|a, b| b.elapsed.cmp(&a.elapsed));
        infos
    }

    /// Abort one subagent. It will not announce a result.
    pub fn cancel(&self, task_id: &str) -> bool {
        let handle = self.running.lock().get(task_id).map(|r| r.abort.clone());
        match handle {
            Some(handle) => {
                handle.abort();
                info!("Cancelled subagent [{}]", task_id);
                true
            }
            None => false,
        }
    }

    /// Stop accepting work, wait up to `grace` for running subagents,
    /// then abort the rest. Returns how many were aborted.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        self.accepting.store(false, Ordering::SeqCst);

        let deadline = Instant::now() + grace;
        while self.get_running_count() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let handles: Vec<(String, AbortHandle)> = self
            .running
            .lock()
            .iter()
            .map(|(id, r)| (id.clone(), r.abort.clone()))
            .collect();
        for (id, handle) in &handles {
            warn!("Aborting subagent [{}] at shutdown", id);
            handle.abort();
        }
        handles.len()
    }
}

/// Everything one background task needs, owned by the task
struct SubagentJob {
    task_id: String,
    label: String,
    task: String,
    origin_channel: String,
    origin_chat_id: String,
    provider: Arc<dyn LlmProvider>,
    bus: Arc<MessageBus>,
    workspace: PathBuf,
    settings: SubagentSettings,
    iteration: Arc<AtomicUsize>,
}

impl SubagentJob {
    async fn run(self) {
        let started = Instant::now();
        info!("Subagent [{}] starting task: {}", self.task_id, self.label);

        let outcome = AssertUnwindSafe(self.execute_task()).catch_unwind().await;
        let (status, result) = match outcome {
            Ok(Ok(text)) => (SubagentStatus::Completed, text),
            Ok(Err(e)) => {
                error!("Subagent [{}] failed: {:#}", self.task_id, e);
                (SubagentStatus::Failed, format!("Error: {:#}", e))
            }
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                error!("Subagent [{}] panicked: {}", self.task_id, msg);
                (SubagentStatus::Failed, format!("Error: {}", msg))
            }
        };

        info!(
            "Subagent [{}] finished ({}) in {}ms",
            self.task_id,
            status.as_str(),
            started.elapsed().as_millis()
        );
        self.announce(status, &result);
    }

    async fn execute_task(&self) -> Result<String> {
        tokio::fs::create_dir_all(&self.workspace)
            .await
            .with_context(|| format!("preparing workspace {}", self.workspace.display()))?;

        let tools = build_worker_tools(&self.workspace, &self.settings);
        let mut messages = vec![
            ChatMessage::system(subagent_prompt(&self.task, &self.workspace)),
            ChatMessage::user(self.task.clone()),
        ];
        let options = ChatOptions {
            model: self.settings.model.clone(),
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
        };

        let outcome = run_tool_loop(
            self.provider.as_ref(),
            &tools,
            &mut messages,
            &options,
            self.settings.max_iterations,
            Some(&self.iteration),
        )
        .await;

        if outcome.exhausted {
            warn!(
                "Subagent [{}] hit the {}-iteration ceiling",
                self.task_id, self.settings.max_iterations
            );
        }
        Ok(outcome
            .content
            .unwrap_or_else(|| NO_FINAL_RESPONSE.to_string()))
    }

    fn announce(&self, status: SubagentStatus, result: &str) {
        let status_text = match status {
            SubagentStatus::Completed => "completed successfully",
            SubagentStatus::Failed => "failed",
        };
        let content = format!(
            "[Subagent '{}' {}]\n\nTask: {}\n\nResult:\n{}\n\n\
             Summarize this naturally for the user. Keep it brief (1-2 sentences). \
             Do not mention technical details like \"subagent\" or task IDs.",
            self.label, status_text, self.task, result
        );

        let msg = InboundMessage::new(
            SYSTEM_CHANNEL,
            SUBAGENT_SENDER,
            &format!("{}:{}", self.origin_channel, self.origin_chat_id),
            content,
        )
        .with_metadata("task_id", serde_json::json!(self.task_id))
        .with_metadata("status", serde_json::json!(status.as_str()));

        self.bus.publish_inbound(msg);
        debug!(
            "Subagent [{}] announced to {}:{}",
            self.task_id, self.origin_channel, self.origin_chat_id
        );
    }
}

/// Tool set available to subagents: files, shell and web only
pub fn build_worker_tools(workspace: &Path, settings: &SubagentSettings) -> ToolRegistry {
    let allowed_dir = settings.restrict_to_workspace.then(|| workspace.to_path_buf());

    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(ReadFileTool::new(workspace, allowed_dir.clone())));
    tools.register(Arc::new(WriteFileTool::new(workspace, allowed_dir.clone())));
    tools.register(Arc::new(ListDirTool::new(workspace, allowed_dir)));
    tools.register(Arc::new(ExecTool::new(
        workspace,
        settings.exec_timeout,
        settings.restrict_to_workspace,
    )));
    tools.register(Arc::new(WebSearchTool::new(settings.brave_api_key.clone(), 5)));
    tools.register(Arc::new(WebFetchTool::default()));
    tools
}

fn subagent_prompt(task: &str, workspace: &Path) -> String {
    format!(
        "# Background worker\n\n\
         You were started by the main agent to finish one task on your own.\n\n\
         ## Task\n{task}\n\n\
         ## Rules\n\
         - Do only this task. No side quests.\n\
         - Your final reply goes back to the main agent, not to the user.\n\
         - Be concise but include what you found or changed.\n\n\
         ## Available\n\
         - Read, write and list files\n\
         - Run shell commands\n\
         - Search the web and fetch pages\n\n\
         ## Not available\n\
         - Messaging the user directly\n\
         - Starting other workers\n\
         - The main conversation history\n\n\
         ## Workspace\n{workspace}\n\n\
         When done, reply with a clear summary of the outcome.",
        task = task,
        workspace = workspace.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::tools::ToolDefinition;
    use crate::providers::LlmResponse;
    use async_trait::async_trait;

    struct DoneProvider;

    #[async_trait]
    impl LlmProvider for DoneProvider {
        async fn chat(&self, _: &[ChatMessage], _: &[ToolDefinition], _: &ChatOptions) -> LlmResponse {
            LlmResponse::text("all done")
        }
        fn default_model(&self) -> &str {
            "test"
        }
    }

    #[test]
    fn test_worker_tools_are_restricted() {
        let tools = build_worker_tools(Path::new("/tmp/ws"), &SubagentSettings::default());
        assert_eq!(
            tools.tool_names(),
            vec!["exec", "list_dir", "read_file", "web_fetch", "web_search", "write_file"]
        );
        assert!(!tools.has("message"));
        assert!(!tools.has("spawn"));
    }

    #[tokio::test]
    async fn test_spawn_returns_immediately_and_announces() {
        let dir = tempfile::TempDir::new().unwrap();
        let bus = Arc::new(MessageBus::new());
        let manager = SubagentManager::new(Arc::new(DoneProvider), bus.clone(), dir.path(), SubagentSettings::default());

        let reply = manager.spawn("Summarize the README file in the workspace", None, "telegram", "42");
        assert!(reply.starts_with("Subagent [Summarize the README file in t...] started (id: "));
        assert_eq!(manager.get_running_count(), 1);

        let msg = bus.consume_inbound().await.unwrap();
        assert_eq!(msg.channel, "system");
        assert_eq!(msg.sender_id, "subagent");
        assert_eq!(msg.chat_id, "telegram:42");
        assert!(msg.content.contains("completed successfully"));
        assert!(msg.content.contains("Result:\nall done"));
        assert_eq!(msg.metadata["status"], "ok");
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(SubagentStatus::Completed.as_str(), "ok");
        assert_eq!(SubagentStatus::Failed.as_str(), "error");
    }
}
