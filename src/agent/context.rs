//! System prompt assembly for the primary agent.

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::providers::ChatMessage;
use crate::session::SessionMessage;

/// Workspace files folded into the system prompt, in order
pub const BOOTSTRAP_FILES: [&str; 5] = ["AGENTS.md", "SOUL.md", "USER.md", "TOOLS.md", "IDENTITY.md"];

const MEMORY_FILE: &str = "memory/MEMORY.md";

pub struct ContextBuilder {
    workspace: PathBuf,
}

impl ContextBuilder {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn build_system_prompt(&self) -> String {
        let mut parts = vec![self.identity()];

        for name in BOOTSTRAP_FILES {
            if let Some(content) = read_nonempty(&self.workspace.join(name)) {
                parts.push(format!("## {}\n\n{}", name, content));
            }
        }

        if let Some(memory) = read_nonempty(&self.workspace.join(MEMORY_FILE)) {
            parts.push(format!("# Memory\n\n{}", memory));
        }

        parts.join("\n\n---\n\n")
    }

    /// System prompt, prior turns, then the current message
    pub fn build_messages(&self, history: &[SessionMessage], current: &str, channel: &str, chat_id: &str) -> Vec<ChatMessage> {
        let mut system = self.build_system_prompt();
        system.push_str(&format!("\n\n## Current Session\nChannel: {}\nChat ID: {}", channel, chat_id));

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(system));
        for turn in history {
            match turn.role.as_str() {
                "assistant" => messages.push(ChatMessage::assistant(turn.content.clone())),
                _ => messages.push(ChatMessage::user(turn.content.clone())),
            }
        }
        messages.push(ChatMessage::user(current));
        messages
    }

    fn identity(&self) -> String {
        let now = chrono::Local::now().format("%Y-%m-%d %H:%M (%A)");
        format!(
            "# pocketbot\n\n\
             You are pocketbot, a helpful personal assistant. You can:\n\
             - Read, write and list files\n\
             - Run shell commands\n\
             - Search the web and fetch pages\n\
             - Send messages to chat channels\n\
             - Start background workers for long tasks\n\
             - Schedule reminders and recurring jobs\n\n\
             ## Current Time\n{now}\n\n\
             ## Workspace\n\
             Your workspace is at: {ws}\n\
             - Memory file: {ws}/{memory}\n\
             - Heartbeat tasks: {ws}/HEARTBEAT.md\n\n\
             Reply directly with text for normal conversation. \
             Use the 'message' tool only to reach a specific chat channel.",
            now = now,
            ws = self.workspace.display(),
            memory = MEMORY_FILE,
        )
    }
}

fn read_nonempty(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return None;
    }
    debug!("Loaded context file {}", path.display());
    Some(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::Role;

    #[test]
    fn test_bootstrap_files_and_memory() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("SOUL.md"), "Be kind.").unwrap();
        std::fs::write(dir.path().join("USER.md"), "   ").unwrap();
        std::fs::create_dir_all(dir.path().join("memory")).unwrap();
        std::fs::write(dir.path().join("memory/MEMORY.md"), "Likes tea.").unwrap();

        let prompt = ContextBuilder::new(dir.path()).build_system_prompt();
        assert!(prompt.contains("## SOUL.md\n\nBe kind."));
        assert!(!prompt.contains("## USER.md"));
        assert!(prompt.contains("Likes tea."));
    }

    #[test]
    fn test_build_messages_order() {
        let dir = tempfile::TempDir::new().unwrap();
        let history = vec![
            SessionMessage {
                role: "user".into(),
                content: "hi".into(),
                timestamp: 1,
            },
            SessionMessage {
                role: "assistant".into(),
                content: "hello".into(),
                timestamp: 2,
            },
        ];

        let messages = ContextBuilder::new(dir.path()).build_messages(&history, "how are you?", "cli", "direct");
        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::User]);
        assert!(messages[0].text().contains("Chat ID: direct"));
        assert_eq!(messages[3].text(), "how are you?");
    }
}
