//! Configuration management
//!
//! Settings come from `~/.pocketbot/config.toml` (every field optional),
//! then environment variables (and a `.env` file) override them.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::agent::subagent::SubagentSettings;
use crate::providers::ChatOptions;
use crate::utils::expand_path;

pub const DEFAULT_MODEL: &str = "anthropic/claude-opus-4-5";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub agent: AgentConfig,
    pub providers: ProvidersConfig,
    pub tools: ToolsConfig,
    pub heartbeat: HeartbeatConfig,
    pub channels: ChannelsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub workspace: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub max_tool_iterations: usize,
    pub subagent_max_iterations: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            workspace: "~/.pocketbot/workspace".to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 8192,
            temperature: 0.7,
            max_tool_iterations: 20,
            subagent_max_iterations: 15,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    /// OpenAI-compatible endpoint (OpenRouter, vLLM, ...)
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub exec_timeout_secs: u64,
    /// Confine file and shell tools to the workspace
    pub restrict_to_workspace: bool,
    pub brave_api_key: Option<String>,
    pub web_search_max_results: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            exec_timeout_secs: 60,
            restrict_to_workspace: false,
            brave_api_key: None,
            web_search_max_results: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30 * 60,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    pub cli: CliChannelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliChannelConfig {
    pub enabled: bool,
    pub allow_from: Vec<String>,
}

impl Default for CliChannelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_from: Vec::new(),
        }
    }
}

impl Config {
    /// Load from the default file plus environment
    pub fn from_env() -> Result<Self> {
        Self::load(&Self::default_path())
    }

    /// Load from `path` (missing file means defaults) plus environment
    pub fn load(path: &Path) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            Self::from_toml(&text).with_context(|| format!("parsing config {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Apply environment overrides; `get` looks a variable up
    pub fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("ANTHROPIC_API_KEY") {
            self.providers.anthropic_api_key = Some(key);
        }
        if let Some(key) = get("OPENAI_API_KEY") {
            self.providers.openai_api_key = Some(key);
        }
        if let Some(base) = get("POCKETBOT_API_BASE") {
            self.providers.api_base = Some(base);
        }
        if let Some(model) = get("POCKETBOT_MODEL") {
            self.agent.model = model;
        }
        if let Some(workspace) = get("POCKETBOT_WORKSPACE") {
            self.agent.workspace = workspace;
        }
        if let Some(key) = get("BRAVE_API_KEY") {
            self.tools.brave_api_key = Some(key);
        }
        if let Some(secs) = get("POCKETBOT_HEARTBEAT_INTERVAL").and_then(|v| v.parse().ok()) {
            self.heartbeat.interval_secs = secs;
        }
        if let Some(v) = get("POCKETBOT_RESTRICT_WORKSPACE") {
            self.tools.restrict_to_workspace = v == "true" || v == "1";
        }
    }

    /// `~/.pocketbot/config.toml`
    pub fn default_path() -> PathBuf {
        Self::data_dir().join("config.toml")
    }

    pub fn data_dir() -> PathBuf {
        crate::utils::data_dir()
    }

    pub fn workspace_path(&self) -> PathBuf {
        expand_path(&self.agent.workspace)
    }

    pub fn cron_store_path(&self) -> PathBuf {
        Self::data_dir().join("cron").join("jobs.json")
    }

    pub fn sessions_db_path(&self) -> PathBuf {
        Self::data_dir().join("sessions.db")
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat.interval_secs.max(1))
    }

    pub fn chat_options(&self) -> ChatOptions {
        ChatOptions {
            model: self.agent.model.clone(),
            max_tokens: self.agent.max_tokens,
            temperature: self.agent.temperature,
        }
    }

    pub fn subagent_settings(&self) -> SubagentSettings {
        SubagentSettings {
            model: self.agent.model.clone(),
            temperature: self.agent.temperature,
            max_iterations: self.agent.subagent_max_iterations,
            exec_timeout: Duration::from_secs(self.tools.exec_timeout_secs),
            restrict_to_workspace: self.tools.restrict_to_workspace,
            brave_api_key: self.tools.brave_api_key.clone(),
            ..SubagentSettings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [agent]
            model = "openai/gpt-4o"

            [heartbeat]
            enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(config.agent.model, "openai/gpt-4o");
        assert_eq!(config.agent.max_tool_iterations, 20);
        assert!(!config.heartbeat.enabled);
        assert_eq!(config.heartbeat.interval_secs, 1800);
        assert_eq!(config.tools.exec_timeout_secs, 60);
        assert!(config.channels.cli.enabled);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("POCKETBOT_MODEL", "anthropic/claude-sonnet-4"),
            ("POCKETBOT_HEARTBEAT_INTERVAL", "60"),
            ("POCKETBOT_RESTRICT_WORKSPACE", "1"),
            ("OPENAI_API_KEY", ""),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.agent.model, "anthropic/claude-sonnet-4");
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(60));
        assert!(config.tools.restrict_to_workspace);
        assert_eq!(config.providers.openai_api_key, None);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.agent.temperature, 0.7);
    }

    #[test]
    fn test_subagent_settings_follow_config() {
        let mut config = Config::default();
        config.agent.subagent_max_iterations = 7;
        config.tools.exec_timeout_secs = 5;
        let settings = config.subagent_settings();
        assert_eq!(settings.max_iterations, 7);
        assert_eq!(settings.exec_timeout, Duration::from_secs(5));
        assert_eq!(settings.max_tokens, 4096);
    }
}
