//! LLM Providers
//!
//! Completion backends behind one contract:
//! - `AnthropicProvider`: Messages API with tool use and prompt caching
//! - `OpenAiCompatProvider`: any `/chat/completions` endpoint
//!   (OpenAI, OpenRouter, vLLM, DeepSeek, ...)
//!
//! Providers never fail: transport and API errors come back as an
//! `LlmResponse` with `finish_reason = "error"` and the error text as content.

pub mod anthropic;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiCompatProvider;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use crate::agent::tools::ToolDefinition;
use crate::config::Config;

/// Transcript role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// A tool call requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// One transcript entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// Assistant turn that requested tool calls
    pub fn assistant_with_tools(content: Option<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls,
            tool_call_id: None,
            name: None,
        }
    }

    /// Result of one tool call
    pub fn tool_result(tool_call_id: &str, name: &str, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.to_string()),
            name: Some(name.to_string()),
        }
    }

    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

/// Token usage for one call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Response from a provider
#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    pub finish_reason: String,
    pub usage: Usage,
}

impl LlmResponse {
    /// Final text response
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
            finish_reason: "stop".to_string(),
            usage: Usage::default(),
        }
    }

    /// Response requesting tool calls
    pub fn with_tool_calls(content: Option<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            content,
            tool_calls,
            finish_reason: "tool_calls".to_string(),
            usage: Usage::default(),
        }
    }

    /// Backend failure surfaced as content
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: Some(message.into()),
            tool_calls: Vec::new(),
            finish_reason: "error".to_string(),
            usage: Usage::default(),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    pub fn is_error(&self) -> bool {
        self.finish_reason == "error"
    }
}

/// Per-call generation options
#[derive(Debug, Clone, PartialEq)]
pub struct ChatOptions {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            model: crate::config::DEFAULT_MODEL.to_string(),
            max_tokens: 8192,
            temperature: 0.7,
        }
    }
}

/// Completion backend contract
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a transcript plus tool definitions; never fails
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        options: &ChatOptions,
    ) -> LlmResponse;

    /// Model used when the caller has no preference
    fn default_model(&self) -> &str;
}

/// Parse tool-call argument text; malformed JSON is kept as `{"raw": text}`
pub fn parse_tool_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::json!({ "raw": raw }))
}

/// Pick a provider from configuration
pub fn from_config(config: &Config) -> Result<Arc<dyn LlmProvider>> {
    let model = config.agent.model.as_str();
    let providers = &config.providers;
    let is_claude = model.starts_with("anthropic/") || model.contains("claude");

    if is_claude && providers.api_base.is_none() {
        if let Some(key) = providers.anthropic_api_key.as_deref() {
            info!("Using Anthropic provider for {}", model);
            return Ok(Arc::new(AnthropicProvider::new(key, model)));
        }
    }

    let key = providers
        .openai_api_key
        .as_deref()
        .or(providers.anthropic_api_key.as_deref().filter(|_| providers.api_base.is_some()));

    if key.is_some() || providers.api_base.is_some() {
        let base = providers.api_base.as_deref();
        info!(
            "Using OpenAI-compatible provider for {} ({})",
            model,
            base.unwrap_or(openai::DEFAULT_API_BASE)
        );
        return Ok(Arc::new(OpenAiCompatProvider::new(key, base, model)));
    }

    bail!("No LLM API key configured. Set ANTHROPIC_API_KEY or OPENAI_API_KEY, or providers.* in the config file")
}
