//! OpenAI-compatible chat completions provider.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{parse_tool_arguments, ChatMessage, ChatOptions, LlmProvider, LlmResponse, ToolCallRequest, Usage};
use crate::agent::tools::ToolDefinition;

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default = "function_type")]
    kind: String,
    function: WireFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn no_tools(tools: &&[ToolDefinition]) -> bool {
    tools.is_empty()
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "no_tools")]
    tools: &'a [ToolDefinition],
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

/// Provider for any OpenAI-style `/chat/completions` endpoint
#[derive(Clone)]
pub struct OpenAiCompatProvider {
    client: Client,
    api_key: Option<String>,
    api_base: String,
    default_model: String,
}

impl OpenAiCompatProvider {
    pub fn new(api_key: Option<&str>, api_base: Option<&str>, default_model: &str) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(300))
                .build()
                .unwrap_or_default(),
            api_key: api_key.map(|s| s.to_string()),
            api_base: api_base
                .unwrap_or(DEFAULT_API_BASE)
                .trim_end_matches('/')
                .to_string(),
            default_model: default_model.to_string(),
        }
    }

    /// Gateways (custom base) take the full model path; OpenAI itself wants the bare id
    fn model_name<'a>(&self, model: &'a str) -> &'a str {
        if self.api_base == DEFAULT_API_BASE {
            model.strip_prefix("openai/").unwrap_or(model)
        } else {
            model
        }
    }

    async fn send(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        options: &ChatOptions,
    ) -> Result<LlmResponse> {
        let model = self.model_name(&options.model);
        let request = CompletionRequest {
            model,
            messages: messages.iter().map(to_wire).collect(),
            tools,
            tool_choice: if tools.is_empty() { None } else { Some("auto") },
            max_tokens: options.max_tokens.max(1),
            temperature: options.temperature,
        };

        let url = format!("{}/chat/completions", self.api_base);
        debug!("Calling {}: model={}, messages={}", url, model, messages.len());

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await?;
            anyhow::bail!("API error {}: {}", status, text);
        }

        let result: CompletionResponse = response.json().await?;
        let choice = result
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("response contained no choices"))?;

        let tool_calls: Vec<ToolCallRequest> = choice
            .message
            .tool_calls
            .into_iter()
            .map(|call| ToolCallRequest {
                id: call.id,
                name: call.function.name,
                arguments: parse_tool_arguments(&call.function.arguments),
            })
            .collect();

        let usage = result.usage.unwrap_or_default();
        info!(
            "Completion: model={}, in={}, out={}, tool_calls={}",
            model,
            usage.prompt_tokens,
            usage.completion_tokens,
            tool_calls.len()
        );

        Ok(LlmResponse {
            content: choice.message.content,
            tool_calls,
            finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
            usage,
        })
    }
}

fn to_wire(msg: &ChatMessage) -> WireMessage<'_> {
    WireMessage {
        role: msg.role.as_str(),
        content: msg.content.as_deref(),
        tool_calls: msg
            .tool_calls
            .iter()
            .map(|call| WireToolCall {
                id: call.id.clone(),
                kind: function_type(),
                function: WireFunction {
                    name: call.name.clone(),
                    arguments: call.arguments.to_string(),
                },
            })
            .collect(),
        tool_call_id: msg.tool_call_id.as_deref(),
        name: msg.name.as_deref(),
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        options: &ChatOptions,
    ) -> LlmResponse {
        match self.send(messages, tools, options).await {
            Ok(response) => response,
            Err(e) => {
                warn!("LLM call failed: {}", e);
                LlmResponse::error(format!("Error calling LLM: {}", e))
            }
        }
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}
