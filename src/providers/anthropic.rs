//! Anthropic Messages API provider
//!
//! Tool use over the Messages API, with prompt caching on the system prompt.
//! Uses cache_control: ephemeral so the static context is billed at cache rates.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{ChatMessage, ChatOptions, LlmProvider, LlmResponse, Role, ToolCallRequest, Usage};
use crate::agent::tools::ToolDefinition;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// System message block with optional cache control
#[derive(Debug, Serialize)]
struct SystemBlock {
    r#type: &'static str,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<CacheControl>,
}

#[derive(Debug, Serialize)]
struct CacheControl {
    r#type: &'static str,
}

/// Content block sent to the API
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RequestBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
    ToolResult { tool_use_id: String, content: String },
}

#[derive(Debug, Serialize, PartialEq)]
struct ApiMessage {
    role: &'static str,
    content: Vec<RequestBlock>,
}

#[derive(Debug, Serialize)]
struct ApiTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a Value,
}

/// API request
#[derive(Debug, Serialize)]
struct MessageRequest<'a> {
    model: String,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    system: Vec<SystemBlock>,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool<'a>>,
}

/// API response
#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Vec<ResponseBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    usage: ApiUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    input_tokens: u64,
    output_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: u64,
}

/// Anthropic Claude provider
#[derive(Clone)]
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    default_model: String,
}

impl AnthropicProvider {
    pub fn new(api_key: &str, default_model: &str) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(300))
                .build()
                .unwrap_or_default(),
            api_key: api_key.to_string(),
            default_model: default_model.to_string(),
        }
    }

    /// Resolve a model name or hint to an API model id
    fn model_id(model: &str) -> String {
        let model = model.strip_prefix("anthropic/").unwrap_or(model);
        match model.to_lowercase().as_str() {
            "haiku" => "claude-3-5-haiku-20241022".to_string(),
            "sonnet" => "claude-sonnet-4-20250514".to_string(),
            "opus" => "claude-opus-4-5".to_string(),
            _ => model.to_string(),
        }
    }

    async fn send(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        options: &ChatOptions,
    ) -> Result<LlmResponse> {
        let model_id = Self::model_id(&options.model);
        let (system, api_messages) = convert_messages(messages);

        let request = MessageRequest {
            model: model_id.clone(),
            max_tokens: options.max_tokens.max(1),
            temperature: options.temperature,
            system,
            messages: api_messages,
            tools: tools
                .iter()
                .map(|t| ApiTool {
                    name: &t.function.name,
                    description: &t.function.description,
                    input_schema: &t.function.parameters,
                })
                .collect(),
        };

        debug!(
            "Calling Anthropic API: model={}, messages={}, tools={}",
            model_id,
            request.messages.len(),
            request.tools.len()
        );

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await?;
            anyhow::bail!("Anthropic API error {}: {}", status, text);
        }

        let result: MessageResponse = response.json().await?;

        let mut texts = Vec::new();
        let mut tool_calls = Vec::new();
        for block in result.content {
            match block {
                ResponseBlock::Text { text } => texts.push(text),
                ResponseBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCallRequest { id, name, arguments: input })
                }
                ResponseBlock::Other => {}
            }
        }

        let finish_reason = match result.stop_reason.as_deref() {
            Some("tool_use") => "tool_calls",
            Some("max_tokens") => "length",
            Some("end_turn") | Some("stop_sequence") | None => "stop",
            Some(other) => other,
        }
        .to_string();

        let usage = Usage {
            prompt_tokens: result.usage.input_tokens,
            completion_tokens: result.usage.output_tokens,
            total_tokens: result.usage.input_tokens + result.usage.output_tokens,
        };

        info!(
            "Anthropic response: model={}, in={}, out={}, cache_read={}, tool_calls={}",
            model_id,
            usage.prompt_tokens,
            usage.completion_tokens,
            result.usage.cache_read_input_tokens,
            tool_calls.len()
        );

        Ok(LlmResponse {
            content: if texts.is_empty() { None } else { Some(texts.join("\n")) },
            tool_calls,
            finish_reason,
            usage,
        })
    }
}

/// Split the transcript into cached system blocks and alternating API messages.
///
/// Consecutive turns with the same API role are merged; tool results
/// become `tool_result` blocks on a user turn.
fn convert_messages(messages: &[ChatMessage]) -> (Vec<SystemBlock>, Vec<ApiMessage>) {
    let mut system = Vec::new();
    let mut out: Vec<ApiMessage> = Vec::new();

    for msg in messages {
        let (role, blocks) = match msg.role {
            Role::System => {
                system.push(SystemBlock {
                    r#type: "text",
                    text: msg.text().to_string(),
                    cache_control: Some(CacheControl { r#type: "ephemeral" }),
                });
                continue;
            }
            Role::User => ("user", text_block(msg.text())),
            Role::Assistant => {
                let mut blocks = text_block(msg.text());
                blocks.extend(msg.tool_calls.iter().map(|call| RequestBlock::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.arguments.clone(),
                }));
                ("assistant", blocks)
            }
            Role::Tool => (
                "user",
                vec![RequestBlock::ToolResult {
                    tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                    content: msg.text().to_string(),
                }],
            ),
        };

        if blocks.is_empty() {
            continue;
        }
        match out.last_mut() {
            Some(last) if last.role == role => last.content.extend(blocks),
            _ => out.push(ApiMessage { role, content: blocks }),
        }
    }

    // Single cache breakpoint, on the last system block
    let count = system.len();
    for (i, block) in system.iter_mut().enumerate() {
        if i + 1 != count {
            block.cache_control = None;
        }
    }

    (system, out)
}

fn text_block(text: &str) -> Vec<RequestBlock> {
    if text.trim().is_empty() {
        Vec::new()
    } else {
        vec![RequestBlock::Text { text: text.to_string() }]
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        options: &ChatOptions,
    ) -> LlmResponse {
        match self.send(messages, tools, options).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Anthropic call failed: {}", e);
                LlmResponse::error(format!("Error calling LLM: {}", e))
            }
        }
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_model_id() {
        assert_eq!(AnthropicProvider::model_id("anthropic/claude-opus-4-5"), "claude-opus-4-5");
        assert_eq!(AnthropicProvider::model_id("haiku"), "claude-3-5-haiku-20241022");
        assert_eq!(AnthropicProvider::model_id("claude-custom"), "claude-custom");
    }

    #[test]
    fn test_convert_tool_round() {
        let messages = vec![
            ChatMessage::system("You are helpful."),
            ChatMessage::user("list files"),
            ChatMessage::assistant_with_tools(
                None,
                vec![
                    ToolCallRequest { id: "t1".into(), name: "list_dir".into(), arguments: json!({"path": "."}) },
                    ToolCallRequest { id: "t2".into(), name: "read_file".into(), arguments: json!({"path": "a"}) },
                ],
            ),
            ChatMessage::tool_result("t1", "list_dir", "[file] a"),
            ChatMessage::tool_result("t2", "read_file", "hello"),
        ];

        let (system, api) = convert_messages(&messages);
        assert_eq!(system.len(), 1);
        assert!(system[0].cache_control.is_some());
        assert_eq!(api.len(), 3);
        assert_eq!(api[1].role, "assistant");
        assert_eq!(api[1].content.len(), 2);
        assert_eq!(api[2].role, "user");
        assert_eq!(api[2].content.len(), 2);
        assert!(matches!(&api[2].content[0], RequestBlock::ToolResult { tool_use_id, .. } if tool_use_id == "t1"));
    }

    #[test]
    fn test_parse_response_blocks() {
        let raw = json!({
            "content": [
                {"type": "text", "text": "Let me check."},
                {"type": "tool_use", "id": "tu_1", "name": "exec", "input": {"command": "ls"}},
                {"type": "thinking", "thinking": "..."}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 10, "output_tokens": 5}
        });
        let parsed: MessageResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.content.len(), 3);
        assert!(matches!(parsed.content[2], ResponseBlock::Other));
    }
}
