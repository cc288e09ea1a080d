//! Reasoning loop shared by the primary agent and subagents.
//!
//! Calls the model, runs any requested tools, feeds results back, and
//! repeats until the model answers in plain text or the iteration
//! ceiling is hit.

use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

use super::tools::ToolRegistry;
use crate::providers::{ChatMessage, ChatOptions, LlmProvider};
use crate::utils::truncate_chars;

/// How a loop run ended
#[derive(Debug, Clone, PartialEq)]
pub struct LoopOutcome {
    /// Final assistant text, if the model produced one
    pub content: Option<String>,
    /// Model calls made
    pub iterations: usize,
    /// Ceiling reached while the model was still calling tools
    pub exhausted: bool,
    /// Tool names invoked, in call order
    pub tools_used: Vec<String>,
}

/// Run the tool-calling loop on `messages`, appending every turn to it.
///
/// `progress`, when given, is updated with the current iteration number.
pub async fn run_tool_loop(
    provider: &dyn LlmProvider,
    tools: &ToolRegistry,
    messages: &mut Vec<ChatMessage>,
    options: &ChatOptions,
    max_iterations: usize,
    progress: Option<&AtomicUsize>,
) -> LoopOutcome {
    let definitions = tools.get_definitions();
    let mut tools_used = Vec::new();
    let mut iteration = 0;

    while iteration < max_iterations {
        iteration += 1;
        if let Some(counter) = progress {
            counter.store(iteration, Ordering::Relaxed);
        }

        let response = provider.chat(messages.as_slice(), &definitions, options).await;

        if !response.has_tool_calls() {
            if let Some(text) = &response.content {
                messages.push(ChatMessage::assistant(text.clone()));
            }
            return LoopOutcome {
                content: response.content,
                iterations: iteration,
                exhausted: false,
                tools_used,
            };
        }

        messages.push(ChatMessage::assistant_with_tools(
            response.content.clone(),
            response.tool_calls.clone(),
        ));

        for call in &response.tool_calls {
            let args_text = call.arguments.to_string();
            info!("Tool call: {}({})", call.name, truncate_chars(&args_text, 200));
            let result = tools.execute(&call.name, call.arguments.clone()).await;
            debug!("Tool {} returned {} chars", call.name, result.len());
            messages.push(ChatMessage::tool_result(&call.id, &call.name, result));
            tools_used.push(call.name.clone());
        }
    }

    LoopOutcome {
        content: None,
        iterations: iteration,
        exhausted: true,
        tools_used,
    }
}
