//! Tool Framework
//!
//! Capabilities the model can invoke by name:
//! - `Tool` trait with a typed parameter schema
//! - Registry with recursive validation before dispatch
//! - OpenAI function-calling definitions
//!
//! `ToolRegistry::execute` never fails: unknown tools, invalid
//! parameters, tool errors and panics all come back as error text
//! the model can read and react to.

pub mod cron;
pub mod filesystem;
pub mod message;
pub mod schema;
pub mod shell;
pub mod spawn;
pub mod web;

pub use cron::CronTool;
pub use filesystem::{ListDirTool, ReadFileTool, WriteFileTool};
pub use message::MessageTool;
pub use schema::{Schema, SchemaType};
pub use shell::ExecTool;
pub use spawn::SpawnTool;
pub use web::{WebFetchTool, WebSearchTool};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::utils::panic_message;

/// A capability the agent can invoke
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name used in function calls
    fn name(&self) -> &str;

    /// What the tool does (shown to the model)
    fn description(&self) -> &str;

    /// Parameter schema; the root is always an object
    fn parameters(&self) -> Schema;

    /// Run the tool with already-validated arguments
    async fn execute(&self, args: Map<String, Value>) -> Result<String>;

    /// OpenAI function-calling definition
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(self.name(), self.description(), self.parameters().to_json())
    }
}

/// Tool definition in OpenAI function format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn function(name: &str, description: &str, parameters: Value) -> Self {
        Self {
            kind: "function".to_string(),
            function: FunctionDefinition {
                name: name.to_string(),
                description: description.to_string(),
                parameters,
            },
        }
    }
}

/// Origin of the current turn, for tools that route replies or spawn work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolContext {
    pub channel: String,
    pub chat_id: String,
}

impl Default for ToolContext {
    fn default() -> Self {
        Self {
            channel: "cli".to_string(),
            chat_id: "direct".to_string(),
        }
    }
}

/// Registry of available tools
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool; an existing tool with the same name is replaced
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            warn!("Replaced tool: {}", name);
        } else {
            debug!("Registered tool: {}", name);
        }
    }

    /// Remove a tool by name
    pub fn unregister(&mut self, name: &str) -> bool {
        let removed = self.tools.remove(name).is_some();
        if removed {
            info!("Unregistered tool: {}", name);
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered tool names, sorted
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Definitions of every tool, sorted by name for stable prompts
    pub fn get_definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.definition()).collect();
        defs.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        defs
    }

    /// Validate and run a tool. Always returns text; failures are reported as `Error...`.
    pub async fn execute(&self, name: &str, args: Value) -> String {
        let Some(tool) = self.tools.get(name) else {
            return format!("Error: Tool '{}' not found", name);
        };

        let errors = tool.parameters().validate(&args);
        if !errors.is_empty() {
            return format!(
                "Error: Invalid parameters for tool '{}': {}",
                name,
                errors.join("; ")
            );
        }

        let params = match args {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        let start = Instant::now();
        let outcome = AssertUnwindSafe(tool.execute(params)).catch_unwind().await;
        debug!("Tool {} finished in {}ms", name, start.elapsed().as_millis());

        match outcome {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!("Tool {} failed: {}", name, e);
                format!("Error executing {}: {}", name, e)
            }
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                warn!("Tool {} panicked: {}", name, msg);
                format!("Error executing {}: panicked: {}", name, msg)
            }
        }
    }
}

/// Required string argument
pub(crate) fn required_str<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("missing '{}'", key))
}

/// Optional string argument
pub(crate) fn optional_str<'a>(args: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str()).filter(|s| !s.is_empty())
}
