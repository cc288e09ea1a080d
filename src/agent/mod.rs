//! Agent core
//!
//! - `tools`: tool trait, parameter schemas, registry and built-in tools
//! - `reasoning`: the model/tool loop shared by every agent
//! - `subagent`: background workers that report back through the bus
//! - `runner`: the primary agent serving chat channels
//! - `context`: system prompt assembly from workspace files

pub mod context;
pub mod reasoning;
pub mod runner;
pub mod subagent;
pub mod tools;

pub use context::ContextBuilder;
pub use reasoning::{run_tool_loop, LoopOutcome};
pub use runner::AgentLoop;
pub use subagent::{SubagentInfo, SubagentManager, SubagentSettings, SubagentStatus};
pub use tools::{Schema, Tool, ToolDefinition, ToolRegistry};
