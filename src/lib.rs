//! pocketbot
//!
//! Personal assistant agent that lives in chat channels.
//!
//! # Features
//!
//! - **Tool Calling**: file, shell, web, messaging, scheduling and delegation tools
//!   with JSON-Schema parameter validation
//! - **Subagents**: background workers that report results back to the chat
//! - **Cron**: persistent jobs on intervals, cron expressions or one-shot times
//! - **Heartbeat**: periodic wake-ups driven by `HEARTBEAT.md`
//! - **Providers**: Anthropic Messages API and OpenAI-compatible endpoints
//!
//! # Architecture
//!
//! ```text
//! Channels ──► MessageBus (inbound) ──► AgentLoop ──► LLM Provider
//!    ▲                                     │
//!    │                                     ├── ToolRegistry
//!    │                                     ├── SessionStore (SQLite)
//!    │                                     └── SubagentManager ──► bus (system)
//!    │
//!    └──────── MessageBus (outbound) ◄─────┘
//!
//! CronService / HeartbeatService ──► AgentLoop::process_direct
//! ```

pub mod agent;
pub mod bus;
pub mod channels;
pub mod config;
pub mod cron;
pub mod heartbeat;
pub mod providers;
pub mod session;
pub mod utils;

pub use agent::{AgentLoop, SubagentManager, SubagentSettings, Tool, ToolRegistry};
pub use bus::{InboundMessage, MessageBus, OutboundMessage};
pub use config::Config;
pub use cron::{CronError, CronJob, CronSchedule, CronService};
pub use heartbeat::{HeartbeatOutcome, HeartbeatService};
pub use providers::{ChatMessage, ChatOptions, LlmProvider, LlmResponse};
pub use session::SessionStore;
