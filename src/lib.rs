//! Crow Agent - a standalone LLM coding agent with tools
//!
//! This crate provides:
//! - A content-addressed file editor and turn-scoped undo log
//! - An in-process shell, file search, and sub-agent delegation
//! - CLI interface for interactive use

pub mod auth;
pub mod config;
pub mod delta_tracker;
pub mod gitignore;
pub mod hashline;
pub mod message;
pub mod session;
pub mod shell;
pub mod telemetry;
pub mod trace_layer;

// Agent system
pub mod agent;
pub mod events;
pub mod provider;
pub mod sub_agent;
pub mod tool;
pub mod tool_proxy;
pub mod tools;
pub mod turn_loop;

pub use auth::AuthConfig;
pub use config::Config;
pub use delta_tracker::{DeltaTracker, FileSnapshot};
pub use events::{AgentEvent, AgentEventStream, TurnResult};
pub use hashline::{Anchor, HashLineError};
pub use provider::{ProviderClient, ProviderConfig, StreamDelta};
pub use session::{FileReadTracker, Session, SessionToolExecutor};
pub use sub_agent::SubAgentTool;
pub use telemetry::{Telemetry, TraceGuard};
pub use tool_proxy::{ToolProxy, ToolProxyError, UpstreamConfig};
pub use turn_loop::{Scratchpad, ToolExecutor, TurnLoop};
