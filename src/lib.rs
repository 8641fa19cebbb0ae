//! MCP servers that put the Claude Code CLI behind prompt tools
//!
//! Each tool call runs `claude` once, non-interactively, with a restricted
//! tool set and a timeout. Servers speak MCP over stdio or streamable HTTP
//! (with OAuth), and a reverse proxy can publish both services on one origin.

// Allow multiple crate versions from dependencies (can't easily control)
#![allow(clippy::multiple_crate_versions)]

pub mod auth;
pub mod claude;
pub mod cli;
pub mod config;
pub mod doctor;
pub mod log;
pub mod proxy;
pub mod server;
pub mod tools;

// Re-export commonly used types
pub use claude::{ClaudeExecutor, ExecutionOutcome, ExecutionRequest, Invocation};
pub use config::Config;
pub use server::{ClaudeCodeServer, Service, ThinkingServer};
pub use tools::{ToolRegistry, ToolResponse};
