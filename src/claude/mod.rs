//! Claude Code integration
//!
//! This module handles locating the CLI, building its shell invocation,
//! and running it to a normalized outcome.

pub mod cli;
pub mod environment;
pub mod executor;
pub mod request;

pub use executor::ClaudeExecutor;
pub use request::{ExecutionOutcome, ExecutionRequest, Invocation};
