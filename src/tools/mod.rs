//! MCP tools
//!
//! Each tool turns its JSON arguments into one or more Claude Code
//! executions and renders the outcome as a single text response.

pub mod claude_code;
pub mod code_editor;
pub mod code_formatter;
pub mod code_reviewer;
pub mod context_engine;
pub mod paths;
pub mod template;
pub mod thinking;

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};
use uuid::Uuid;

use crate::claude::{ClaudeExecutor, ExecutionOutcome};

pub use claude_code::ClaudeCodeTool;
pub use code_editor::CodeEditorTool;
pub use code_formatter::CodeFormatterTool;
pub use code_reviewer::CodeReviewerTool;
pub use context_engine::ContextEngineTool;
pub use thinking::{SequentialThinking, ThoughtData};

/// Text returned when a successful run printed nothing.
pub const EMPTY_OUTPUT_HINT: &str = "The query was processed but no results were returned. \
     Please try again with more specific details or as a new query instead of a follow-up.";

/// Metadata attached to responses that came from an execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    /// Exit code of the process, when it exited on its own
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Random id correlating this response with logs
    pub session_id: Uuid,
    /// Set when the process succeeded without printing anything
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub empty_output: bool,
}

/// What a tool hands back to the MCP layer: one text block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResponse {
    /// Text content
    pub text: String,
    /// Whether the MCP result is marked as an error
    pub is_error: bool,
    /// Execution metadata, if any
    pub metadata: Option<ResponseMetadata>,
}

/// How a successful run with empty stdout is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyOutput {
    /// Pass the emptiness through as `(no content)\n`
    NoContent,
    /// Replace it with a hint asking the caller to retry
    Hint,
}

impl ToolResponse {
    /// Plain successful text.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
            metadata: None,
        }
    }

    /// `Error: <message>` with the error flag set.
    #[must_use]
    pub fn error(message: impl std::fmt::Display) -> Self {
        Self {
            text: format!("Error: {message}"),
            is_error: true,
            metadata: None,
        }
    }

    /// Render an execution outcome.
    #[must_use]
    pub fn from_outcome(outcome: &ExecutionOutcome, empty: EmptyOutput) -> Self {
        let metadata = |empty_output: bool| ResponseMetadata {
            exit_code: outcome.exit_code(),
            session_id: Uuid::new_v4(),
            empty_output,
        };

        match outcome {
            ExecutionOutcome::Success {
                stdout,
                empty_output: false,
                ..
            } => Self {
                text: stdout.clone(),
                is_error: false,
                metadata: Some(metadata(false)),
            },
            ExecutionOutcome::Success { .. } => match empty {
                EmptyOutput::NoContent => Self {
                    text: "(no content)\n".to_string(),
                    is_error: false,
                    metadata: Some(metadata(false)),
                },
                EmptyOutput::Hint => Self {
                    text: EMPTY_OUTPUT_HINT.to_string(),
                    is_error: false,
                    metadata: Some(metadata(true)),
                },
            },
            failure => {
                let message = failure.error_message().unwrap_or_default();
                let stderr = match failure {
                    ExecutionOutcome::ProcessFailure { stderr, .. } => stderr.as_str(),
                    _ => "",
                };
                Self {
                    text: format!("Error executing Claude Code: {message}\n\n{stderr}"),
                    is_error: true,
                    metadata: None,
                }
            }
        }
    }

    /// Whether this is a non-error response with nothing useful in it.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        !self.is_error
            && (self.text.trim().is_empty()
                || self.metadata.as_ref().is_some_and(|m| m.empty_output))
    }
}

/// A tool exposed over MCP that drives the Claude Code CLI.
#[async_trait]
pub trait ClaudeTool: Send + Sync {
    /// Tool name as listed to clients
    fn name(&self) -> &'static str;

    /// One-line description
    fn description(&self) -> &'static str;

    /// JSON Schema for the arguments object
    fn input_schema(&self) -> Value;

    /// Run the tool. Errors become `Error: <message>` responses.
    async fn run(&self, executor: &ClaudeExecutor, args: Value) -> Result<ToolResponse>;
}

/// Ordered set of Claude Code tools.
pub struct ToolRegistry {
    tools: Vec<Box<dyn ClaudeTool>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.tools.iter().map(|t| t.name()))
            .finish()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self {
            tools: vec![
                Box::new(ClaudeCodeTool),
                Box::new(ContextEngineTool),
                Box::new(CodeEditorTool),
                Box::new(CodeReviewerTool),
                Box::new(CodeFormatterTool),
            ],
        }
    }
}

impl ToolRegistry {
    /// All tools, in listing order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn ClaudeTool> {
        self.tools.iter().map(AsRef::as_ref)
    }

    /// Look a tool up by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&dyn ClaudeTool> {
        self.iter().find(|t| t.name() == name)
    }

    /// Call a tool by name. `None` if no such tool exists.
    pub async fn call(
        &self,
        name: &str,
        executor: &ClaudeExecutor,
        args: Value,
    ) -> Option<ToolResponse> {
        let tool = self.get(name)?;
        info!(tool = name, "Tool called");
        let response = match tool.run(executor, args).await {
            Ok(response) => response,
            Err(e) => {
                error!(tool = name, "Tool failed: {e:#}");
                ToolResponse::error(format!("{e:#}"))
            }
        };
        Some(response)
    }
}

/// Deserialize tool arguments, treating `null` as an empty object.
pub(crate) fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T> {
    let args = if args.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        args
    };
    serde_json::from_value(args).context("Invalid arguments")
}

/// Caller-supplied timeout in milliseconds, or `default_ms` when absent or zero.
pub(crate) fn timeout_or(timeout_ms: Option<u64>, default_ms: u64) -> Duration {
    Duration::from_millis(timeout_ms.filter(|t| *t > 0).unwrap_or(default_ms))
}

/// Drop `None` and blank strings, matching how optional text fields behave.
pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Names as owned strings.
pub(crate) fn owned(names: &[&str]) -> Vec<String> {
    names.iter().map(ToString::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn success(stdout: &str) -> ExecutionOutcome {
        ExecutionOutcome::Success {
            stdout: stdout.into(),
            exit_code: 0,
            empty_output: stdout.trim().is_empty(),
        }
    }

    #[test]
    fn test_success_renders_stdout() {
        let response = ToolResponse::from_outcome(&success("done\n"), EmptyOutput::Hint);
        assert_eq!(response.text, "done\n");
        assert!(!response.is_error);
        assert_eq!(response.metadata.unwrap().exit_code, Some(0));
    }

    #[test]
    fn test_empty_success_with_hint() {
        let response = ToolResponse::from_outcome(&success("  \n"), EmptyOutput::Hint);
        assert_eq!(response.text, EMPTY_OUTPUT_HINT);
        assert!(!response.is_error);
        assert!(response.metadata.as_ref().unwrap().empty_output);
        assert!(response.is_blank());
    }

    #[test]
    fn test_empty_success_with_no_content() {
        let response = ToolResponse::from_outcome(&success(""), EmptyOutput::NoContent);
        assert_eq!(response.text, "(no content)\n");
        assert!(!response.is_error);
    }

    #[test]
    fn test_process_failure_includes_stderr() {
        let outcome = ExecutionOutcome::ProcessFailure {
            stdout: String::new(),
            stderr: "permission denied".into(),
            exit_code: Some(2),
            message: "Process exited with code 2".into(),
        };
        let response = ToolResponse::from_outcome(&outcome, EmptyOutput::Hint);
        assert!(response.is_error);
        assert_eq!(
            response.text,
            "Error executing Claude Code: Process exited with code 2\n\npermission denied"
        );
    }

    #[test]
    fn test_timeout_renders_as_error() {
        let outcome = ExecutionOutcome::TimedOut {
            elapsed: Duration::from_millis(1500),
        };
        let response = ToolResponse::from_outcome(&outcome, EmptyOutput::Hint);
        assert!(response.is_error);
        assert!(response.text.contains("Command timed out after 1500ms"));
    }

    #[test]
    fn test_spawn_error_renders_as_error() {
        let outcome = ExecutionOutcome::SpawnError {
            message: "No such file or directory".into(),
        };
        let response = ToolResponse::from_outcome(&outcome, EmptyOutput::Hint);
        assert!(response.is_error);
        assert!(response
            .text
            .starts_with("Error executing Claude Code: Failed to execute command: No such file"));
    }

    #[test]
    fn test_metadata_serializes_camel_case() {
        let meta = ResponseMetadata {
            exit_code: Some(0),
            session_id: Uuid::nil(),
            empty_output: true,
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["exitCode"], 0);
        assert_eq!(json["emptyOutput"], true);
        assert!(json.get("sessionId").is_some());
    }

    #[test]
    fn test_registry_lists_tools_in_order() {
        let registry = ToolRegistry::default();
        let names: Vec<_> = registry.iter().map(|t| t.name()).collect();
        assert_eq!(
            names,
            vec![
                "ClaudeCode",
                "ContextEngine",
                "CodeEditor",
                "CodeReviewer",
                "CodeFormatter"
            ]
        );
        assert!(registry.get("CodeEditor").is_some());
        assert!(registry.get("Nope").is_none());
    }

    #[test]
    fn test_every_schema_is_an_object() {
        for tool in ToolRegistry::default().iter() {
            let schema = tool.input_schema();
            assert_eq!(schema["type"], "object", "{}", tool.name());
            assert!(schema["properties"].is_object(), "{}", tool.name());
        }
    }

    #[tokio::test]
    async fn test_call_unknown_tool_is_none() {
        let registry = ToolRegistry::default();
        let executor = ClaudeExecutor::new(crate::config::ClaudeSettings::default());
        assert!(registry
            .call("Missing", &executor, Value::Null)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_call_with_bad_arguments_is_error_response() {
        let registry = ToolRegistry::default();
        let executor = ClaudeExecutor::new(crate::config::ClaudeSettings::default());
        let response = registry
            .call("CodeEditor", &executor, serde_json::json!({"filePath": 7}))
            .await
            .unwrap();
        assert!(response.is_error);
        assert!(response.text.starts_with("Error: "));
    }

    #[test]
    fn test_timeout_or_default() {
        assert_eq!(timeout_or(None, 100), Duration::from_millis(100));
        assert_eq!(timeout_or(Some(0), 100), Duration::from_millis(100));
        assert_eq!(timeout_or(Some(5), 100), Duration::from_millis(5));
    }
}
