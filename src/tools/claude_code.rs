//! `ClaudeCode`: run an arbitrary prompt or CLI command.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::paths::format_paths_in_text;
use super::{non_blank, owned, parse_args, timeout_or, ClaudeTool, EmptyOutput, ToolResponse};
use crate::claude::{ClaudeExecutor, ExecutionRequest};

const DEFAULT_TIMEOUT_MS: u64 = 180_000;
const DEFAULT_ALLOWED_TOOLS: &[&str] = &["Bash", "Read", "Edit"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Args {
    prompt: Option<String>,
    command: Option<String>,
    allowed_tools: Option<Vec<String>>,
    timeout: Option<u64>,
}

/// General-purpose passthrough to the Claude Code CLI.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClaudeCodeTool;

impl ClaudeCodeTool {
    fn request(args: Args) -> Result<ExecutionRequest> {
        let prompt = non_blank(args.prompt).map(|p| format_paths_in_text::<&str>(&p, &[]));
        let allowed_tools = args
            .allowed_tools
            .unwrap_or_else(|| owned(DEFAULT_ALLOWED_TOOLS));

        ExecutionRequest::from_parts(
            prompt,
            non_blank(args.command),
            allowed_tools,
            timeout_or(args.timeout, DEFAULT_TIMEOUT_MS),
        )
        .map(|r| r.with_label("claude-code"))
    }
}

#[async_trait]
impl ClaudeTool for ClaudeCodeTool {
    fn name(&self) -> &'static str {
        "ClaudeCode"
    }

    fn description(&self) -> &'static str {
        "Run Claude Code commands and prompts with the configured environment."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": {
                    "type": "string",
                    "description": "A prompt to send to Claude Code"
                },
                "command": {
                    "type": "string",
                    "description": "Direct command to pass to Claude CLI (excluding 'claude' itself)"
                },
                "allowedTools": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "List of tools Claude Code is allowed to use"
                },
                "timeout": {
                    "type": "number",
                    "description": "Maximum execution time in milliseconds (default: 180000)"
                }
            },
            "required": []
        })
    }

    async fn run(&self, executor: &ClaudeExecutor, args: Value) -> Result<ToolResponse> {
        let request = Self::request(parse_args(args)?)?;
        let outcome = executor.execute(request).await;
        Ok(ToolResponse::from_outcome(&outcome, EmptyOutput::Hint))
    }
}
