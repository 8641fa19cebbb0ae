//! `CodeEditor`: implement a focused change in one file.
//!
//! Claude often edits silently. When the edit run prints nothing, a short
//! `--continue` run asks it to summarize what it changed.

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::paths::{format_path, format_paths, format_paths_in_text};
use super::template::expand_template;
use super::{owned, parse_args, timeout_or, ClaudeTool, EmptyOutput, ToolResponse};
use crate::claude::cli::continue_command;
use crate::claude::{ClaudeExecutor, ExecutionRequest};

const DEFAULT_TIMEOUT_MS: u64 = 900_000;
const SUMMARY_TIMEOUT: Duration = Duration::from_millis(60_000);

const ALLOWED_TOOLS: &[&str] = &[
    "Read", "Edit", "MultiEdit", "Write", "Bash", "LS", "Glob", "Grep", "Task", "Batch",
    "TodoRead", "TodoWrite",
];

const SUMMARY_PROMPT: &str =
    "Summarize the changes you just made concisely, focusing on the key modifications and their purpose.";

/// Returned when neither the edit nor the summary produced any text.
pub const SILENT_EDIT_TEXT: &str = "File edited successfully. No additional output was returned.";

const PROMPT: &str = "You are a precise code editor. Implement exactly what the task asks \
and nothing more.

- Follow the conventions already used in the project and in related files.
- Keep changes minimal; do not add speculative features.
- Keep interrelated files consistent with each other.
- Comment only where the intent is not obvious from the code.

TASK DESCRIPTION:
{{TASK}}

FILE PATH TO EDIT:
{{FILE_PATH}}
{{CODE_CONTEXT}}
Use the available tools to edit the file and complete the task.";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Args {
    file_path: String,
    task: String,
    #[serde(default)]
    code_context: String,
    #[serde(default)]
    related_files: Vec<String>,
    timeout: Option<u64>,
}

/// Implementation-focused editing of a single file.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodeEditorTool;

impl CodeEditorTool {
    fn prompt(args: &Args) -> String {
        let mut context = args.code_context.clone();
        let related = format_paths(&args.related_files);
        if !related.is_empty() {
            if !context.is_empty() {
                context.push_str("\n\n");
            }
            context.push_str("RELATED FILES TO REFERENCE FOR CONSISTENCY:\n");
            let listed: Vec<String> = related.iter().map(|f| format!("- {f}")).collect();
            context.push_str(&listed.join("\n"));
            context.push_str(
                "\n\nUse the Read tool to examine these files before making changes to ensure consistency.",
            );
        }
        let context = format_paths_in_text::<&str>(&context, &[]);
        let context_section = if context.is_empty() {
            String::new()
        } else {
            format!("\nRELEVANT CODE CONTEXT:\n{context}\n")
        };

        expand_template(PROMPT, &[
            ("TASK", &args.task),
            ("FILE_PATH", &format_path(&args.file_path)),
            ("CODE_CONTEXT", &context_section),
        ])
    }

    /// Ask the last session to describe its silent edit.
    async fn summarize(executor: &ClaudeExecutor) -> ToolResponse {
        info!("Edit produced no output, requesting a summary");
        let request = ExecutionRequest::raw(
            continue_command(SUMMARY_PROMPT),
            owned(ALLOWED_TOOLS),
            SUMMARY_TIMEOUT,
        )
        .with_label("code-editor-summary");
        let outcome = executor.execute(request).await;
        let summary = ToolResponse::from_outcome(&outcome, EmptyOutput::Hint);

        if summary.is_error || summary.is_blank() {
            warn!("Edit summary unavailable");
            ToolResponse::text(SILENT_EDIT_TEXT)
        } else {
            summary
        }
    }
}

#[async_trait]
impl ClaudeTool for CodeEditorTool {
    fn name(&self) -> &'static str {
        "CodeEditor"
    }

    fn description(&self) -> &'static str {
        "Implementation-focused tool for precise code editing tasks. \
         Creates or modifies code following exact specifications."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filePath": {
                    "type": "string",
                    "description": "Path to the file to edit or create"
                },
                "task": {
                    "type": "string",
                    "description": "Detailed implementation instructions"
                },
                "codeContext": {
                    "type": "string",
                    "description": "Relevant code context (optional): related files, patterns to follow, and how this file fits with others changed in the same task"
                },
                "relatedFiles": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Related files to reference for consistency (optional)"
                },
                "timeout": {
                    "type": "number",
                    "description": "Maximum execution time in milliseconds (optional, default: 900000)"
                }
            },
            "required": ["filePath", "task"]
        })
    }

    async fn run(&self, executor: &ClaudeExecutor, args: Value) -> Result<ToolResponse> {
        let args: Args = parse_args(args)?;
        if args.file_path.trim().is_empty() || args.task.trim().is_empty() {
            bail!("Both filePath and task must be provided");
        }

        let request = ExecutionRequest::prompt(
            Self::prompt(&args),
            owned(ALLOWED_TOOLS),
            timeout_or(args.timeout, DEFAULT_TIMEOUT_MS),
        )
        .with_label("code-editor");
        let outcome = executor.execute(request).await;

        if outcome.is_empty_output() {
            return Ok(Self::summarize(executor).await);
        }
        Ok(ToolResponse::from_outcome(&outcome, EmptyOutput::NoContent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(value: Value) -> Args {
        parse_args(value).unwrap()
    }

    #[test]
    fn test_prompt_formats_target_path() {
        let prompt = CodeEditorTool::prompt(&args(json!({
            "filePath": "/src/lib.rs",
            "task": "Add a version() fn"
        })));
        assert!(prompt.contains("FILE PATH TO EDIT:\n@src/lib.rs\n"));
        assert!(prompt.contains("TASK DESCRIPTION:\nAdd a version() fn\n"));
        assert!(!prompt.contains("RELEVANT CODE CONTEXT"));
        assert!(!prompt.contains("{{"));
    }

    #[test]
    fn test_prompt_lists_related_files() {
        let prompt = CodeEditorTool::prompt(&args(json!({
            "filePath": "src/a.rs",
            "task": "t",
            "codeContext": "Mirror the pattern in src/b.rs",
            "relatedFiles": ["src/b.rs", "@src/c.rs"]
        })));
        assert!(prompt.contains("RELEVANT CODE CONTEXT:\nMirror the pattern in @src/b.rs"));
        assert!(prompt.contains("- @src/b.rs\n- @src/c.rs"));
        assert!(!prompt.contains("@@"));
    }

    #[test]
    fn test_required_fields() {
        assert!(parse_args::<Args>(json!({"filePath": "a.rs"})).is_err());
        assert!(parse_args::<Args>(json!({"task": "t"})).is_err());
    }
}
