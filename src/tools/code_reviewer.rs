//! `CodeReviewer`: review changed files against an implementation plan.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::paths::format_paths;
use super::template::expand_template;
use super::{owned, parse_args, timeout_or, ClaudeTool, EmptyOutput, ToolResponse};
use crate::claude::{ClaudeExecutor, ExecutionRequest};

const DEFAULT_TIMEOUT_MS: u64 = 900_000;

const ALLOWED_TOOLS: &[&str] = &[
    "Read", "Glob", "Grep", "LS", "Bash", "Task", "WebFetch", "Batch", "TodoRead", "TodoWrite",
    "WebSearch",
];

const PROMPT: &str = "You are a code reviewer. Compare the changes against the \
implementation plan and give concise, actionable feedback.

Before reviewing, gather evidence yourself:
1. Run `git diff` and `git diff --staged` to see exactly what changed.
2. Run the project's type checker or compiler where one exists.
3. Use WebSearch to confirm library and framework usage against current documentation.

Then report, most important first:
- Implementation completeness against the plan
- [HIGH] Bugs, type errors and security problems that must be fixed
- [MEDIUM] Performance, maintainability and consistency across files
- [LOW] Style and minor polish

Format each issue as:
- [LEVEL] Brief description: specific fix

Only findings tied to the plan or marked HIGH are requirements; the rest are suggestions.
Review the changes, not the whole file.

IMPLEMENTATION PLAN:
{{IMPLEMENTATION_PLAN}}

{{REVIEW_FOCUS}}
Files to review:
{{FILES_TO_REVIEW}}";

/// `filePaths` as sent by clients: a real array, or an array encoded as a
/// JSON string (common over some HTTP clients).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FilePaths {
    List(Vec<String>),
    Encoded(String),
}

impl FilePaths {
    fn into_list(self) -> Result<Vec<String>> {
        match self {
            Self::List(list) => Ok(list),
            Self::Encoded(encoded) => serde_json::from_str(&encoded)
                .or_else(|_| serde_json::from_str(&escape_stray_backslashes(&encoded)))
                .context("Invalid filePaths format - expected array or valid JSON array string"),
        }
    }
}

/// Double every backslash that does not start a valid JSON escape, so that
/// Windows paths like `"src\utils\a.ts"` parse.
fn escape_stray_backslashes(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.peek() {
                Some('"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't') => {
                    out.push(c);
                    if let Some(next) = chars.next() {
                        out.push(next);
                    }
                }
                _ => out.push_str("\\\\"),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Normalize separators to `/`.
fn clean_path(path: &str) -> String {
    path.replace("\\\\", "/").replace('\\', "/")
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Args {
    file_paths: FilePaths,
    implementation_plan: String,
    #[serde(default)]
    review_focus: String,
    timeout: Option<u64>,
}

/// Plan-driven code review.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodeReviewerTool;

impl CodeReviewerTool {
    fn prompt(files: &[String], plan: &str, focus: &str) -> String {
        let cleaned: Vec<String> = files.iter().map(|p| clean_path(p)).collect();
        let listed: Vec<String> = format_paths(&cleaned)
            .iter()
            .enumerate()
            .map(|(i, path)| format!("FILE {}: {path}", i + 1))
            .collect();
        let focus_section = if focus.is_empty() {
            String::new()
        } else {
            format!("REVIEW FOCUS:\n{focus}\n")
        };

        expand_template(PROMPT, &[
            ("IMPLEMENTATION_PLAN", plan),
            ("REVIEW_FOCUS", &focus_section),
            ("FILES_TO_REVIEW", &listed.join("\n\n")),
        ])
    }
}

#[async_trait]
impl ClaudeTool for CodeReviewerTool {
    fn name(&self) -> &'static str {
        "CodeReviewer"
    }

    fn description(&self) -> &'static str {
        "Code review tool that validates implementations against plans. Claude runs checks \
         (type checker, git diff), verifies documentation compliance via WebSearch, and gives \
         prioritized feedback on completeness, quality, security and best practices."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filePaths": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Array of paths to the files to review"
                },
                "implementationPlan": {
                    "type": "string",
                    "description": "Original implementation plan for comparison"
                },
                "reviewFocus": {
                    "type": "string",
                    "description": "Specific aspects to focus on during review (optional)"
                },
                "timeout": {
                    "type": "number",
                    "description": "Maximum execution time in milliseconds (optional, default: 900000)"
                }
            },
            "required": ["filePaths", "implementationPlan"]
        })
    }

    async fn run(&self, executor: &ClaudeExecutor, args: Value) -> Result<ToolResponse> {
        let args: Args = parse_args(args)?;
        let files = args.file_paths.into_list()?;
        if files.is_empty() || args.implementation_plan.trim().is_empty() {
            bail!("Both filePaths (non-empty array) and implementationPlan must be provided");
        }

        let request = ExecutionRequest::prompt(
            Self::prompt(&files, &args.implementation_plan, &args.review_focus),
            owned(ALLOWED_TOOLS),
            timeout_or(args.timeout, DEFAULT_TIMEOUT_MS),
        )
        .with_label("code-reviewer");
        let outcome = executor.execute(request).await;
        Ok(ToolResponse::from_outcome(&outcome, EmptyOutput::Hint))
    }
}
