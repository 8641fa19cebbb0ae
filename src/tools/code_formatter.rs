//! `CodeFormatter`: tidy one file without changing behavior.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::paths::format_path;
use super::template::expand_template;
use super::{non_blank, owned, parse_args, timeout_or, ClaudeTool, EmptyOutput, ToolResponse};
use crate::claude::{ClaudeExecutor, ExecutionRequest};

const DEFAULT_TIMEOUT_MS: u64 = 120_000;

const ALLOWED_TOOLS: &[&str] = &[
    "Read", "Edit", "MultiEdit", "Write", "Bash", "LS", "Glob", "Grep",
];

const DEFAULT_RULES: &str = "- Apply consistent indentation
- Use appropriate spacing
- Follow naming conventions
- Organize imports and dependencies
- Remove unused code and comments";

const PROMPT: &str = "You are a code formatter. Improve readability and consistency \
without changing behavior.

Format the code in {{FILE_PATH}} following the language's usual conventions and \
the style already used in the codebase, then apply these rules:

FORMATTING RULES:
{{FORMATTING_RULES}}

Use the available tools to read and edit the file. Make formatting changes only.";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Args {
    file_path: String,
    formatting_rules: Option<String>,
    language: Option<String>,
    timeout: Option<u64>,
}

/// Formatting pass over a single file.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodeFormatterTool;

impl CodeFormatterTool {
    fn prompt(args: Args) -> String {
        let rules = non_blank(args.formatting_rules).unwrap_or_else(|| DEFAULT_RULES.to_string());
        let mut prompt = expand_template(PROMPT, &[
            ("FILE_PATH", &format_path(&args.file_path)),
            ("FORMATTING_RULES", &rules),
        ]);
        if let Some(language) = non_blank(args.language) {
            prompt = format!("{prompt}\n\nLANGUAGE: {language}");
        }
        prompt
    }
}

#[async_trait]
impl ClaudeTool for CodeFormatterTool {
    fn name(&self) -> &'static str {
        "CodeFormatter"
    }

    fn description(&self) -> &'static str {
        "Analyzes and formats code according to best practices and specified formatting rules."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filePath": {
                    "type": "string",
                    "description": "Path to the file to format"
                },
                "formattingRules": {
                    "type": "string",
                    "description": "Specific formatting rules to apply (optional)"
                },
                "language": {
                    "type": "string",
                    "description": "Programming language of the file (optional, detected if not provided)"
                },
                "timeout": {
                    "type": "number",
                    "description": "Maximum execution time in milliseconds (optional, default: 120000)"
                }
            },
            "required": ["filePath"]
        })
    }

    async fn run(&self, executor: &ClaudeExecutor, args: Value) -> Result<ToolResponse> {
        let args: Args = parse_args(args)?;
        if args.file_path.trim().is_empty() {
            bail!("filePath must be provided");
        }
        let timeout = timeout_or(args.timeout, DEFAULT_TIMEOUT_MS);

        let request = ExecutionRequest::prompt(Self::prompt(args), owned(ALLOWED_TOOLS), timeout)
            .with_label("code-formatter");
        let outcome = executor.execute(request).await;
        Ok(ToolResponse::from_outcome(&outcome, EmptyOutput::Hint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt(value: Value) -> String {
        CodeFormatterTool::prompt(parse_args(value).unwrap())
    }

    #[test]
    fn test_default_rules_applied() {
        let p = prompt(json!({"filePath": "src/app.ts"}));
        assert!(p.contains("Format the code in @src/app.ts"));
        assert!(p.contains("- Organize imports and dependencies"));
        assert!(!p.contains("LANGUAGE:"));
    }

    #[test]
    fn test_custom_rules_and_language() {
        let p = prompt(json!({
            "filePath": "main.go",
            "formattingRules": "- tabs only",
            "language": "Go"
        }));
        assert!(p.contains("FORMATTING RULES:\n- tabs only\n"));
        assert!(!p.contains("Remove unused code"));
        assert!(p.ends_with("\n\nLANGUAGE: Go"));
    }
}
