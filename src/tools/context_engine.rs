//! `ContextEngine`: read-only code search that reports what is actually in
//! the codebase.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::paths::format_paths_in_text;
use super::template::expand_template;
use super::{owned, parse_args, timeout_or, ClaudeTool, EmptyOutput, ToolResponse};
use crate::claude::cli::continue_command;
use crate::claude::{ClaudeExecutor, ExecutionRequest};

const DEFAULT_TIMEOUT_MS: u64 = 900_000;

const ALLOWED_TOOLS: &[&str] = &[
    "Read", "Glob", "Grep", "LS", "Task", "Batch", "TodoRead", "TodoWrite",
];

const PROMPT: &str = "You are a codebase search tool. Report only code that exists in the \
files you read; never infer, guess, or synthesize code.

1. Extract the literal identifiers, file names and patterns from the query.
2. Search with exact text first, then case-insensitive and kebab/camel-case variants.
3. Respect every filter in <search_filters>; empty filters mean no restriction.
4. Verify each result by reading the file before reporting it.
5. Be concise and use the same structure for every answer.

For each match:

## File: @<exact/path>

```<language>
<snippet with original indentation and line numbers>
```

### Analysis
- **Purpose**: one or two lines
- **Relationships**: at most three imports, exports or call sites

When several files match, finish with a short `## Cross-File Relationships` list.
If nothing matches, answer exactly: No code found matching the query criteria

USER QUERY: {{QUERY}}

<search_filters>
file_type: {{FILE_TYPE}}
directory: {{DIRECTORY}}
search_mode: {{SEARCH_MODE}}
</search_filters>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum SearchMode {
    Keyword,
    Semantic,
    Pattern,
    #[default]
    Hybrid,
}

impl SearchMode {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Keyword => "keyword",
            Self::Semantic => "semantic",
            Self::Pattern => "pattern",
            Self::Hybrid => "hybrid",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Args {
    query: String,
    #[serde(default)]
    directory: String,
    #[serde(default)]
    file_type: String,
    #[serde(default)]
    search_mode: SearchMode,
    #[serde(default)]
    is_follow_up: bool,
    timeout: Option<u64>,
}

/// Code search and retrieval over the working directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextEngineTool;

impl ContextEngineTool {
    fn prompt(args: &Args, query: &str) -> String {
        expand_template(PROMPT, &[
            ("QUERY", query),
            ("FILE_TYPE", &args.file_type),
            ("DIRECTORY", &args.directory),
            ("SEARCH_MODE", args.search_mode.as_str()),
        ])
    }

    async fn fresh(
        executor: &ClaudeExecutor,
        args: &Args,
        query: &str,
        label: &str,
    ) -> ToolResponse {
        let request = ExecutionRequest::prompt(
            Self::prompt(args, query),
            owned(ALLOWED_TOOLS),
            timeout_or(args.timeout, DEFAULT_TIMEOUT_MS),
        )
        .with_label(label);
        let outcome = executor.execute(request).await;
        ToolResponse::from_outcome(&outcome, EmptyOutput::Hint)
    }
}

#[async_trait]
impl ClaudeTool for ContextEngineTool {
    fn name(&self) -> &'static str {
        "ContextEngine"
    }

    fn description(&self) -> &'static str {
        "Code search and retrieval tool that provides accurate context from a codebase. \
         Returns exact code matches with minimal inference."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query to find code in the codebase"
                },
                "directory": {
                    "type": "string",
                    "description": "Specific directory to search in (optional)"
                },
                "fileType": {
                    "type": "string",
                    "description": "Filter by file extension (optional, e.g., 'js', 'ts', 'py')"
                },
                "searchMode": {
                    "type": "string",
                    "enum": ["keyword", "semantic", "pattern", "hybrid"],
                    "description": "Search mode to use (optional, default: hybrid)"
                },
                "isFollowUp": {
                    "type": "boolean",
                    "description": "Whether this query continues the previous one (optional, default: false)"
                },
                "timeout": {
                    "type": "number",
                    "description": "Maximum execution time in milliseconds (optional, default: 900000)"
                }
            },
            "required": ["query"]
        })
    }

    async fn run(&self, executor: &ClaudeExecutor, args: Value) -> Result<ToolResponse> {
        let args: Args = parse_args(args)?;
        if args.query.trim().is_empty() {
            anyhow::bail!("Query must be provided");
        }
        let query = format_paths_in_text::<&str>(&args.query, &[]);

        if !args.is_follow_up {
            return Ok(Self::fresh(executor, &args, &query, "context-engine").await);
        }

        let request = ExecutionRequest::raw(
            continue_command(&query),
            owned(ALLOWED_TOOLS),
            timeout_or(args.timeout, DEFAULT_TIMEOUT_MS),
        )
        .with_label("context-engine-followup");
        let outcome = executor.execute(request).await;
        let response = ToolResponse::from_outcome(&outcome, EmptyOutput::Hint);

        if response.is_error || response.is_blank() {
            info!("Follow-up query returned nothing usable, falling back to a new query");
            let marked = format!("(Follow-up query) {query}");
            return Ok(Self::fresh(executor, &args, &marked, "context-engine-fallback").await);
        }
        Ok(response)
    }
}
