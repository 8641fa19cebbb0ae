//! MCP servers
//!
//! Two services share this module: `claude-code`, exposing the Claude Code
//! prompt tools, and `sequential-thinking`, exposing the thought tracker.
//! Either one runs over stdio or streamable HTTP.

pub mod http;

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use clap::ValueEnum;
use rmcp::{
    model::*, service::RequestContext, ErrorData as McpError, RoleServer, ServerHandler,
    ServiceExt,
};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::claude::ClaudeExecutor;
use crate::config::ServerSettings;
use crate::tools::thinking::{SequentialThinking, TOOL_DESCRIPTION, TOOL_NAME};
use crate::tools::{ToolRegistry, ToolResponse};

/// Which MCP service to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Service {
    /// Claude Code prompt tools
    ClaudeCode,
    /// Sequential thinking tracker
    SequentialThinking,
}

impl Service {
    /// Service name, also the proxy path segment
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ClaudeCode => "claude-code",
            Self::SequentialThinking => "sequential-thinking",
        }
    }

    /// Path prefix under the reverse proxy
    #[must_use]
    pub fn prefix(self) -> String {
        format!("/{}", self.name())
    }

    /// Port used when nothing else picks one
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::ClaudeCode => 3000,
            Self::SequentialThinking => 3001,
        }
    }

    /// Port to bind: an explicit override, else the configured port unless it
    /// is still the stock default, in which case the service's own default.
    #[must_use]
    pub fn resolve_port(self, settings: &ServerSettings, explicit: Option<u16>) -> u16 {
        explicit.unwrap_or_else(|| {
            if settings.port == ServerSettings::default().port {
                self.default_port()
            } else {
                settings.port
            }
        })
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

fn schema_object(schema: Value) -> Arc<JsonObject> {
    match schema {
        Value::Object(map) => Arc::new(map),
        _ => Arc::new(JsonObject::new()),
    }
}

/// Convert a tool response into an MCP result with one text block.
pub fn call_result(response: ToolResponse) -> Result<CallToolResult, McpError> {
    let mut wire = json!({
        "content": [{ "type": "text", "text": response.text }],
        "isError": response.is_error,
    });
    if let Some(meta) = response.metadata {
        wire["_meta"] = serde_json::to_value(meta)
            .map_err(|e| McpError::internal_error(format!("Failed to encode metadata: {e}"), None))?;
    }
    serde_json::from_value(wire)
        .map_err(|e| McpError::internal_error(format!("Failed to build tool result: {e}"), None))
}

/// Server exposing the Claude Code tools
#[derive(Debug, Clone)]
pub struct ClaudeCodeServer {
    executor: ClaudeExecutor,
    tools: Arc<ToolRegistry>,
}

impl ClaudeCodeServer {
    /// Server running tools through `executor`
    #[must_use]
    pub fn new(executor: ClaudeExecutor) -> Self {
        Self {
            executor,
            tools: Arc::new(ToolRegistry::default()),
        }
    }

    /// Tool listing
    #[must_use]
    pub fn tools(&self) -> Vec<Tool> {
        self.tools
            .iter()
            .map(|t| Tool::new(t.name(), t.description(), schema_object(t.input_schema())))
            .collect()
    }

    /// Dispatch a call by tool name.
    pub async fn call(&self, name: &str, arguments: Option<JsonObject>) -> Result<CallToolResult, McpError> {
        let args = Value::Object(arguments.unwrap_or_default());
        info!(tool = %name, "call_tool");
        let response = self
            .tools
            .call(name, &self.executor, args)
            .await
            .ok_or_else(|| McpError::invalid_params(format!("Unknown tool: {name}"), None))?;
        call_result(response)
    }
}

impl ServerHandler for ClaudeCodeServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: Default::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: Service::ClaudeCode.name().to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: Some(
                "Runs the Claude Code CLI non-interactively. Use ClaudeCode for free-form \
                 prompts, ContextEngine to search the codebase, CodeEditor to change a file, \
                 CodeReviewer to review changes against a plan and CodeFormatter to tidy a file."
                    .to_string(),
            ),
        }
    }

    async fn list_tools(
        &self,
        _params: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult::with_all_items(self.tools()))
    }

    async fn call_tool(
        &self,
        params: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        self.call(&params.name, params.arguments).await
    }
}

/// Server exposing `sequentialthinking_tools`. One instance per session.
#[derive(Debug, Clone, Default)]
pub struct ThinkingServer {
    state: Arc<Mutex<SequentialThinking>>,
}

impl ThinkingServer {
    /// Fresh server with empty history
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tool listing
    #[must_use]
    pub fn tools() -> Vec<Tool> {
        vec![Tool::new(
            TOOL_NAME,
            TOOL_DESCRIPTION,
            schema_object(SequentialThinking::input_schema()),
        )]
    }

    /// Dispatch a call by tool name.
    pub fn call(&self, name: &str, arguments: Option<JsonObject>) -> Result<CallToolResult, McpError> {
        if name != TOOL_NAME {
            warn!(tool = %name, "Unknown tool requested");
            return Err(McpError::invalid_params(format!("Unknown tool: {name}"), None));
        }
        let args = Value::Object(arguments.unwrap_or_default());
        let response = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .process(args);
        call_result(response)
    }
}

impl ServerHandler for ThinkingServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: Default::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: Service::SequentialThinking.name().to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: Some(
                "Break problems into numbered thoughts, revise or branch as understanding \
                 improves, and record which tools each step should use."
                    .to_string(),
            ),
        }
    }

    async fn list_tools(
        &self,
        _params: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult::with_all_items(Self::tools()))
    }

    async fn call_tool(
        &self,
        params: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        self.call(&params.name, params.arguments)
    }
}

/// Serve `service` over stdin/stdout until the client disconnects.
pub async fn serve_stdio(service: Service, executor: ClaudeExecutor) -> Result<()> {
    info!(%service, "Serving MCP over stdio");
    match service {
        Service::ClaudeCode => {
            ClaudeCodeServer::new(executor)
                .serve(rmcp::transport::stdio())
                .await?
                .waiting()
                .await?;
        }
        Service::SequentialThinking => {
            ThinkingServer::new()
                .serve(rmcp::transport::stdio())
                .await?
                .waiting()
                .await?;
        }
    }
    Ok(())
}
