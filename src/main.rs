//! claude-mcp - Claude Code CLI as MCP tools
//!
//! CLI entry point: MCP servers, the reverse proxy, and environment checks.

// Allow multiple crate versions from dependencies (can't easily control)
#![allow(clippy::multiple_crate_versions)]

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use claude_mcp::claude::environment::is_wsl;
use claude_mcp::cli::render_report;
use claude_mcp::config::Config;
use claude_mcp::doctor::diagnose;
use claude_mcp::log::init_tracing;
use claude_mcp::server::http::serve_http;
use claude_mcp::server::{serve_stdio, Service};
use claude_mcp::{proxy, ClaudeExecutor};

/// Claude Code CLI as MCP tools
///
/// Runs `claude` non-interactively behind MCP tools, over stdio or
/// streamable HTTP with OAuth.
#[derive(Parser, Debug)]
#[command(name = "claude-mcp", version, about)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level for this crate (RUST_LOG takes precedence)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run an MCP server
    Serve {
        /// Transport to speak
        #[arg(long, value_enum, default_value_t = Transport::Stdio)]
        transport: Transport,

        /// Which service to expose
        #[arg(long, value_enum, default_value_t = Service::ClaudeCode)]
        service: Service,

        /// Port for the HTTP transport (overrides config and PORT)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run the reverse proxy in front of both HTTP servers
    Proxy {
        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Check that Claude Code can be launched
    Doctor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Transport {
    /// JSON-RPC over stdin/stdout
    Stdio,
    /// Streamable HTTP with OAuth
    Http,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Serve {
            transport,
            service,
            port,
        } => {
            let executor = ClaudeExecutor::new(config.claude.clone());
            match transport {
                Transport::Stdio => serve_stdio(service, executor).await,
                Transport::Http => {
                    let port = service.resolve_port(&config.server, port);
                    serve_http(service, executor, &config.server, port).await
                }
            }
        }
        Command::Proxy { port } => {
            let mut settings = config.proxy;
            if let Some(port) = port {
                settings.port = port;
            }
            proxy::serve_proxy(&settings).await
        }
        Command::Doctor => {
            let wsl = is_wsl();
            let report = diagnose(&config, wsl);
            render_report(&report);
            if report.error_count() > 0 {
                std::process::exit(1);
            }
            info!("Environment looks usable");
            Ok(())
        }
    }
}
