//! Logging and observability
//!
//! Diagnostic logging goes through `tracing` to stderr; stdout belongs to
//! the MCP stdio transport. Each Claude Code execution also writes its own
//! plain-text trace file.

pub mod trace;

pub use trace::TraceLog;

use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins when set; otherwise `level` applies to this crate and
/// `warn` to everything else. Calling this twice is a no-op.
pub fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,claude_mcp={level}")));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
