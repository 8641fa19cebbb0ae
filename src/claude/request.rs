//! Execution request and outcome types
//!
//! An `ExecutionRequest` is built once per tool invocation and consumed by
//! the executor, which answers with exactly one `ExecutionOutcome`.

use std::time::Duration;

use anyhow::{bail, Result};

/// What to hand to the Claude Code CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// Prompt text, delivered through stdin (`-p /dev/stdin`).
    Prompt(String),
    /// Arguments appended verbatim after the executable.
    ///
    /// The caller is trusted: this text is interpreted by the shell.
    Raw(String),
}

/// A single request to run the Claude Code CLI.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Prompt or raw command
    pub invocation: Invocation,
    /// Capability names passed to `--allowedTools`, in order
    pub allowed_tools: Vec<String>,
    /// Deadline for the process to exit on its own
    pub timeout: Duration,
    /// Tag used to name the per-execution trace file
    pub log_label: String,
}

impl ExecutionRequest {
    /// Build a prompt request.
    #[must_use]
    pub fn prompt(prompt: impl Into<String>, allowed_tools: Vec<String>, timeout: Duration) -> Self {
        Self {
            invocation: Invocation::Prompt(prompt.into()),
            allowed_tools,
            timeout,
            log_label: "claude-code".to_string(),
        }
    }

    /// Build a raw-command request.
    #[must_use]
    pub fn raw(command: impl Into<String>, allowed_tools: Vec<String>, timeout: Duration) -> Self {
        Self {
            invocation: Invocation::Raw(command.into()),
            allowed_tools,
            timeout,
            log_label: "claude-code".to_string(),
        }
    }

    /// Build a request from optional prompt / command fields.
    ///
    /// Exactly one of `prompt` and `command` must be present and the timeout
    /// must be non-zero.
    pub fn from_parts(
        prompt: Option<String>,
        command: Option<String>,
        allowed_tools: Vec<String>,
        timeout: Duration,
    ) -> Result<Self> {
        if timeout.is_zero() {
            bail!("timeout must be greater than zero");
        }
        let invocation = match (prompt, command) {
            (Some(prompt), None) => Invocation::Prompt(prompt),
            (None, Some(command)) => Invocation::Raw(command),
            (Some(_), Some(_)) => bail!("Provide either prompt or command, not both"),
            (None, None) => bail!("Either prompt or command must be provided"),
        };
        Ok(Self {
            invocation,
            allowed_tools,
            timeout,
            log_label: "claude-code".to_string(),
        })
    }

    /// Set the trace-file label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.log_label = label.into();
        self
    }

    /// Short description for logs: "prompt" or "command".
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self.invocation {
            Invocation::Prompt(_) => "prompt",
            Invocation::Raw(_) => "command",
        }
    }
}

/// Result of one execution. Failures are values, never errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Process exited with code 0
    Success {
        /// Captured stdout, byte-exact (lossy UTF-8)
        stdout: String,
        /// Always 0
        exit_code: i32,
        /// True when stdout was empty or whitespace only
        empty_output: bool,
    },
    /// Process ran and exited unsuccessfully
    ProcessFailure {
        /// Captured stdout
        stdout: String,
        /// Captured stderr
        stderr: String,
        /// Exit code (None if killed by signal)
        exit_code: Option<i32>,
        /// Human-readable summary
        message: String,
    },
    /// Deadline reached; the process was terminated and reaped
    TimedOut {
        /// Wall-clock time from spawn to the deadline firing
        elapsed: Duration,
    },
    /// The process could not be started
    SpawnError {
        /// Underlying error text
        message: String,
    },
}

impl ExecutionOutcome {
    /// Whether this outcome is `Success`.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Whether this is a successful run that printed nothing.
    #[must_use]
    pub const fn is_empty_output(&self) -> bool {
        matches!(
            self,
            Self::Success {
                empty_output: true,
                ..
            }
        )
    }

    /// Exit code, if the process exited on its own.
    #[must_use]
    pub const fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Success { exit_code, .. } => Some(*exit_code),
            Self::ProcessFailure { exit_code, .. } => *exit_code,
            Self::TimedOut { .. } | Self::SpawnError { .. } => None,
        }
    }

    /// Error summary for failure variants.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        match self {
            Self::Success { .. } => None,
            Self::ProcessFailure { message, .. } => Some(message.clone()),
            Self::TimedOut { elapsed } => {
                Some(format!("Command timed out after {}ms", elapsed.as_millis()))
            }
            Self::SpawnError { message } => Some(format!("Failed to execute command: {message}")),
        }
    }
}
