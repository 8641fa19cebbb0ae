//! Claude Code CLI command builder
//!
//! Builds the `bash -c` invocation for an `ExecutionRequest`. Prompts never
//! appear in the shell line as-is: they are base64-encoded and decoded by
//! the shell into the CLI's stdin, so quotes, backticks and `$()` inside a
//! prompt cannot be interpreted.

use std::process::Stdio;

use base64::{engine::general_purpose::STANDARD, Engine};
use tokio::process::Command;

use super::request::{ExecutionRequest, Invocation};
use crate::config::ClaudeSettings;

/// Quote `value` for POSIX shells using single quotes.
#[must_use]
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Base64-encode a prompt for transport through the shell line.
#[must_use]
pub fn encode_prompt(prompt: &str) -> String {
    STANDARD.encode(prompt.as_bytes())
}

/// Shell fragment that decodes `encoded` to stdout.
fn decode_fragment(encoded: &str) -> String {
    // Base64 output only uses [A-Za-z0-9+/=], safe inside single quotes
    format!("printf '%s' '{encoded}' | base64 -d")
}

/// Raw arguments that continue the most recent session with `prompt`.
///
/// The prompt is substituted by the shell from its base64 form, so it
/// reaches the CLI as a single, uninterpreted argument.
#[must_use]
pub fn continue_command(prompt: &str) -> String {
    format!(
        "--continue -p \"$({})\"",
        decode_fragment(&encode_prompt(prompt))
    )
}

/// Build the shell line for an invocation.
///
/// - Prompt: `printf '%s' '<b64>' | base64 -d | <exe> -p /dev/stdin --allowedTools '<a,b>'`
/// - Raw: `<exe> <raw> --allowedTools '<a,b>'`
#[must_use]
pub fn build_shell_line(invocation: &Invocation, allowed_tools: &[String], executable: &str) -> String {
    let exe = shell_quote(executable);
    let tools = shell_quote(&allowed_tools.join(","));

    match invocation {
        Invocation::Prompt(prompt) => format!(
            "{} | {exe} -p /dev/stdin --allowedTools {tools}",
            decode_fragment(&encode_prompt(prompt))
        ),
        Invocation::Raw(raw) => format!("{exe} {raw} --allowedTools {tools}"),
    }
}

/// Build the `bash -c` command for a request.
///
/// Stdin is closed, stdout/stderr are piped, and the child leads its own
/// process group so a timeout can signal the whole pipeline.
#[must_use]
pub fn build_command(request: &ExecutionRequest, settings: &ClaudeSettings) -> Command {
    let line = build_shell_line(
        &request.invocation,
        &request.allowed_tools,
        &settings.executable.to_string_lossy(),
    );

    let mut cmd = Command::new("bash");
    cmd.arg("-c")
        .arg(line)
        .current_dir(settings.resolved_working_dir())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    cmd.process_group(0);

    if let Some(extra) = &settings.extra_path {
        let path = std::env::var("PATH").unwrap_or_default();
        cmd.env("PATH", format!("{extra}:{path}"));
    }

    cmd
}
