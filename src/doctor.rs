//! Environment diagnostics
//!
//! Checks that the Claude Code CLI can be launched the way the servers will
//! launch it, and flags risky server settings. Findings are ranked:
//! errors (tools will fail), warnings (something degrades), info.

use std::path::Path;

use crate::claude::environment::locate_executable;
use crate::config::Config;

/// Severity level for a diagnostic finding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Must fix; tool calls will fail
    Error,
    /// Should fix; a feature is degraded
    Warning,
    /// Informational
    Info,
}

/// A single diagnostic finding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    /// Severity of the finding
    pub severity: Severity,
    /// Short code for the finding (e.g., "D001")
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Suggested fix (optional)
    pub suggestion: Option<String>,
}

impl Finding {
    fn new(severity: Severity, code: &str, message: String, suggestion: Option<&str>) -> Self {
        Self {
            severity,
            code: code.to_string(),
            message,
            suggestion: suggestion.map(str::to_string),
        }
    }
}

/// Result of `doctor`
#[derive(Debug, Clone)]
pub struct DiagnosticReport {
    /// All findings, errors first
    pub findings: Vec<Finding>,
}

impl DiagnosticReport {
    /// No findings at all
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    fn count(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity == severity).count()
    }

    /// Number of errors
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.count(Severity::Error)
    }

    /// Number of warnings
    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.count(Severity::Warning)
    }

    /// Number of info items
    #[must_use]
    pub fn info_count(&self) -> usize {
        self.count(Severity::Info)
    }
}

/// Run all checks. `wsl` is whether we are inside Windows Subsystem for Linux.
#[must_use]
pub fn diagnose(config: &Config, wsl: bool) -> DiagnosticReport {
    let mut findings = Vec::new();

    check_executable(config, &mut findings);
    check_working_dir(config, &mut findings);
    check_extra_path(config, &mut findings);
    check_trace_dir(config, &mut findings);
    check_exposure(config, &mut findings);
    if wsl {
        findings.push(Finding::new(
            Severity::Info,
            "D006",
            "Running under WSL; Windows-side paths must be given in /mnt/<drive> form".into(),
            None,
        ));
    }

    findings.sort_by_key(|f| match f.severity {
        Severity::Error => 0,
        Severity::Warning => 1,
        Severity::Info => 2,
    });

    DiagnosticReport { findings }
}

/// D001: the executable resolves on the search path
fn check_executable(config: &Config, findings: &mut Vec<Finding>) {
    if let Err(message) = locate_executable(&config.claude) {
        findings.push(Finding::new(
            Severity::Error,
            "D001",
            message,
            Some("Install Claude Code or set CLAUDE_EXECUTABLE_PATH to its full path"),
        ));
    }
}

/// D002: the working directory exists
fn check_working_dir(config: &Config, findings: &mut Vec<Finding>) {
    let dir = config.claude.resolved_working_dir();
    if !dir.is_dir() {
        findings.push(Finding::new(
            Severity::Error,
            "D002",
            format!("Working directory does not exist: {}", dir.display()),
            Some("Set CC_USER_DIRECTORY or claude.working_dir to an existing directory"),
        ));
    }
}

/// D003: every extra PATH entry exists
fn check_extra_path(config: &Config, findings: &mut Vec<Finding>) {
    let Some(extra) = &config.claude.extra_path else {
        return;
    };
    for entry in std::env::split_paths(extra) {
        if !entry.as_os_str().is_empty() && !entry.is_dir() {
            findings.push(Finding::new(
                Severity::Warning,
                "D003",
                format!("Extra PATH entry is not a directory: {}", entry.display()),
                Some("Fix CC_EXTRA_PATH or claude.extra_path"),
            ));
        }
    }
}

/// D004: trace files can be written
fn check_trace_dir(config: &Config, findings: &mut Vec<Finding>) {
    let dir = config.claude.resolved_trace_dir();
    if let Err(e) = probe_writable(&dir) {
        findings.push(Finding::new(
            Severity::Warning,
            "D004",
            format!("Trace directory {} is not writable: {e}", dir.display()),
            Some("Executions still run, but without trace files; set claude.trace_dir"),
        ));
    }
}

fn probe_writable(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let probe = dir.join(format!(".doctor-{}", std::process::id()));
    std::fs::write(&probe, b"ok")?;
    std::fs::remove_file(&probe)
}

/// D005: a non-loopback listener only admits provisioned clients
fn check_exposure(config: &Config, findings: &mut Vec<Finding>) {
    let server = &config.server;
    if server.is_loopback() || server.is_access_controlled() {
        return;
    }
    let host = &server.host;
    let (message, suggestion) = if server.require_auth {
        (
            format!("Client registration is open while binding {host}; anyone who can reach it can obtain a token"),
            "Set server.registration_token (or CC_REGISTRATION_TOKEN), or bind 127.0.0.1",
        )
    } else {
        (
            format!("Authentication is disabled while binding {host}"),
            "Set server.require_auth = true and server.registration_token, or bind 127.0.0.1",
        )
    };
    findings.push(Finding::new(Severity::Warning, "D005", message, Some(suggestion)));
}
