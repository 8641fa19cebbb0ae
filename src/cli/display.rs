//! Terminal rendering for `doctor`

use colored::Colorize;

use crate::doctor::{DiagnosticReport, Finding, Severity};

/// One finding as a plain line, without colour.
#[must_use]
pub fn finding_line(finding: &Finding) -> String {
    let label = match finding.severity {
        Severity::Error => "ERROR",
        Severity::Warning => "WARN",
        Severity::Info => "INFO",
    };
    format!("[{}] {label}: {}", finding.code, finding.message)
}

/// Print the report to stderr.
pub fn render_report(report: &DiagnosticReport) {
    eprintln!("{}", "claude-mcp doctor".bold());
    eprintln!("{}", "─".repeat(50).dimmed());

    if report.is_clean() {
        eprintln!("  {} No problems found", "✓".green().bold());
        eprintln!();
        return;
    }

    for finding in &report.findings {
        let marker = match finding.severity {
            Severity::Error => "✗".red().bold(),
            Severity::Warning => "⚠".yellow().bold(),
            Severity::Info => "ℹ".blue(),
        };
        eprintln!("  {marker} {}", finding_line(finding));
        if let Some(suggestion) = &finding.suggestion {
            eprintln!("      {} {}", "→".dimmed(), suggestion.dimmed());
        }
    }

    eprintln!("{}", "─".repeat(50).dimmed());
    eprintln!(
        "  {} error(s), {} warning(s), {} info",
        report.error_count(),
        report.warning_count(),
        report.info_count()
    );
    eprintln!();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(severity: Severity) -> Finding {
        Finding {
            severity,
            code: "D002".into(),
            message: "Working directory does not exist: /x".into(),
            suggestion: Some("Set CC_USER_DIRECTORY".into()),
        }
    }

    #[test]
    fn test_finding_line() {
        assert_eq!(
            finding_line(&finding(Severity::Error)),
            "[D002] ERROR: Working directory does not exist: /x"
        );
        assert!(finding_line(&finding(Severity::Info)).contains("INFO"));
    }

    #[test]
    fn test_render_no_panic() {
        render_report(&DiagnosticReport { findings: vec![] });
        render_report(&DiagnosticReport {
            findings: vec![
                finding(Severity::Error),
                finding(Severity::Warning),
                finding(Severity::Info),
            ],
        });
    }
}
