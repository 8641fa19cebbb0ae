//! Per-execution trace files
//!
//! Each Claude Code execution appends a plain-text trace to
//! `<trace_dir>/<label>-<unix-millis>.log`. Tracing is best-effort: any I/O
//! failure is reported through `tracing` and otherwise ignored.

use std::fs::{self, File, OpenOptions};
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use tracing::warn;

/// Append-only trace file for one execution
#[derive(Debug)]
pub struct TraceLog {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl TraceLog {
    /// Create the trace file for `label` under `dir`.
    ///
    /// Never fails: if the directory or file cannot be created, the returned
    /// log silently discards writes.
    #[must_use]
    pub fn create(dir: &Path, label: &str) -> Self {
        let path = dir.join(format!(
            "{}-{}.log",
            sanitize_label(label),
            Utc::now().timestamp_millis()
        ));

        let file = fs::create_dir_all(dir)
            .and_then(|()| {
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
            })
            .map_err(|e| warn!(path = %path.display(), "Failed to open trace file: {e}"))
            .ok();

        let log = Self {
            path,
            file: Mutex::new(file),
        };
        log.line(&format!(
            "Starting Claude Code execution at {}",
            Utc::now().to_rfc3339()
        ));
        log
    }

    /// A trace that writes nowhere.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            path: PathBuf::new(),
            file: Mutex::new(None),
        }
    }

    /// Path of the trace file (empty for a disabled trace).
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line.
    pub fn line(&self, text: &str) {
        self.write(format!("{text}\n").as_bytes());
    }

    /// Append an output chunk tagged with its stream name, as received.
    pub fn chunk(&self, stream: &str, data: &[u8]) {
        let mut buf = format!("[{stream}]: ").into_bytes();
        buf.extend_from_slice(data);
        if !data.ends_with(b"\n") {
            buf.push(b'\n');
        }
        self.write(&buf);
    }

    fn write(&self, bytes: &[u8]) {
        let Ok(mut guard) = self.file.lock() else {
            return;
        };
        if let Some(file) = guard.as_mut() {
            if let Err(e) = file.write_all(bytes) {
                warn!(path = %self.path.display(), "Failed to write trace file: {e}");
                // Stop trying after the first failure
                *guard = None;
            }
        }
    }
}

/// Keep labels safe for use as file names.
fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "claude-code".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_writes_header_line() {
        let temp_dir = TempDir::new().unwrap();
        let log = TraceLog::create(temp_dir.path(), "code-editor");

        let name = log.path().file_name().unwrap().to_str().unwrap().to_string();
        assert!(name.starts_with("code-editor-"), "got {name}");
        assert!(name.ends_with(".log"));

        let content = fs::read_to_string(log.path()).unwrap();
        assert!(content.starts_with("Starting Claude Code execution at "));
    }

    #[test]
    fn test_lines_and_chunks_are_appended_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let log = TraceLog::create(temp_dir.path(), "context-engine");
        log.line("Allowed tools: Read, Grep");
        log.chunk("STDOUT", b"partial");
        log.chunk("STDERR", b"warning\n");
        log.line("Process exited with code 0");

        let content = fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[1], "Allowed tools: Read, Grep");
        assert_eq!(lines[2], "[STDOUT]: partial");
        assert_eq!(lines[3], "[STDERR]: warning");
        assert_eq!(lines[4], "Process exited with code 0");
    }

    #[test]
    fn test_creates_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("a").join("b");
        let log = TraceLog::create(&nested, "x");
        assert!(log.path().exists());
    }

    #[test]
    fn test_unwritable_directory_is_swallowed() {
        let temp_dir = TempDir::new().unwrap();
        // A regular file where the directory should be
        let blocker = temp_dir.path().join("blocker");
        fs::write(&blocker, "").unwrap();

        let log = TraceLog::create(&blocker.join("traces"), "label");
        log.line("still fine");
        log.chunk("STDOUT", b"data");
        assert!(!log.path().exists());
    }

    #[test]
    fn test_disabled_discards_writes() {
        let log = TraceLog::disabled();
        log.line("ignored");
        assert_eq!(log.path(), Path::new(""));
    }

    #[test]
    fn test_sanitize_label() {
        assert_eq!(sanitize_label("code-editor"), "code-editor");
        assert_eq!(sanitize_label("../etc/passwd"), "___etc_passwd");
        assert_eq!(sanitize_label(""), "claude-code");
    }
}
