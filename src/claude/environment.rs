//! Host environment probes
//!
//! Locating the Claude Code executable and detecting WSL. Used by the
//! executor before spawning and by `doctor`.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::config::ClaudeSettings;

/// Search path for the executable: `extra_path` first, then `PATH`.
#[must_use]
pub fn search_path(settings: &ClaudeSettings) -> OsString {
    let system = std::env::var_os("PATH").unwrap_or_default();
    match &settings.extra_path {
        Some(extra) => {
            let mut joined = OsString::from(extra);
            joined.push(":");
            joined.push(system);
            joined
        }
        None => system,
    }
}

/// Resolve the configured executable to an existing, executable file.
pub fn locate_executable(settings: &ClaudeSettings) -> Result<PathBuf, String> {
    let cwd = settings.resolved_working_dir();
    which::which_in(&settings.executable, Some(search_path(settings)), &cwd).map_err(|e| {
        format!(
            "Claude executable '{}' not found: {e}",
            settings.executable.display()
        )
    })
}

/// Whether we are running inside Windows Subsystem for Linux.
#[must_use]
pub fn is_wsl() -> bool {
    detect_wsl(
        |key| std::env::var_os(key).is_some(),
        |path| std::fs::read_to_string(path).ok(),
        Path::exists,
    )
}

/// WSL detection with injectable probes: environment markers, then
/// `/proc/version`, then the `/mnt/c` mount.
fn detect_wsl<E, R, X>(has_env: E, read: R, exists: X) -> bool
where
    E: Fn(&str) -> bool,
    R: Fn(&Path) -> Option<String>,
    X: Fn(&Path) -> bool,
{
    if !cfg!(target_os = "linux") {
        return false;
    }
    if has_env("WSL_DISTRO_NAME") || has_env("WSLENV") {
        return true;
    }
    if read(Path::new("/proc/version"))
        .is_some_and(|v| v.to_lowercase().contains("microsoft"))
    {
        return true;
    }
    exists(Path::new("/mnt/c")) || exists(Path::new("/mnt/c/Windows"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locate_finds_shell_on_path() {
        let settings = ClaudeSettings {
            executable: PathBuf::from("sh"),
            ..ClaudeSettings::default()
        };
        let found = locate_executable(&settings).unwrap();
        assert!(found.ends_with("sh"));
    }

    #[test]
    fn test_locate_reports_missing_executable() {
        let settings = ClaudeSettings {
            executable: PathBuf::from("/nonexistent/bin/claude"),
            ..ClaudeSettings::default()
        };
        let err = locate_executable(&settings).unwrap_err();
        assert!(err.contains("/nonexistent/bin/claude"), "got: {err}");
    }

    #[test]
    fn test_search_path_prepends_extra() {
        let settings = ClaudeSettings {
            extra_path: Some("/opt/node/bin".into()),
            ..ClaudeSettings::default()
        };
        let path = search_path(&settings);
        assert!(path.to_string_lossy().starts_with("/opt/node/bin:"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_detect_wsl_from_env_marker() {
        assert!(detect_wsl(|k| k == "WSLENV", |_| None, |_| false));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_detect_wsl_from_proc_version() {
        let found = detect_wsl(
            |_| false,
            |_| Some("Linux version 5.15.90.1-microsoft-standard-WSL2".into()),
            |_| false,
        );
        assert!(found);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_detect_wsl_from_windows_mount() {
        assert!(detect_wsl(|_| false, |_| None, |p| p == Path::new("/mnt/c")));
    }

    #[test]
    fn test_detect_wsl_plain_linux() {
        let found = detect_wsl(
            |_| false,
            |_| Some("Linux version 6.8.0-generic".into()),
            |_| false,
        );
        assert!(!found);
    }
}
