//! Configuration
//!
//! Settings come from an optional TOML file, then environment overrides.
//! Everything is read once at startup and shared read-only afterwards.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable naming the Claude Code executable.
pub const ENV_EXECUTABLE: &str = "CLAUDE_EXECUTABLE_PATH";
/// Environment variable naming the directory Claude Code runs in.
pub const ENV_USER_DIRECTORY: &str = "CC_USER_DIRECTORY";
/// Environment variable prepended to `PATH` for the child shell.
pub const ENV_EXTRA_PATH: &str = "CC_EXTRA_PATH";
/// Environment variable overriding the HTTP listen port.
pub const ENV_PORT: &str = "PORT";
/// Environment variable holding the initial access token for `/register`.
pub const ENV_REGISTRATION_TOKEN: &str = "CC_REGISTRATION_TOKEN";

/// Settings for launching the Claude Code CLI
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClaudeSettings {
    /// Path or name of the `claude` executable
    #[serde(default = "default_executable")]
    pub executable: PathBuf,
    /// Working directory for the CLI (defaults to the current directory)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// Directory prepended to `PATH` (e.g. where `node` lives)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_path: Option<String>,
    /// Where per-execution trace files go (defaults to `<tmp>/claude-code-mcp`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_dir: Option<PathBuf>,
    /// Time between SIGTERM and SIGKILL after a timeout
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
}

fn default_executable() -> PathBuf {
    PathBuf::from("claude")
}

const fn default_grace_period_ms() -> u64 {
    3000
}

impl Default for ClaudeSettings {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            working_dir: None,
            extra_path: None,
            trace_dir: None,
            grace_period_ms: default_grace_period_ms(),
        }
    }
}

impl ClaudeSettings {
    /// Working directory, falling back to the process's current directory.
    #[must_use]
    pub fn resolved_working_dir(&self) -> PathBuf {
        self.working_dir.clone().unwrap_or_else(|| {
            std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
        })
    }

    /// Trace directory, falling back to `<tmp>/claude-code-mcp`.
    #[must_use]
    pub fn resolved_trace_dir(&self) -> PathBuf {
        self.trace_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("claude-code-mcp"))
    }

    /// Grace period as a `Duration`.
    #[must_use]
    pub const fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerSettings {
    /// Interface to bind
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind (0 lets the OS pick)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Externally visible base URL, used in discovery documents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
    /// Reject MCP requests without a valid bearer token
    #[serde(default = "default_require_auth")]
    pub require_auth: bool,
    /// Initial access token required by `/register` (RFC 7591 §3).
    /// Unset means anyone who can reach the server may register a client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_token: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    3000
}

const fn default_require_auth() -> bool {
    true
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: None,
            require_auth: default_require_auth(),
            registration_token: None,
        }
    }
}

impl ServerSettings {
    /// `host:port` string for binding.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether `host` only accepts local connections.
    #[must_use]
    pub fn is_loopback(&self) -> bool {
        let host = self.host.trim_start_matches('[').trim_end_matches(']');
        host.eq_ignore_ascii_case("localhost")
            || host
                .parse::<std::net::IpAddr>()
                .is_ok_and(|ip| ip.is_loopback())
    }

    /// Whether `/mcp` is closed to callers the operator has not provisioned:
    /// bearer tokens are required and so is the registration token.
    #[must_use]
    pub const fn is_access_controlled(&self) -> bool {
        self.require_auth && self.registration_token.is_some()
    }
}

/// Reverse proxy settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProxySettings {
    /// Interface to bind
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind
    #[serde(default = "default_proxy_port")]
    pub port: u16,
    /// Base URL of the claude-code HTTP server
    #[serde(default = "default_claude_code_upstream")]
    pub claude_code_upstream: String,
    /// Base URL of the sequential-thinking HTTP server
    #[serde(default = "default_sequential_thinking_upstream")]
    pub sequential_thinking_upstream: String,
}

const fn default_proxy_port() -> u16 {
    8080
}

fn default_claude_code_upstream() -> String {
    "http://localhost:3000".to_string()
}

fn default_sequential_thinking_upstream() -> String {
    "http://localhost:3001".to_string()
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_proxy_port(),
            claude_code_upstream: default_claude_code_upstream(),
            sequential_thinking_upstream: default_sequential_thinking_upstream(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Claude Code CLI settings
    #[serde(default)]
    pub claude: ClaudeSettings,
    /// MCP HTTP server settings
    #[serde(default)]
    pub server: ServerSettings,
    /// Reverse proxy settings
    #[serde(default)]
    pub proxy: ProxySettings,
}

impl Config {
    /// Load configuration from an optional file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_path(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML config file from a path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse TOML config content from a string
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides using `lookup` to read variables.
    ///
    /// Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(exe) = get(ENV_EXECUTABLE) {
            self.claude.executable = PathBuf::from(exe);
        }
        if let Some(dir) = get(ENV_USER_DIRECTORY) {
            self.claude.working_dir = Some(PathBuf::from(dir));
        }
        if let Some(extra) = get(ENV_EXTRA_PATH) {
            self.claude.extra_path = Some(extra);
        }
        if let Some(port) = get(ENV_PORT) {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid {ENV_PORT} value: '{port}'"))?;
        }
        if let Some(token) = get(ENV_REGISTRATION_TOKEN) {
            self.server.registration_token = Some(token);
        }
        Ok(())
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.claude.executable.as_os_str().is_empty() {
            bail!("claude.executable cannot be empty");
        }
        if self.claude.grace_period_ms == 0 {
            bail!("claude.grace_period_ms must be greater than zero");
        }
        for (name, url) in [
            ("proxy.claude_code_upstream", &self.proxy.claude_code_upstream),
            (
                "proxy.sequential_thinking_upstream",
                &self.proxy.sequential_thinking_upstream,
            ),
        ] {
            url::Url::parse(url).with_context(|| format!("{name} is not a valid URL: '{url}'"))?;
        }
        if let Some(public_url) = &self.server.public_url {
            url::Url::parse(public_url)
                .with_context(|| format!("server.public_url is not a valid URL: '{public_url}'"))?;
        }
        if self
            .server
            .registration_token
            .as_deref()
            .is_some_and(|t| t.trim().is_empty())
        {
            bail!("server.registration_token cannot be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.claude.executable, PathBuf::from("claude"));
        assert_eq!(config.claude.grace_period(), Duration::from_millis(3000));
        assert_eq!(config.server.port, 3000);
        assert!(config.server.require_auth);
        assert_eq!(config.proxy.port, 8080);
    }

    #[test]
    fn test_parse_full_config() {
        let config = Config::parse(
            r#"
[claude]
executable = "/opt/claude/bin/claude"
working_dir = "/work/project"
extra_path = "/opt/node/bin"
grace_period_ms = 500

[server]
host = "0.0.0.0"
port = 3001
public_url = "https://example.ngrok.app"
require_auth = false

[proxy]
port = 9000
claude_code_upstream = "http://127.0.0.1:4000"
"#,
        )
        .unwrap();

        assert_eq!(config.claude.executable, PathBuf::from("/opt/claude/bin/claude"));
        assert_eq!(config.claude.working_dir, Some(PathBuf::from("/work/project")));
        assert_eq!(config.claude.extra_path.as_deref(), Some("/opt/node/bin"));
        assert_eq!(config.claude.grace_period(), Duration::from_millis(500));
        assert_eq!(config.server.bind_addr(), "0.0.0.0:3001");
        assert!(!config.server.require_auth);
        assert_eq!(config.proxy.port, 9000);
        assert_eq!(config.proxy.claude_code_upstream, "http://127.0.0.1:4000");
        assert_eq!(
            config.proxy.sequential_thinking_upstream,
            "http://localhost:3001"
        );
    }

    #[test]
    fn test_rejects_zero_grace_period() {
        let result = Config::parse("[claude]\ngrace_period_ms = 0\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_invalid_upstream_url() {
        let result = Config::parse("[proxy]\nclaude_code_upstream = \"not a url\"\n");
        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("proxy.claude_code_upstream"));
    }

    #[test]
    fn test_rejects_malformed_toml() {
        assert!(Config::parse("[claude\nexecutable = 1").is_err());
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = Config::parse("[claude]\nexecutable = \"/from/file\"\n").unwrap();
        let vars = env(&[
            (ENV_EXECUTABLE, "/from/env/claude"),
            (ENV_USER_DIRECTORY, "/home/dev/project"),
            (ENV_EXTRA_PATH, "/usr/local/node/bin"),
            (ENV_PORT, "4123"),
            (ENV_REGISTRATION_TOKEN, "op-secret"),
        ]);
        config.apply_env(|k| vars.get(k).cloned()).unwrap();

        assert_eq!(config.claude.executable, PathBuf::from("/from/env/claude"));
        assert_eq!(
            config.claude.working_dir,
            Some(PathBuf::from("/home/dev/project"))
        );
        assert_eq!(config.claude.extra_path.as_deref(), Some("/usr/local/node/bin"));
        assert_eq!(config.server.port, 4123);
        assert_eq!(config.server.registration_token.as_deref(), Some("op-secret"));
    }

    #[test]
    fn test_env_empty_values_are_ignored() {
        let mut config = Config::default();
        let vars = env(&[(ENV_EXECUTABLE, "  "), (ENV_USER_DIRECTORY, "")]);
        config.apply_env(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(config.claude.executable, PathBuf::from("claude"));
        assert!(config.claude.working_dir.is_none());
    }

    #[test]
    fn test_env_invalid_port_is_an_error() {
        let mut config = Config::default();
        let vars = env(&[(ENV_PORT, "eighty")]);
        assert!(config.apply_env(|k| vars.get(k).cloned()).is_err());
    }

    #[test]
    fn test_rejects_empty_registration_token() {
        assert!(Config::parse("[server]\nregistration_token = \" \"\n").is_err());
    }

    #[test]
    fn test_loopback_and_access_control() {
        let mut server = ServerSettings::default();
        assert!(server.is_loopback());
        assert!(!server.is_access_controlled());

        for host in ["localhost", "::1", "[::1]", "127.0.0.2"] {
            server.host = host.into();
            assert!(server.is_loopback(), "{host}");
        }
        for host in ["0.0.0.0", "192.168.1.10", "mcp.example.com"] {
            server.host = host.into();
            assert!(!server.is_loopback(), "{host}");
        }

        server.registration_token = Some("op-secret".into());
        assert!(server.is_access_controlled());
        server.require_auth = false;
        assert!(!server.is_access_controlled());
    }

    #[test]
    fn test_resolved_dirs_fall_back() {
        let settings = ClaudeSettings::default();
        assert!(settings.resolved_trace_dir().ends_with("claude-code-mcp"));
        assert!(!settings.resolved_working_dir().as_os_str().is_empty());
    }

    #[test]
    fn test_from_path_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("claude-mcp.toml");
        std::fs::write(&path, "[server]\nport = 3500\n").unwrap();
        let config = Config::from_path(&path).unwrap();
        assert_eq!(config.server.port, 3500);
    }

    #[test]
    fn test_from_path_missing_file_is_an_error() {
        let result = Config::from_path("/nonexistent/claude-mcp.toml");
        assert!(result.is_err());
    }
}
