//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** — `MCP_PORT`, `FRONTEND_PORT`,
//!    `MAX_BUFFER_SIZE`, `SESSION_TIMEOUT`, `COMPACT_ANIMATIONS`,
//!    `ANIMATION_THROTTLE_MS`
//! 2. **Config file** — path via `--config <path>`, or `termhost.toml` in CWD
//! 3. **Compiled defaults** — see each field's default below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! frontend_port = 3000
//! mcp_port = 3001
//! cors_origins = ["*"]
//! cors_credentials = false
//! max_connections = 64
//!
//! [terminal]
//! default_shell = "/bin/bash"
//! default_cols = 80
//! default_rows = 24
//! max_buffer_lines = 10000
//! max_buffer_bytes = 5242880   # 5 MB
//! session_timeout_ms = 0       # 0 = never reap idle sessions
//!
//! [spinner]
//! enabled = true
//! throttle_ms = 100
//!
//! [mcp]
//! enable_dns_rebinding_protection = false
//! allowed_hosts = ["127.0.0.1", "localhost"]
//!
//! [logging]
//! level = "info"
//!
//! # Hook rules: match = "exact" | "prefix" | "regex"
//! [[hooks.blacklist]]
//! match = "exact"
//! pattern = "rm -rf /"
//! message = "refusing to delete the filesystem root"
//!
//! [[hooks.annotations]]
//! match = "prefix"
//! pattern = "git push"
//! text = "Run the test suite before pushing."
//! scope = "ci-*"               # optional session-name pattern
//! ```

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub terminal: TerminalConfig,
    #[serde(default)]
    pub spinner: SpinnerConfig,
    #[serde(default)]
    pub mcp: McpConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub hooks: HooksConfig,
}

/// HTTP listener and transport settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind (default `127.0.0.1` — deployment is loopback-only).
    #[serde(default = "default_host")]
    pub host: String,
    /// Port for the REST + WebSocket UI surface (default 3000).
    #[serde(default = "default_frontend_port")]
    pub frontend_port: u16,
    /// Port for the MCP streamable-HTTP surface (default 3001).
    #[serde(default = "default_mcp_port")]
    pub mcp_port: u16,
    /// Allowed CORS origins; `["*"]` allows any (default).
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
    /// Whether CORS responses allow credentials (default false).
    #[serde(default)]
    pub cors_credentials: bool,
    /// Maximum concurrent in-flight requests per listener (default 64).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Per-terminal defaults used when `create_terminal` omits an option.
#[derive(Debug, Clone, Deserialize)]
pub struct TerminalConfig {
    /// Shell binary for new sessions (default `/bin/bash`, falling back to
    /// `/bin/sh` when bash is absent).
    #[serde(default = "default_shell")]
    pub default_shell: String,
    /// Default terminal columns (default 80).
    #[serde(default = "default_cols")]
    pub default_cols: u16,
    /// Default terminal rows (default 24).
    #[serde(default = "default_rows")]
    pub default_rows: u16,
    /// Lines retained per session buffer (default 10 000).
    #[serde(default = "default_max_buffer_lines")]
    pub max_buffer_lines: usize,
    /// Bytes retained per session buffer (default 5 MB).
    #[serde(default = "default_max_buffer_bytes")]
    pub max_buffer_bytes: usize,
    /// Idle milliseconds before the reaper terminates a session
    /// (default 0 = never).
    #[serde(default)]
    pub session_timeout_ms: u64,
    /// UI hint only; passed through to the browser terminal.
    #[serde(default)]
    pub font_size: Option<u16>,
    /// UI hint only; passed through to the browser terminal.
    #[serde(default)]
    pub font_family: Option<String>,
}

/// Spinner compaction defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct SpinnerConfig {
    /// Whether new sessions compact animations by default (default true).
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Frames closer together than this collapse (default 100 ms).
    #[serde(default = "default_spinner_throttle_ms")]
    pub throttle_ms: u64,
}

/// MCP transport hardening.
#[derive(Debug, Clone, Deserialize)]
pub struct McpConfig {
    /// Reject requests whose `Host` header is not in `allowed_hosts`.
    #[serde(default)]
    pub enable_dns_rebinding_protection: bool,
    /// Host allowlist for rebinding protection.
    #[serde(default = "default_allowed_hosts")]
    pub allowed_hosts: Vec<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// How a hook rule matches a command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    #[default]
    Exact,
    Prefix,
    Regex,
}

/// One hook rule as written in the config file. The payload field accepts
/// the class-appropriate name (`message`, `command`, `path`, `text`).
#[derive(Debug, Clone, Deserialize)]
pub struct HookRuleConfig {
    #[serde(rename = "match", default)]
    pub match_kind: MatchKind,
    pub pattern: String,
    #[serde(alias = "message", alias = "command", alias = "path", alias = "text")]
    pub payload: String,
    /// Session-name pattern: exact name, trailing-`*` prefix, or absent/`*`
    /// for global.
    #[serde(default)]
    pub scope: Option<String>,
}

/// Hook rule lists, one per class.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HooksConfig {
    #[serde(default)]
    pub pre_scripts: Vec<HookRuleConfig>,
    #[serde(default)]
    pub post_scripts: Vec<HookRuleConfig>,
    #[serde(default)]
    pub prefix_commands: Vec<HookRuleConfig>,
    #[serde(default)]
    pub suffix_commands: Vec<HookRuleConfig>,
    #[serde(default)]
    pub annotations: Vec<HookRuleConfig>,
    #[serde(default)]
    pub blacklist: Vec<HookRuleConfig>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_frontend_port() -> u16 {
    3000
}
fn default_mcp_port() -> u16 {
    3001
}
fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}
fn default_max_connections() -> usize {
    64
}
fn default_shell() -> String {
    if Path::new("/bin/bash").exists() {
        "/bin/bash".to_string()
    } else {
        "/bin/sh".to_string()
    }
}
fn default_cols() -> u16 {
    80
}
fn default_rows() -> u16 {
    24
}
fn default_max_buffer_lines() -> usize {
    10_000
}
fn default_max_buffer_bytes() -> usize {
    5 * 1024 * 1024
}
fn default_true() -> bool {
    true
}
fn default_spinner_throttle_ms() -> u64 {
    100
}
fn default_allowed_hosts() -> Vec<String> {
    vec!["127.0.0.1".to_string(), "localhost".to_string()]
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            frontend_port: default_frontend_port(),
            mcp_port: default_mcp_port(),
            cors_origins: default_cors_origins(),
            cors_credentials: false,
            max_connections: default_max_connections(),
        }
    }
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            default_shell: default_shell(),
            default_cols: default_cols(),
            default_rows: default_rows(),
            max_buffer_lines: default_max_buffer_lines(),
            max_buffer_bytes: default_max_buffer_bytes(),
            session_timeout_ms: 0,
            font_size: None,
            font_family: None,
        }
    }
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            enable_dns_rebinding_protection: false,
            allowed_hosts: default_allowed_hosts(),
        }
    }
}

impl Default for SpinnerConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            throttle_ms: default_spinner_throttle_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, that file must exist and parse. Otherwise
    /// `termhost.toml` in the current directory is used when present,
    /// falling back to compiled defaults.
    pub fn load(path: Option<&str>) -> Result<Self, String> {
        let mut config: Config = if let Some(p) = path {
            let content = std::fs::read_to_string(p)
                .map_err(|e| format!("failed to read config file {p}: {e}"))?;
            toml::from_str(&content).map_err(|e| format!("failed to parse {p}: {e}"))?
        } else if Path::new("termhost.toml").exists() {
            let content = std::fs::read_to_string("termhost.toml")
                .map_err(|e| format!("failed to read termhost.toml: {e}"))?;
            toml::from_str(&content).map_err(|e| format!("failed to parse termhost.toml: {e}"))?
        } else {
            Config::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(port) = env_parse::<u16>("MCP_PORT") {
            self.server.mcp_port = port;
        }
        if let Some(port) = env_parse::<u16>("FRONTEND_PORT") {
            self.server.frontend_port = port;
        }
        if let Some(lines) = env_parse::<usize>("MAX_BUFFER_SIZE") {
            self.terminal.max_buffer_lines = lines;
        }
        if let Some(ms) = env_parse::<u64>("SESSION_TIMEOUT") {
            self.terminal.session_timeout_ms = ms;
        }
        if let Ok(raw) = std::env::var("COMPACT_ANIMATIONS") {
            self.spinner.enabled = matches!(raw.as_str(), "1" | "true" | "yes" | "on");
        }
        if let Some(ms) = env_parse::<u64>("ANIMATION_THROTTLE_MS") {
            self.spinner.throttle_ms = ms;
        }
    }

    /// Validate cross-field constraints. Returns all problems found.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.server.frontend_port == self.server.mcp_port {
            errors.push(format!(
                "server.frontend_port and server.mcp_port must differ (both {})",
                self.server.mcp_port
            ));
        }
        if self.terminal.default_cols == 0 || self.terminal.default_cols > 1000 {
            errors.push("terminal.default_cols must be in 1..=1000".to_string());
        }
        if self.terminal.default_rows == 0 || self.terminal.default_rows > 1000 {
            errors.push("terminal.default_rows must be in 1..=1000".to_string());
        }
        if self.terminal.max_buffer_lines == 0 {
            errors.push("terminal.max_buffer_lines must be > 0".to_string());
        }
        if self.terminal.max_buffer_bytes == 0 {
            errors.push("terminal.max_buffer_bytes must be > 0".to_string());
        }
        if !Path::new(&self.terminal.default_shell).exists() {
            errors.push(format!(
                "terminal.default_shell does not exist: {}",
                self.terminal.default_shell
            ));
        }
        if self.mcp.enable_dns_rebinding_protection && self.mcp.allowed_hosts.is_empty() {
            errors.push(
                "mcp.allowed_hosts must be non-empty when rebinding protection is on".to_string(),
            );
        }
        errors
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_cleanly() {
        let config = Config::default();
        assert!(config.validate().is_empty(), "{:?}", config.validate());
        assert_eq!(config.terminal.default_cols, 80);
        assert!(config.spinner.enabled);
        assert_eq!(config.spinner.throttle_ms, 100);
    }

    #[test]
    fn parses_full_toml() {
        let toml = r#"
            [server]
            host = "0.0.0.0"
            frontend_port = 4000
            mcp_port = 4001

            [terminal]
            default_shell = "/bin/sh"
            max_buffer_lines = 500

            [spinner]
            enabled = false

            [[hooks.blacklist]]
            match = "exact"
            pattern = "rm -rf /"
            message = "no"

            [[hooks.annotations]]
            match = "prefix"
            pattern = "git push"
            text = "run tests first"
            scope = "ci-*"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.frontend_port, 4000);
        assert_eq!(config.terminal.max_buffer_lines, 500);
        assert!(!config.spinner.enabled);
        assert_eq!(config.hooks.blacklist.len(), 1);
        assert_eq!(config.hooks.blacklist[0].payload, "no");
        assert_eq!(config.hooks.annotations[0].scope.as_deref(), Some("ci-*"));
        assert_eq!(config.hooks.annotations[0].match_kind, MatchKind::Prefix);
    }

    #[test]
    fn hook_rule_defaults_to_exact_match() {
        let toml = r#"
            [[hooks.blacklist]]
            pattern = "sudo su"
            message = "stay unprivileged"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.hooks.blacklist[0].match_kind, MatchKind::Exact);
    }

    #[test]
    fn same_ports_fail_validation() {
        let mut config = Config::default();
        config.server.mcp_port = config.server.frontend_port;
        assert!(!config.validate().is_empty());
    }

    #[test]
    fn out_of_range_geometry_fails_validation() {
        let mut config = Config::default();
        config.terminal.default_cols = 0;
        assert!(!config.validate().is_empty());
        config.terminal.default_cols = 1001;
        assert!(!config.validate().is_empty());
    }
}
