//! QQBridge configuration management
//!
//! Configuration is a nested document (YAML by default, TOML when the file
//! extension is `.toml`). [`ConfigDocument`] gives dotted-path access to the
//! raw document; [`BridgeConfig`] is the typed view every component is
//! constructed from.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main QQBridge configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// OneBot gateway connection
    pub network: NetworkConfig,

    /// Claude Code CLI invocation
    pub claude: ClaudeConfig,

    /// Message routing behaviour
    pub bot: BotConfig,

    /// Heartbeat and liveness probing
    pub heartbeat: HeartbeatConfig,

    /// Logging
    pub logging: LoggingConfig,

    /// Proxy settings exported to the CLI process
    pub proxy: ProxyConfig,
}

/// OneBot gateway connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// WebSocket URL of the OneBot gateway (forward WebSocket)
    pub onebot_ws_url: String,

    /// Seconds to wait between connection attempts
    pub reconnect_interval: u64,

    /// Handshake timeout in seconds
    pub timeout: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            onebot_ws_url: "ws://127.0.0.1:3001".to_string(),
            reconnect_interval: 5,
            timeout: 30,
        }
    }
}

impl NetworkConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Largest accepted `claude.max_backoff`, in seconds
pub const MAX_BACKOFF_SECS: f64 = 3600.0;

/// Claude Code CLI configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaudeConfig {
    /// Explicit CLI path; `claude` means "look it up"
    pub cli_path: String,

    /// Working directory the CLI runs in
    pub work_dir: PathBuf,

    /// Hard wall-clock timeout per attempt, in seconds
    pub timeout: u64,

    /// Maximum attempts per invocation (the first try counts)
    pub max_retries: u32,

    /// Backoff before the first retry, in seconds
    pub initial_backoff: f64,

    /// Backoff cap, in seconds
    pub max_backoff: f64,
}

impl Default for ClaudeConfig {
    fn default() -> Self {
        Self {
            cli_path: "claude".to_string(),
            work_dir: PathBuf::from("."),
            timeout: 300,
            max_retries: 3,
            initial_backoff: 1.0,
            max_backoff: 60.0,
        }
    }
}

impl ClaudeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Message routing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// The bot's own QQ number (informational)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qq_number: Option<String>,

    /// Reply to every private message, not only commands
    pub auto_reply_private: bool,

    /// Drop private messages whose sub_type is not "friend"
    pub ignore_temp_session: bool,

    /// Command prefixes, checked in order; first match wins
    pub command_prefix: Vec<String>,

    /// Acknowledgement sent before the CLI is invoked
    pub ack_message: String,

    /// Maximum characters per outgoing message
    pub max_message_length: usize,

    /// Delay between chunks of a long reply, in milliseconds
    pub chunk_delay_ms: u64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            qq_number: None,
            auto_reply_private: true,
            ignore_temp_session: true,
            command_prefix: vec![
                "/claude".to_string(),
                "/c".to_string(),
                "/问".to_string(),
                "/ask".to_string(),
            ],
            ack_message: "Claude is thinking...".to_string(),
            max_message_length: 2000,
            chunk_delay_ms: 500,
        }
    }
}

impl BotConfig {
    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }
}

/// Heartbeat and liveness configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Transport ping interval of the session's own heartbeat, in seconds
    pub ping_interval: u64,

    /// Liveness probe interval, in seconds
    pub check_interval: u64,

    /// Consecutive probe failures before the link is reported offline
    pub failure_threshold: u32,

    /// Upper bound on a single probe, in seconds
    pub probe_timeout: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: 30,
            check_interval: 60,
            failure_threshold: 3,
            probe_timeout: 10,
        }
    }
}

impl HeartbeatConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout)
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level for the `qqbridge` target when `RUST_LOG` is unset
    pub level: String,

    /// Output format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Proxy configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_proxy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub https_proxy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_proxy: Option<String>,
}

impl ProxyConfig {
    /// Environment variables to export to child processes
    pub fn env_vars(&self) -> Vec<(&'static str, String)> {
        let mut vars = Vec::new();
        if let Some(v) = &self.http_proxy {
            vars.push(("HTTP_PROXY", v.clone()));
        }
        if let Some(v) = &self.https_proxy {
            vars.push(("HTTPS_PROXY", v.clone()));
        }
        if let Some(v) = &self.no_proxy {
            vars.push(("NO_PROXY", v.clone()));
        }
        vars
    }
}

/// Environment variables that override proxy settings, with their config keys
const PROXY_ENV_OVERRIDES: [(&str, &str); 3] = [
    ("HTTP_PROXY", "proxy.http_proxy"),
    ("HTTPS_PROXY", "proxy.https_proxy"),
    ("NO_PROXY", "proxy.no_proxy"),
];

impl BridgeConfig {
    /// Load a config file, apply proxy env overrides and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let mut doc = ConfigDocument::load(path)?;
        doc.apply_proxy_overrides(|name| std::env::var(name).ok())?;
        let config = doc.to_config()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus proxy env overrides, for running without a config file.
    pub fn from_env() -> Result<Self> {
        let mut doc = ConfigDocument::from_config(&Self::default())?;
        doc.apply_proxy_overrides(|name| std::env::var(name).ok())?;
        doc.to_config()
    }

    /// Reject values the bridge cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.network.reconnect_interval == 0 {
            return Err(Error::Config(
                "network.reconnect_interval must be at least 1 second".to_string(),
            ));
        }
        let url = &self.network.onebot_ws_url;
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(Error::Config(format!(
                "network.onebot_ws_url must be a ws:// or wss:// URL, got '{}'",
                url
            )));
        }
        if self.claude.max_retries == 0 {
            return Err(Error::Config(
                "claude.max_retries must be at least 1".to_string(),
            ));
        }
        if !(self.claude.initial_backoff > 0.0) {
            return Err(Error::Config(
                "claude.initial_backoff must be positive".to_string(),
            ));
        }
        if !(self.claude.max_backoff >= self.claude.initial_backoff) {
            return Err(Error::Config(
                "claude.max_backoff must not be below claude.initial_backoff".to_string(),
            ));
        }
        // Also rules out infinity
        if self.claude.max_backoff > MAX_BACKOFF_SECS {
            return Err(Error::Config(format!(
                "claude.max_backoff must not exceed {} seconds",
                MAX_BACKOFF_SECS
            )));
        }
        if self.bot.max_message_length == 0 {
            return Err(Error::Config(
                "bot.max_message_length must be positive".to_string(),
            ));
        }
        if self.heartbeat.failure_threshold == 0 {
            return Err(Error::Config(
                "heartbeat.failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.heartbeat.check_interval == 0 || self.heartbeat.ping_interval == 0 {
            return Err(Error::Config(
                "heartbeat intervals must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Dotted-path document
// =============================================================================

/// Raw configuration document with dotted-path access (`claude.timeout`).
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigDocument {
    root: Value,
}

impl ConfigDocument {
    /// Load a YAML (or `.toml`) document from disk.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)?;
        if is_toml(path) {
            Self::from_toml_str(&content)
        } else {
            Self::from_yaml_str(&content)
        }
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let root: Value = serde_yaml::from_str(content)?;
        Ok(Self::from_value(root))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let table: toml::Value = toml::from_str(content)?;
        Ok(Self::from_value(serde_yaml::to_value(table)?))
    }

    pub fn from_config(config: &BridgeConfig) -> Result<Self> {
        Ok(Self::from_value(serde_yaml::to_value(config)?))
    }

    fn from_value(root: Value) -> Self {
        // An empty file parses as null
        let root = if root.is_null() {
            Value::Mapping(Mapping::new())
        } else {
            root
        };
        Self { root }
    }

    /// Look up a dotted key; `None` if any segment is missing.
    pub fn get(&self, key: &str) -> Option<&Value> {
        let mut current = &self.root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    /// Set a dotted key, creating intermediate sections on demand.
    pub fn set(&mut self, key: &str, value: Value) -> Result<()> {
        let parts: Vec<&str> = key.split('.').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(Error::Config(format!("Invalid config key '{}'", key)));
        }
        let Some((last, parents)) = parts.split_last() else {
            return Err(Error::Config(format!("Invalid config key '{}'", key)));
        };

        let mut current = &mut self.root;
        for part in parents {
            let map = current.as_mapping_mut().ok_or_else(|| {
                Error::Config(format!("'{}' crosses a non-section value at '{}'", key, part))
            })?;
            current = map
                .entry(Value::String((*part).to_string()))
                .or_insert_with(|| Value::Mapping(Mapping::new()));
        }

        let map = current
            .as_mapping_mut()
            .ok_or_else(|| Error::Config(format!("'{}' has no parent section", key)))?;
        map.insert(Value::String((*last).to_string()), value);
        Ok(())
    }

    /// Copy proxy variables from the environment into `proxy.*`.
    pub fn apply_proxy_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        for (var, key) in PROXY_ENV_OVERRIDES {
            if let Some(value) = lookup(var).filter(|v| !v.is_empty()) {
                self.set(key, Value::String(value))?;
            }
        }
        Ok(())
    }

    /// Typed view of the document; missing sections take their defaults.
    pub fn to_config(&self) -> Result<BridgeConfig> {
        Ok(serde_yaml::from_value(self.root.clone())?)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.root)?)
    }

    /// Write the document back, in the format implied by the extension.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = if is_toml(path) {
            toml::to_string_pretty(&self.root)
                .map_err(|e| Error::Config(format!("Failed to encode TOML: {}", e)))?
        } else {
            self.to_yaml_string()?
        };
        std::fs::write(path, content)?;
        Ok(())
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("toml")
}
