//! Broker configuration.
//!
//! Loaded from an optional TOML file, then overridden by environment
//! variables (`TETHER_PORT`, `TETHER_PROXY_PORT`, `REQUEST_TIMEOUT`, ...).
//! Every field has a serde default so a missing or partial file works.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Address the control-channel WebSocket server binds to.
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,

    /// Loopback address the translation proxy binds to. Subprocesses are
    /// pointed at this via `ANTHROPIC_BASE_URL`.
    #[serde(default = "d_proxy_host")]
    pub proxy_host: String,
    #[serde(default = "d_proxy_port")]
    pub proxy_port: u16,

    /// Total upstream HTTP timeout in seconds. No per-chunk timeout is
    /// applied; streams may legitimately run for minutes.
    #[serde(default = "d_request_timeout")]
    pub request_timeout_secs: u64,

    /// Session idle timeout in seconds. `0` disables the sweep entirely;
    /// sessions are then never destroyed implicitly.
    #[serde(default)]
    pub session_timeout_secs: u64,

    /// Connection idle timeout in seconds. `0` disables idleness checks;
    /// closed sockets are still swept.
    #[serde(default = "d_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Interval between dead-connection sweeps.
    #[serde(default = "d_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Maximum live connections per session; attaching beyond this closes
    /// the oldest connection.
    #[serde(default = "d_max_connections")]
    pub max_connections_per_session: usize,

    /// Per-session outbound frame ring size.
    #[serde(default = "d_buffer_max")]
    pub buffer_max_messages: usize,

    /// Seconds an acknowledged frame is retained before the GC may drop it.
    #[serde(default = "d_buffer_retention")]
    pub buffer_retention_secs: u64,

    /// Safety floor: the newest N frames are always retained regardless of
    /// ack state, absorbing out-of-order acks and reconnect replay.
    #[serde(default = "d_buffer_floor")]
    pub buffer_keep_floor: usize,

    /// Directory holding the LLM-CLI's on-disk conversation history.
    #[serde(default = "d_projects_dir")]
    pub projects_dir: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            proxy_host: d_proxy_host(),
            proxy_port: d_proxy_port(),
            request_timeout_secs: d_request_timeout(),
            session_timeout_secs: 0,
            connection_timeout_secs: d_connection_timeout(),
            cleanup_interval_secs: d_cleanup_interval(),
            max_connections_per_session: d_max_connections(),
            buffer_max_messages: d_buffer_max(),
            buffer_retention_secs: d_buffer_retention(),
            buffer_keep_floor: d_buffer_floor(),
            projects_dir: d_projects_dir(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_host() -> String {
    "0.0.0.0".into()
}
fn d_port() -> u16 {
    8765
}
fn d_proxy_host() -> String {
    "127.0.0.1".into()
}
fn d_proxy_port() -> u16 {
    8082
}
fn d_request_timeout() -> u64 {
    120
}
fn d_connection_timeout() -> u64 {
    300
}
fn d_cleanup_interval() -> u64 {
    30
}
fn d_max_connections() -> usize {
    3
}
fn d_buffer_max() -> usize {
    1000
}
fn d_buffer_retention() -> u64 {
    300
}
fn d_buffer_floor() -> usize {
    100
}
fn d_projects_dir() -> String {
    "~/.claude/projects".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Loading & validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl BrokerConfig {
    /// Load from an optional TOML file, then apply environment overrides.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p)?;
                toml::from_str(&raw).map_err(|e| Error::Config(e.to_string()))?
            }
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse::<u16>("TETHER_PORT") {
            self.port = v;
        }
        if let Ok(v) = std::env::var("TETHER_HOST") {
            self.host = v;
        }
        if let Some(v) = env_parse::<u16>("TETHER_PROXY_PORT") {
            self.proxy_port = v;
        }
        if let Ok(v) = std::env::var("TETHER_PROXY_HOST") {
            self.proxy_host = v;
        }
        if let Some(v) = env_parse::<u64>("REQUEST_TIMEOUT") {
            self.request_timeout_secs = v;
        }
        if let Some(v) = env_parse::<u64>("TETHER_SESSION_TIMEOUT") {
            self.session_timeout_secs = v;
        }
        if let Ok(v) = std::env::var("TETHER_PROJECTS_DIR") {
            self.projects_dir = v;
        }
    }

    /// Base URL subprocesses are given via `ANTHROPIC_BASE_URL`.
    pub fn proxy_base_url(&self) -> String {
        format!("http://{}:{}", self.proxy_host, self.proxy_port)
    }

    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        if self.port == self.proxy_port && self.host == self.proxy_host {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "broker and proxy cannot share the same host:port".into(),
            });
        }
        if self.buffer_keep_floor > self.buffer_max_messages {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: format!(
                    "buffer_keep_floor ({}) exceeds buffer_max_messages ({})",
                    self.buffer_keep_floor, self.buffer_max_messages
                ),
            });
        }
        if self.request_timeout_secs == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: "request_timeout_secs is 0; upstream requests may hang forever".into(),
            });
        }
        if self.max_connections_per_session == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "max_connections_per_session must be at least 1".into(),
            });
        }
        issues
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = BrokerConfig::default();
        let errors: Vec<_> = config
            .validate()
            .into_iter()
            .filter(|i| i.severity == ConfigSeverity::Error)
            .collect();
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "port = 9000\nproxy_port = 9001").unwrap();
        let config = BrokerConfig::load(Some(f.path())).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.proxy_port, 9001);
        assert_eq!(config.buffer_max_messages, 1000);
        assert_eq!(config.buffer_keep_floor, 100);
    }

    #[test]
    fn colliding_ports_rejected() {
        let config = BrokerConfig {
            host: "127.0.0.1".into(),
            port: 8082,
            proxy_host: "127.0.0.1".into(),
            proxy_port: 8082,
            ..Default::default()
        };
        assert!(config
            .validate()
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn floor_above_ring_rejected() {
        let config = BrokerConfig {
            buffer_max_messages: 50,
            buffer_keep_floor: 100,
            ..Default::default()
        };
        assert!(config
            .validate()
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn proxy_base_url_format() {
        let config = BrokerConfig::default();
        assert_eq!(config.proxy_base_url(), "http://127.0.0.1:8082");
    }
}
