//! Server configuration.
//!
//! Configuration is layered:
//! - Built-in defaults
//! - TOML configuration file (`$CHATLINE_CONFIG` or a default path)
//! - Environment variables (`CHATLINE_*`, `__` between nested keys, e.g.
//!   `CHATLINE_LIMITS__MAX_CONNECTIONS=500`)

use anyhow::{Context, Result};
use chatline_core::{CallPolicy, HubConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_VAR: &str = "CHATLINE_CONFIG";

const DEFAULT_PATHS: [&str; 3] = [
    "chatline.toml",
    "/etc/chatline/chatline.toml",
    "~/.config/chatline/chatline.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Call signaling configuration.
    #[serde(default)]
    pub calls: CallsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Expose `POST /internal/chats/:chat_id/messages` for the storage side
    /// to fan persisted messages out to a room.
    #[serde(default = "default_true")]
    pub internal_api: bool,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of open connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum rooms a connection may join.
    #[serde(default = "default_max_rooms")]
    pub max_rooms_per_connection: usize,

    /// Maximum inbound frame size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Ping interval advertised to clients, in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// Close connections silent for this long, in milliseconds.
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_ms: u64,
}

/// Call signaling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallsConfig {
    /// End unanswered calls after this many milliseconds. 0 disables.
    #[serde(default = "default_ring_timeout")]
    pub ring_timeout_ms: u64,

    /// How often unanswered calls are checked, in milliseconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,

    /// Tell the caller when the callee is not online.
    #[serde(default)]
    pub notify_unreachable: bool,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_connections() -> usize {
    10_000
}

fn default_max_rooms() -> usize {
    100
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_heartbeat_interval() -> u64 {
    25_000
}

fn default_heartbeat_timeout() -> u64 {
    60_000
}

fn default_ring_timeout() -> u64 {
    30_000
}

fn default_sweep_interval() -> u64 {
    1_000
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            calls: CallsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
            internal_api: true,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_rooms_per_connection: default_max_rooms(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
            timeout_ms: default_heartbeat_timeout(),
        }
    }
}

impl Default for CallsConfig {
    fn default() -> Self {
        Self {
            ring_timeout_ms: default_ring_timeout(),
            sweep_interval_ms: default_sweep_interval(),
            notify_unreachable: false,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from the first config file found, with
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// environment override has the wrong type.
    pub fn load() -> Result<Self> {
        let path = match std::env::var(CONFIG_PATH_VAR) {
            Ok(explicit) => {
                let expanded = shellexpand::tilde(&explicit).into_owned();
                if !Path::new(&expanded).exists() {
                    anyhow::bail!("Config file not found: {expanded}");
                }
                Some(expanded)
            }
            Err(_) => DEFAULT_PATHS
                .iter()
                .map(|p| shellexpand::tilde(p).into_owned())
                .find(|p| Path::new(p).exists()),
        };

        Self::layered(path.as_deref())
    }

    /// Load configuration from a specific file, with environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        Self::layered(Some(&path.to_string_lossy()))
            .with_context(|| format!("Failed to load config file: {}", path.display()))
    }

    fn layered(path: Option<&str>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::new(path, ::config::FileFormat::Toml));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix("CHATLINE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;
        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Idle time after which a silent connection is closed.
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat.timeout_ms)
    }

    /// How often the call sweeper runs.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.calls.sweep_interval_ms.max(1))
    }

    /// Coordination settings for the hub.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        let ring_timeout = (self.calls.ring_timeout_ms > 0)
            .then(|| Duration::from_millis(self.calls.ring_timeout_ms));
        HubConfig {
            max_rooms_per_connection: self.limits.max_rooms_per_connection,
            calls: CallPolicy {
                ring_timeout,
                notify_unreachable: self.calls.notify_unreachable,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 5000);
        assert_eq!(config.transport.websocket_path, "/ws");
        assert!(config.transport.internal_api);
        assert!(!config.calls.notify_unreachable);
        assert_eq!(config.idle_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config::default();
        assert_eq!(config.bind_addr().unwrap().port(), 5000);

        let bad = Config {
            host: "not a host".into(),
            ..Config::default()
        };
        assert!(bad.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [limits]
            max_connections = 500

            [calls]
            ring_timeout_ms = 0
            notify_unreachable = true
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.limits.max_connections, 500);
        // Unset keys keep their defaults
        assert_eq!(config.limits.max_rooms_per_connection, 100);

        let hub = config.hub_config();
        assert_eq!(hub.calls.ring_timeout, None);
        assert!(hub.calls.notify_unreachable);
    }

    #[test]
    fn test_config_from_file() {
        let path = std::env::temp_dir().join(format!("chatline-test-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "port = 7001\n[heartbeat]\ntimeout_ms = 5000").unwrap();

        let config = Config::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.port, 7001);
        assert_eq!(config.idle_timeout(), Duration::from_secs(5));
        assert_eq!(config.heartbeat.interval_ms, 25_000);
    }

    #[test]
    fn test_ring_timeout_mapping() {
        let config = Config::default();
        assert_eq!(
            config.hub_config().calls.ring_timeout,
            Some(Duration::from_secs(30))
        );
    }
}
