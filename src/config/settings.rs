use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

use crate::hub::{ConnectionLimits, HubOptions, OverflowPolicy};

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    pub jwt: JwtConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    /// Capacity of each connection's outbound queue
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
    /// `disconnect` or `drop_newest`
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_max_connections_per_user")]
    pub max_connections_per_user: usize,
    #[serde(default = "default_max_subscriptions_per_connection")]
    pub max_subscriptions_per_connection: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    /// Heartbeat interval in seconds (server sends a heartbeat frame)
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,
    /// Connection timeout in seconds (disconnect if no liveness signal)
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,
    /// Cleanup task interval in seconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8081
}

fn default_outbound_queue_capacity() -> usize {
    64
}

fn default_max_connections() -> usize {
    10_000
}

fn default_max_connections_per_user() -> usize {
    16
}

fn default_max_subscriptions_per_connection() -> usize {
    64
}

fn default_heartbeat_interval() -> u64 {
    30 // 30 seconds
}

fn default_connection_timeout() -> u64 {
    120 // 2 minutes
}

fn default_cleanup_interval() -> u64 {
    60 // 1 minute
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", i64::from(default_port()))?
            .set_default("websocket.heartbeat_interval", 30)?
            .set_default("websocket.connection_timeout", 120)?
            .set_default("websocket.cleanup_interval", 60)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // SCAN_HUB__SERVER__PORT, SCAN_HUB__JWT__SECRET, SCAN_HUB__HUB__OVERFLOW_POLICY, ...
            .add_source(
                Environment::with_prefix("SCAN_HUB")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl HubConfig {
    pub fn options(&self) -> HubOptions {
        HubOptions {
            limits: ConnectionLimits {
                max_connections: self.max_connections,
                max_connections_per_user: self.max_connections_per_user,
                max_subscriptions_per_connection: self.max_subscriptions_per_connection,
            },
            outbound_queue_capacity: self.outbound_queue_capacity,
            overflow_policy: self.overflow_policy,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: default_outbound_queue_capacity(),
            overflow_policy: OverflowPolicy::default(),
            max_connections: default_max_connections(),
            max_connections_per_user: default_max_connections_per_user(),
            max_subscriptions_per_connection: default_max_subscriptions_per_connection(),
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: default_heartbeat_interval(),
            connection_timeout: default_connection_timeout(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let server = ServerConfig::default();
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.port, 8081);

        let hub = HubConfig::default();
        assert_eq!(hub.outbound_queue_capacity, 64);
        assert_eq!(hub.overflow_policy, OverflowPolicy::Disconnect);
    }

    #[test]
    fn test_hub_options_from_config() {
        let hub = HubConfig {
            outbound_queue_capacity: 8,
            overflow_policy: OverflowPolicy::DropNewest,
            max_connections: 100,
            max_connections_per_user: 3,
            max_subscriptions_per_connection: 10,
        };

        let options = hub.options();
        assert_eq!(options.outbound_queue_capacity, 8);
        assert_eq!(options.overflow_policy, OverflowPolicy::DropNewest);
        assert_eq!(options.limits.max_connections_per_user, 3);
    }

    #[test]
    fn test_deserialize_from_sources() {
        let settings: Settings = Config::builder()
            .set_override("jwt.secret", "s3cret")
            .unwrap()
            .set_override("hub.overflow_policy", "drop_newest")
            .unwrap()
            .set_override("logging.format", "json")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.jwt.secret, "s3cret");
        assert_eq!(settings.hub.overflow_policy, OverflowPolicy::DropNewest);
        assert_eq!(settings.logging.format, LogFormat::Json);
        assert_eq!(settings.websocket.heartbeat_interval, 30);
        assert_eq!(settings.server_addr(), "0.0.0.0:8081");
    }
}
