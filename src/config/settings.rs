use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuthConfig {
    /// Shared API key. Unset means dev mode: any key is accepted.
    pub api_key: Option<String>,
    #[serde(default = "default_auth_timeout")]
    pub auth_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_max_connections_per_session")]
    pub max_connections_per_session: usize,
    /// Inbound messages allowed per connection per rate-limit window.
    #[serde(default = "default_message_rate_limit")]
    pub message_rate_limit: u32,
    #[serde(default = "default_rate_limit_window")]
    pub rate_limit_window_secs: u64,
    /// Violations within one window before the connection is force-closed.
    #[serde(default = "default_violation_threshold")]
    pub rate_limit_violation_threshold: u32,
    #[serde(default = "default_max_queued_messages")]
    pub max_queued_messages: usize,
    #[serde(default = "default_message_queue_ttl")]
    pub message_queue_ttl_secs: u64,
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    /// Disconnect a connection after this long without inbound activity.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Remove a connection-free session after this long without activity,
    /// once its backlog has drained or expired.
    #[serde(default = "default_session_idle_ttl")]
    pub session_idle_ttl_secs: u64,
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpstreamConfig {
    /// NDJSON stream of chat token fragments.
    pub chat_url: Option<String>,
    /// NDJSON stream of tool progress updates.
    pub tool_url: Option<String>,
    /// Cost tracking snapshot endpoint, polled.
    pub cost_url: Option<String>,
    #[serde(default = "default_cost_poll_interval")]
    pub cost_poll_interval_secs: u64,
    #[serde(default = "default_health_poll_interval")]
    pub health_poll_interval_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_auth_timeout() -> u64 {
    10
}

fn default_max_connections_per_session() -> usize {
    5
}

fn default_message_rate_limit() -> u32 {
    100
}

fn default_rate_limit_window() -> u64 {
    60
}

fn default_violation_threshold() -> u32 {
    10
}

fn default_max_queued_messages() -> usize {
    1000
}

fn default_message_queue_ttl() -> u64 {
    3600 // 1 hour
}

fn default_ping_interval() -> u64 {
    30
}

fn default_connection_timeout() -> u64 {
    300 // 5 minutes
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_session_idle_ttl() -> u64 {
    3600
}

fn default_outbound_queue_capacity() -> usize {
    256
}

fn default_cost_poll_interval() -> u64 {
    60
}

fn default_health_poll_interval() -> u64 {
    30
}

fn default_request_timeout() -> u64 {
    30
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8000)?
            .set_default("auth.auth_timeout_secs", 10)?
            .set_default("gateway.max_connections_per_session", 5)?
            .set_default("gateway.message_rate_limit", 100)?
            .set_default("gateway.rate_limit_window_secs", 60)?
            .set_default("gateway.rate_limit_violation_threshold", 10)?
            .set_default("gateway.max_queued_messages", 1000)?
            .set_default("gateway.message_queue_ttl_secs", 3600)?
            .set_default("gateway.ping_interval_secs", 30)?
            .set_default("gateway.connection_timeout_secs", 300)?
            .set_default("gateway.sweep_interval_secs", 60)?
            .set_default("gateway.session_idle_ttl_secs", 3600)?
            .set_default("gateway.outbound_queue_capacity", 256)?
            .set_default("upstream.cost_poll_interval_secs", 60)?
            .set_default("upstream.health_poll_interval_secs", 30)?
            .set_default("upstream.request_timeout_secs", 30)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // SERVER_HOST, AUTH_API_KEY, GATEWAY_MESSAGE_RATE_LIMIT, etc.
            .add_source(
                Environment::default()
                    .separator("_")
                    .try_parsing(true)
                    .list_separator(","),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl GatewayConfig {
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn message_queue_ttl(&self) -> Duration {
        Duration::from_secs(self.message_queue_ttl_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn session_idle_ttl(&self) -> Duration {
        Duration::from_secs(self.session_idle_ttl_secs)
    }
}

impl UpstreamConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_connections_per_session: default_max_connections_per_session(),
            message_rate_limit: default_message_rate_limit(),
            rate_limit_window_secs: default_rate_limit_window(),
            rate_limit_violation_threshold: default_violation_threshold(),
            max_queued_messages: default_max_queued_messages(),
            message_queue_ttl_secs: default_message_queue_ttl(),
            ping_interval_secs: default_ping_interval(),
            connection_timeout_secs: default_connection_timeout(),
            sweep_interval_secs: default_sweep_interval(),
            session_idle_ttl_secs: default_session_idle_ttl(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let gateway = GatewayConfig::default();
        assert_eq!(gateway.max_connections_per_session, 5);
        assert_eq!(gateway.message_rate_limit, 100);
        assert_eq!(gateway.rate_limit_window_secs, 60);
        assert_eq!(gateway.max_queued_messages, 1000);
        assert_eq!(gateway.message_queue_ttl_secs, 3600);
        assert_eq!(gateway.ping_interval_secs, 30);
        assert_eq!(gateway.connection_timeout_secs, 300);

        let server = ServerConfig::default();
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.port, 8000);
    }

    #[test]
    fn test_auth_defaults_to_dev_mode() {
        let auth = AuthConfig::default();
        assert!(auth.api_key.is_none());
    }

    #[test]
    fn test_duration_helpers() {
        let gateway = GatewayConfig::default();
        assert_eq!(gateway.rate_limit_window(), Duration::from_secs(60));
        assert_eq!(gateway.connection_timeout(), Duration::from_secs(300));
    }
}
