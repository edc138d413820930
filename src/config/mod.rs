mod settings;

pub use settings::{AuthConfig, GatewayConfig, ServerConfig, Settings, UpstreamConfig};
