//! Shared demo setup: logging and broker settings from the environment.

#![allow(dead_code)]

use pubsub_rpc::RpcConfig;
use tracing_subscriber::EnvFilter;

pub const REQUEST_TOPIC: &str = "/local/request";
pub const REPLY_TOPIC: &str = "/local/reply";

pub fn init_tracing() {
    // ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_ansi(false)
        .with_line_number(true)
        .init();
}

/// Broker config from `BROKER_HOST`, `BROKER_PORT`, `BROKER_USER` and
/// `BROKER_PASSWORD` (defaults: `localhost`, `1883`, anonymous).
pub fn broker_config(client_id: &str) -> RpcConfig {
    // ---
    let host = std::env::var("BROKER_HOST").unwrap_or_else(|_| "localhost".to_string());
    let port = std::env::var("BROKER_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(1883);
    let user = std::env::var("BROKER_USER").unwrap_or_default();

    let mut config = RpcConfig::new(host, port, user, REQUEST_TOPIC, REPLY_TOPIC)
        .with_client_id(client_id)
        .with_transport_type("rumqttc");

    if let Ok(password) = std::env::var("BROKER_PASSWORD") {
        config = config.with_password(password);
    }
    config
}
