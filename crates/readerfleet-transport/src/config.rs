//! Broker connection settings.

use std::time::Duration;

use readerfleet_core::config::defaults;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TransportError};

/// Configuration for the MQTT bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker host.
    #[serde(default = "default_host")]
    pub host: String,

    /// Broker port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Client identifier presented to the broker.
    #[serde(default = "default_client_id")]
    pub client_id: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    /// First topic segment for every device topic.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Capacity of the outgoing request queue inside the client.
    #[serde(default = "default_request_capacity")]
    pub request_capacity: usize,

    /// Capacity of each inbound channel (telemetry, responses).
    #[serde(default = "default_inbound_capacity")]
    pub inbound_capacity: usize,

    #[serde(default = "default_reconnect_initial_delay_ms")]
    pub reconnect_initial_delay_ms: u64,

    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
}

fn default_host() -> String {
    defaults::MQTT_HOST.to_string()
}

fn default_port() -> u16 {
    defaults::MQTT_PORT
}

fn default_client_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("readerfleet-{}", &id[..8])
}

fn default_namespace() -> String {
    defaults::NAMESPACE.to_string()
}

fn default_keep_alive_secs() -> u64 {
    defaults::MQTT_KEEP_ALIVE_SECS
}

fn default_request_capacity() -> usize {
    defaults::MQTT_REQUEST_CAPACITY
}

fn default_inbound_capacity() -> usize {
    defaults::INBOUND_CHANNEL_CAPACITY
}

fn default_reconnect_initial_delay_ms() -> u64 {
    defaults::RECONNECT_INITIAL_DELAY_MS
}

fn default_reconnect_max_delay_ms() -> u64 {
    defaults::RECONNECT_MAX_DELAY_MS
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            client_id: default_client_id(),
            username: None,
            password: None,
            namespace: default_namespace(),
            keep_alive_secs: default_keep_alive_secs(),
            request_capacity: default_request_capacity(),
            inbound_capacity: default_inbound_capacity(),
            reconnect_initial_delay_ms: default_reconnect_initial_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
        }
    }
}

impl MqttConfig {
    /// Create a config for the given broker and namespace.
    pub fn new(host: impl Into<String>, port: u16, namespace: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Set broker credentials.
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set the client id.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Point the config at a broker URL (`mqtt://host:port`, `tcp://host:port` or `host[:port]`).
    pub fn set_broker_url(&mut self, url: &str) -> Result<()> {
        let (host, port) = parse_broker_url(url)?;
        self.host = host.to_string();
        self.port = port;
        Ok(())
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn reconnect_initial_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_delay_ms)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }

    /// Reject settings the bridge cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(TransportError::Configuration("mqtt host is empty".into()));
        }
        if self.namespace.is_empty() {
            return Err(TransportError::Configuration("namespace is empty".into()));
        }
        if self.namespace.contains(['/', '+', '#']) {
            return Err(TransportError::Configuration(format!(
                "namespace '{}' must be a single topic level without wildcards",
                self.namespace
            )));
        }
        if self.request_capacity == 0 || self.inbound_capacity == 0 {
            return Err(TransportError::Configuration(
                "channel capacities must be greater than zero".into(),
            ));
        }
        if self.reconnect_initial_delay_ms == 0 || self.reconnect_initial_delay_ms > self.reconnect_max_delay_ms {
            return Err(TransportError::Configuration(
                "reconnect delays must satisfy 0 < initial <= max".into(),
            ));
        }
        Ok(())
    }
}

/// Parse broker URL in format mqtt://host:port or tcp://host:port or host:port.
pub fn parse_broker_url(url: &str) -> Result<(&str, u16)> {
    let url = url.trim_start_matches("mqtt://");
    let url = url.trim_start_matches("tcp://");

    let parts: Vec<&str> = url.split(':').collect();
    match parts.as_slice() {
        [host] if !host.is_empty() => Ok((host, defaults::MQTT_PORT)),
        [host, port] if !host.is_empty() => {
            let port = port.parse::<u16>().map_err(|_| {
                TransportError::Configuration(format!("Invalid port in broker URL: {}", port))
            })?;
            Ok((host, port))
        }
        _ => Err(TransportError::Configuration(format!(
            "Invalid broker URL format: {}",
            url
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MqttConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 1883);
        assert_eq!(config.namespace, "readers");
        assert!(config.client_id.starts_with("readerfleet-"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: MqttConfig = serde_json::from_str(r#"{"host": "broker", "namespace": "fleet"}"#).unwrap();
        assert_eq!(config.host, "broker");
        assert_eq!(config.port, 1883);
        assert_eq!(config.namespace, "fleet");
        assert_eq!(config.inbound_capacity, defaults::INBOUND_CHANNEL_CAPACITY);
    }

    #[test]
    fn test_validate_rejects_bad_namespace() {
        let mut config = MqttConfig::default();
        config.namespace = String::new();
        assert!(config.validate().is_err());

        config.namespace = "a/b".into();
        assert!(config.validate().is_err());

        config.namespace = "fleet+".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_backoff() {
        let mut config = MqttConfig::default();
        config.reconnect_initial_delay_ms = 10_000;
        config.reconnect_max_delay_ms = 1_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_broker_url_with_port() {
        let (host, port) = parse_broker_url("mqtt://localhost:1883").unwrap();
        assert_eq!(host, "localhost");
        assert_eq!(port, 1883);
    }

    #[test]
    fn test_parse_broker_url_default_port() {
        let (host, port) = parse_broker_url("tcp://broker.local").unwrap();
        assert_eq!(host, "broker.local");
        assert_eq!(port, 1883);
    }

    #[test]
    fn test_parse_broker_url_invalid() {
        assert!(parse_broker_url("broker:notaport").is_err());
        assert!(parse_broker_url("a:1:2").is_err());
        assert!(parse_broker_url("mqtt://").is_err());
    }

    #[test]
    fn test_set_broker_url() {
        let mut config = MqttConfig::default();
        config.set_broker_url("mqtt://emqx.example.com:8883").unwrap();
        assert_eq!(config.host, "emqx.example.com");
        assert_eq!(config.port, 8883);
    }
}
