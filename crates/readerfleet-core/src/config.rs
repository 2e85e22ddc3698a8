//! Shared configuration defaults.
//!
//! Every crate's config struct takes its serde defaults from here, so a
//! missing TOML field and an unset environment variable resolve to the same
//! value everywhere.

/// Default values for the pipeline.
pub mod defaults {
    /// Topic namespace prefix (`<namespace>/<serial>/...`).
    pub const NAMESPACE: &str = "readers";
    /// Broker host.
    pub const MQTT_HOST: &str = "localhost";
    /// Broker port.
    pub const MQTT_PORT: u16 = 1883;
    /// Broker keep-alive in seconds.
    pub const MQTT_KEEP_ALIVE_SECS: u64 = 30;
    /// Capacity of the rumqttc request channel.
    pub const MQTT_REQUEST_CAPACITY: usize = 100;
    /// First reconnect delay in milliseconds.
    pub const RECONNECT_INITIAL_DELAY_MS: u64 = 500;
    /// Upper bound for the reconnect delay in milliseconds.
    pub const RECONNECT_MAX_DELAY_MS: u64 = 30_000;
    /// Capacity of each inbound channel between the bridge and its consumers.
    pub const INBOUND_CHANNEL_CAPACITY: usize = 1024;

    /// Telemetry events per flush.
    pub const BATCH_SIZE: usize = 10;
    /// Telemetry flush interval in milliseconds.
    pub const BATCH_INTERVAL_MS: u64 = 5_000;

    /// Scheduler poll interval in milliseconds.
    pub const SCHEDULER_POLL_INTERVAL_MS: u64 = 5_000;

    /// Reachability evaluation interval in seconds.
    pub const REACHABILITY_INTERVAL_SECS: u64 = 60;
    /// Per-device communication timeout in seconds.
    pub const COMMUNICATION_TIMEOUT_SECS: u64 = 300;

    /// Timed-out sweep interval in seconds.
    pub const SWEEP_INTERVAL_SECS: u64 = 60;

    /// Default redb file.
    pub const STORAGE_PATH: &str = "./data/readerfleet.redb";
}

/// Environment variable names.
pub mod env_vars {
    /// `mqtt://host[:port]`; the host and port variables take precedence.
    pub const MQTT_URL: &str = "READERFLEET_MQTT_URL";
    pub const MQTT_HOST: &str = "READERFLEET_MQTT_HOST";
    pub const MQTT_PORT: &str = "READERFLEET_MQTT_PORT";
    pub const NAMESPACE: &str = "READERFLEET_NAMESPACE";
    pub const STORAGE_PATH: &str = "READERFLEET_STORAGE_PATH";
    pub const BATCH_SIZE: &str = "READERFLEET_BATCH_SIZE";
    pub const LOG_JSON: &str = "READERFLEET_LOG_JSON";

    /// Read an environment variable and parse it, ignoring unparsable values.
    pub fn parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
        std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        assert!(defaults::BATCH_SIZE > 0);
        assert!(defaults::RECONNECT_INITIAL_DELAY_MS < defaults::RECONNECT_MAX_DELAY_MS);
        assert_eq!(defaults::COMMUNICATION_TIMEOUT_SECS, 300);
    }

    #[test]
    fn test_parsed_missing_var() {
        let value: Option<u16> = env_vars::parsed("READERFLEET_TEST_UNSET_VARIABLE");
        assert!(value.is_none());
    }
}
