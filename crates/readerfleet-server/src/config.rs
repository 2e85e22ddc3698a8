//! Server configuration loading.
//!
//! Sources, later ones winning:
//! 1. built-in defaults (`readerfleet_core::config::defaults`)
//! 2. the TOML file, if present
//! 3. `READERFLEET_*` environment variables for a few deployment knobs

use std::path::{Path, PathBuf};
use std::sync::Arc;

use readerfleet_commands::{SchedulerConfig, SweepConfig};
use readerfleet_core::StorageBackend;
use readerfleet_core::config::{defaults, env_vars};
use readerfleet_devices::{IngestConfig, ReachabilityConfig};
use readerfleet_storage::BackendKind;
use readerfleet_transport::MqttConfig;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for readerfleet_core::Error {
    fn from(e: ConfigError) -> Self {
        readerfleet_core::Error::Config(e.to_string())
    }
}

/// Storage backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `redb` or `memory`.
    #[serde(default = "default_backend")]
    pub backend: String,

    #[serde(default = "default_storage_path")]
    pub path: String,
}

fn default_backend() -> String {
    "redb".to_string()
}

fn default_storage_path() -> String {
    defaults::STORAGE_PATH.to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_storage_path(),
        }
    }
}

impl StorageConfig {
    pub fn open(&self) -> readerfleet_core::Result<Arc<dyn StorageBackend>> {
        let options = match self.backend.as_str() {
            "redb" => json!({ "path": self.path }),
            _ => json!({}),
        };
        let backend = readerfleet_storage::create_backend(&self.backend, &options)?;
        info!(backend = %self.backend, persistent = backend.is_persistent(), "storage opened");
        Ok(backend)
    }
}

/// Full server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub reachability: ReachabilityConfig,
    #[serde(default)]
    pub commands: SweepConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl ServerConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load from `path`, environment overrides applied, validated.
    ///
    /// A missing file is not an error unless `required` is set.
    pub fn load(path: &Path, required: bool) -> Result<Self, ConfigError> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => {
                info!(path = %path.display(), "loading configuration");
                Self::from_toml(&content)?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
                info!(path = %path.display(), "no configuration file, using defaults");
                Self::default()
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from `lookup`, ignoring unparsable values.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(url) = get(env_vars::MQTT_URL) {
            if let Err(e) = self.mqtt.set_broker_url(&url) {
                warn!(url = %url, error = %e, "ignoring invalid broker URL");
            }
        }
        if let Some(host) = get(env_vars::MQTT_HOST) {
            self.mqtt.host = host;
        }
        if let Some(port) = get(env_vars::MQTT_PORT).and_then(|v| v.parse().ok()) {
            self.mqtt.port = port;
        }
        if let Some(namespace) = get(env_vars::NAMESPACE) {
            self.mqtt.namespace = namespace;
        }
        if let Some(path) = get(env_vars::STORAGE_PATH) {
            self.storage.path = path;
        }
        if let Some(size) = get(env_vars::BATCH_SIZE).and_then(|v| v.parse().ok()) {
            self.ingest.batch_size = size;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ingest.batch_size == 0 {
            return Err(ConfigError::Invalid("ingest.batch_size must be at least 1".into()));
        }
        if self.ingest.batch_interval_ms == 0 {
            return Err(ConfigError::Invalid("ingest.batch_interval_ms must be positive".into()));
        }
        if self.scheduler.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("scheduler.poll_interval_ms must be positive".into()));
        }
        if self.reachability.interval_secs == 0 {
            return Err(ConfigError::Invalid("reachability.interval_secs must be positive".into()));
        }
        if self.commands.timeout_secs == Some(0) || self.commands.interval_secs == 0 {
            return Err(ConfigError::Invalid("commands timeout and sweep interval must be positive".into()));
        }
        if self.commands.timeout_secs.is_some_and(|secs| secs > SweepConfig::MAX_TIMEOUT_SECS) {
            return Err(ConfigError::Invalid(format!(
                "commands.timeout_secs must be at most {}",
                SweepConfig::MAX_TIMEOUT_SECS
            )));
        }
        self.storage
            .backend
            .parse::<BackendKind>()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.mqtt
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}
