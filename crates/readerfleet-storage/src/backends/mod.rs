//! Storage engines, selected by name from configuration.

use std::str::FromStr;
use std::sync::Arc;

use readerfleet_core::storage::{Result, StorageBackend, StorageError};
use serde_json::Value;

#[cfg(feature = "redb")]
pub mod redb;

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "redb")]
pub use redb::{RedbBackend, RedbBackendConfig};

#[cfg(feature = "memory")]
pub use memory::{MemoryBackend, MemoryBackendConfig};

/// Engines compiled into this build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    #[cfg(feature = "redb")]
    Redb,
    #[cfg(feature = "memory")]
    Memory,
}

impl BackendKind {
    pub const ALL: &'static [BackendKind] = &[
        #[cfg(feature = "redb")]
        BackendKind::Redb,
        #[cfg(feature = "memory")]
        BackendKind::Memory,
    ];

    pub fn name(&self) -> &'static str {
        match *self {
            #[cfg(feature = "redb")]
            BackendKind::Redb => "redb",
            #[cfg(feature = "memory")]
            BackendKind::Memory => "memory",
        }
    }
}

impl FromStr for BackendKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        BackendKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| {
                StorageError::Configuration(format!(
                    "unknown storage backend '{}', expected one of: {}",
                    s,
                    available_backends().join(", ")
                ))
            })
    }
}

/// Open a backend by name with engine-specific JSON options.
///
/// ```no_run
/// use readerfleet_storage::create_backend;
/// use serde_json::json;
///
/// let backend = create_backend("redb", &json!({ "path": "./data/fleet.redb" })).unwrap();
/// assert!(backend.is_persistent());
/// ```
pub fn create_backend(name: &str, options: &Value) -> Result<Arc<dyn StorageBackend>> {
    let kind: BackendKind = name.parse()?;
    let invalid = |e: serde_json::Error| StorageError::Configuration(format!("invalid {} options: {}", name, e));

    match kind {
        #[cfg(feature = "redb")]
        BackendKind::Redb => {
            let config: RedbBackendConfig = serde_json::from_value(options.clone()).map_err(invalid)?;
            Ok(Arc::new(RedbBackend::new(config)?))
        }
        #[cfg(feature = "memory")]
        BackendKind::Memory => {
            let config: MemoryBackendConfig = serde_json::from_value(options.clone()).map_err(invalid)?;
            Ok(Arc::new(MemoryBackend::new(config)))
        }
    }
}

/// Names accepted by [`create_backend`].
pub fn available_backends() -> Vec<&'static str> {
    BackendKind::ALL.iter().map(BackendKind::name).collect()
}
