//! Keyed document storage.
//!
//! Every record lives under a `(table, key)` pair as opaque bytes; the domain
//! crates store JSON documents there. Tables used by readerfleet:
//! `devices`, `device_groups`, `telemetry` and `commands`.

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored document could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Unknown backend or invalid backend options.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Failure reported by the storage engine itself.
    #[error("Backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

/// Callback for [`StorageBackend::update`].
///
/// Gets the current value, if any. `Ok(Some(bytes))` replaces it, `Ok(None)`
/// leaves the record as it is, and `Err` aborts without writing.
pub type UpdateFn<'a> = dyn FnMut(Option<&[u8]>) -> Result<Option<Vec<u8>>> + 'a;

/// Storage engine used by the registry, telemetry and command stores.
pub trait StorageBackend: Send + Sync {
    fn write(&self, table: &str, key: &str, value: &[u8]) -> Result<()>;

    fn read(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// Returns whether the key existed.
    fn delete(&self, table: &str, key: &str) -> Result<bool>;

    /// All `(key, value)` pairs whose key starts with `prefix`, in key order.
    fn scan(&self, table: &str, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Write several records in one transaction.
    fn write_batch(&self, table: &str, items: Vec<(String, Vec<u8>)>) -> Result<()>;

    /// Atomic read-modify-write of one key.
    ///
    /// No other write to the same backend interleaves between the read and
    /// the write, which makes this the compare-and-set primitive for command
    /// claims and guarded status changes. Returns `true` when a value was
    /// stored.
    fn update(&self, table: &str, key: &str, f: &mut UpdateFn<'_>) -> Result<bool>;

    /// Whether data survives a restart.
    fn is_persistent(&self) -> bool;
}
