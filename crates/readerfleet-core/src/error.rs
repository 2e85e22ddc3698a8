//! Error type shared across the readerfleet crates.
//!
//! Each crate keeps its own error enum and folds into [`Error`] at its public
//! boundary.

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    /// Device registry or provisioning failure.
    #[error("Device error: {0}")]
    Device(String),

    /// A command could not be executed.
    #[error("Command error: {0}")]
    Command(String),

    /// Broker connection or publish failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Caller input rejected before anything was stored or sent.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<crate::storage::StorageError> for Error {
    fn from(e: crate::storage::StorageError) -> Self {
        use crate::storage::StorageError;
        match e {
            StorageError::KeyNotFound(key) => Error::NotFound(key),
            StorageError::Serialization(s) => Error::Serialization(s),
            StorageError::Configuration(s) => Error::Config(s),
            StorageError::Io(_) | StorageError::Backend(_) => Error::Storage(e.to_string()),
        }
    }
}
