//! Device error types.

use readerfleet_core::StorageError;

/// Result type for device operations.
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Device error types.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// Device not found
    #[error("Device not found: {0}")]
    NotFound(String),

    /// Device group not found
    #[error("Device group not found: {0}")]
    GroupNotFound(String),

    /// Device group exists but is disabled
    #[error("Device group is inactive: {0}")]
    GroupInactive(String),

    /// Already exists error
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Invalid parameter value
    #[error("Invalid parameter value: {0}")]
    InvalidParameter(String),

    /// Certificate authority failure
    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<DeviceError> for readerfleet_core::Error {
    fn from(e: DeviceError) -> Self {
        use readerfleet_core::Error;
        match e {
            DeviceError::NotFound(_) | DeviceError::GroupNotFound(_) => Error::NotFound(e.to_string()),
            DeviceError::GroupInactive(_)
            | DeviceError::AlreadyExists(_)
            | DeviceError::InvalidParameter(_) => Error::Validation(e.to_string()),
            DeviceError::Storage(e) => e.into(),
            DeviceError::Serialization(e) => Error::Serialization(e.to_string()),
            DeviceError::Certificate(s) => Error::Device(s),
        }
    }
}
