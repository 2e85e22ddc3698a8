//! Command error types.

use readerfleet_core::StorageError;
use readerfleet_transport::TransportError;

/// Result type for command operations.
pub type Result<T> = std::result::Result<T, CommandError>;

/// Command error types.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Command not found: {0}")]
    NotFound(String),

    #[error("Group command not found: {0}")]
    GroupCommandNotFound(String),

    #[error("Command already exists: {0}")]
    AlreadyExists(String),

    /// Invalid device/group reference or payload, raised before any dispatch.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Device error: {0}")]
    Device(#[from] readerfleet_devices::DeviceError),
}

impl From<CommandError> for readerfleet_core::Error {
    fn from(e: CommandError) -> Self {
        use readerfleet_core::Error;
        match e {
            CommandError::NotFound(_) | CommandError::GroupCommandNotFound(_) => Error::NotFound(e.to_string()),
            CommandError::AlreadyExists(_) | CommandError::Validation(_) => Error::Validation(e.to_string()),
            CommandError::Transport(e) => e.into(),
            CommandError::Execution(s) => Error::Command(s),
            CommandError::Storage(e) => e.into(),
            CommandError::Serialization(e) => Error::Serialization(e.to_string()),
            CommandError::Device(e) => e.into(),
        }
    }
}
