//! Transport error types.

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Transport error types.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Bridge not connected")]
    NotConnected,

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Invalid topic '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: String },

    #[error("Malformed payload on '{topic}': {reason}")]
    MalformedPayload { topic: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<rumqttc::ClientError> for TransportError {
    fn from(e: rumqttc::ClientError) -> Self {
        TransportError::Publish(e.to_string())
    }
}

impl From<TransportError> for readerfleet_core::Error {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Configuration(s) => readerfleet_core::Error::Config(s),
            TransportError::Serialization(e) => readerfleet_core::Error::Serialization(e.to_string()),
            other => readerfleet_core::Error::Transport(other.to_string()),
        }
    }
}
