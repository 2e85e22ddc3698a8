//! Publish/subscribe transport for readerfleet.
//!
//! ## Topic Format
//!
//! ```text
//! <ns>/<serial>/events                         device -> cloud telemetry
//! <ns>/<serial>/command/<channel>/response     device -> cloud command result
//! <ns>/<serial>/command/<channel>              cloud -> device command
//! ```
//!
//! where `<channel>` is `control` or `management`.
//!
//! The [`TransportBridge`] owns the single broker connection. Inbound traffic is
//! split into two bounded channels, one for telemetry and one for command
//! responses, so each consumer pulls at its own pace.

pub mod bridge;
pub mod config;
pub mod error;
pub mod message;
pub mod publisher;
pub mod topic;

pub use bridge::{ConnectionStatus, InboundStreams, TransportBridge};
pub use config::MqttConfig;
pub use error::{Result, TransportError};
pub use message::{CommandEnvelope, InboundMessage, ResponseMessage, TelemetryMessage, decode_publish};
pub use publisher::DownlinkPublisher;
pub use topic::{Channel, ParsedTopic, TopicKind};
