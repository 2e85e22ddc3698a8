//! Downlink seam.

use async_trait::async_trait;

use crate::error::Result;
use crate::message::CommandEnvelope;
use crate::topic::Channel;

/// Sends commands to devices.
///
/// Implemented by [`crate::TransportBridge`]; dispatchers depend on the trait
/// so they can run against an in-process fake.
#[async_trait]
pub trait DownlinkPublisher: Send + Sync {
    /// Publish `message` to `<ns>/<device_serial>/command/<channel>`.
    async fn publish(&self, device_serial: &str, channel: Channel, message: &CommandEnvelope) -> Result<()>;
}
