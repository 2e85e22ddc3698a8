//! In-process fakes for exercising the command pipeline without a broker.

use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::Mutex;
use readerfleet_transport::{Channel, CommandEnvelope, DownlinkPublisher, TransportError};

/// Records every publish; fails for a configured set of devices.
#[derive(Default)]
pub struct FakePublisher {
    sent: Mutex<Vec<(String, Channel, CommandEnvelope)>>,
    failing: HashSet<String>,
}

impl FakePublisher {
    /// Publisher that rejects every publish to the given serials.
    pub fn failing_for<I, S>(serials: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sent: Mutex::new(Vec::new()),
            failing: serials.into_iter().map(Into::into).collect(),
        }
    }

    /// Successful publishes in order.
    pub fn sent(&self) -> Vec<(String, Channel, CommandEnvelope)> {
        self.sent.lock().clone()
    }

    pub fn sent_to(&self, device_serial: &str) -> Vec<CommandEnvelope> {
        self.sent
            .lock()
            .iter()
            .filter(|(serial, _, _)| serial == device_serial)
            .map(|(_, _, envelope)| envelope.clone())
            .collect()
    }
}

#[async_trait]
impl DownlinkPublisher for FakePublisher {
    async fn publish(
        &self,
        device_serial: &str,
        channel: Channel,
        message: &CommandEnvelope,
    ) -> Result<(), TransportError> {
        if self.failing.contains(device_serial) {
            return Err(TransportError::Publish(format!("broker rejected publish to {}", device_serial)));
        }
        self.sent
            .lock()
            .push((device_serial.to_string(), channel, message.clone()));
        Ok(())
    }
}
