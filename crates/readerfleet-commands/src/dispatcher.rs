//! Command dispatch.
//!
//! Persists a command, then publishes it. There is no transaction across the
//! store and the broker: a crash between the two leaves a `pending` record
//! that the timed-out sweep eventually closes.

use std::sync::Arc;

use readerfleet_devices::DeviceError;
use readerfleet_transport::DownlinkPublisher;
use serde_json::json;
use tracing::{debug, warn};

use crate::command::{Command, CommandId, CommandPayload, CommandPriority, CommandStatus, CommandType};
use crate::error::{CommandError, Result};
use crate::state::{CommandStore, Transition};

/// Reject serials that would not address a single device topic.
pub(crate) fn validate_serial(device_serial: &str) -> Result<()> {
    readerfleet_devices::validate_key("device serial", device_serial).map_err(|e| match e {
        DeviceError::InvalidParameter(msg) => CommandError::Validation(msg),
        other => other.into(),
    })
}

/// Creates, stores and publishes single-device commands.
pub struct CommandDispatcher {
    store: Arc<CommandStore>,
    publisher: Arc<dyn DownlinkPublisher>,
}

impl CommandDispatcher {
    pub fn new(store: Arc<CommandStore>, publisher: Arc<dyn DownlinkPublisher>) -> Self {
        Self { store, publisher }
    }

    pub fn store(&self) -> &Arc<CommandStore> {
        &self.store
    }

    /// Dispatch a command to one device and return its id.
    ///
    /// A publish failure is recorded on the command (`error`) rather than
    /// returned; only a storage failure makes this call fail.
    pub async fn dispatch(
        &self,
        device_serial: &str,
        command_type: CommandType,
        payload: CommandPayload,
        priority: Option<CommandPriority>,
    ) -> Result<CommandId> {
        validate_serial(device_serial)?;

        let command = Command::new(device_serial, command_type, payload)
            .with_priority(priority.unwrap_or_default());
        self.store.create(&command).await?;

        // Failure is already logged and stored on the command.
        let _ = self.send(&command).await;
        Ok(command.command_id)
    }

    /// Publish an already stored command.
    ///
    /// On success a pending command moves to `processing`; on failure the
    /// command is marked `error` and the transport error is returned.
    pub async fn send(&self, command: &Command) -> Result<()> {
        let envelope = command.envelope();
        let channel = command.command_type.channel();

        match self.publisher.publish(&command.device_serial, channel, &envelope).await {
            Ok(()) => {
                debug!(
                    command_id = %command.command_id,
                    device_serial = %command.device_serial,
                    command = %command.name(),
                    channel = %channel,
                    "command published"
                );
                match self.store.transition(&command.command_id, CommandStatus::Processing, None).await {
                    Ok(Transition::Applied(_)) => {}
                    // The device may answer before we get here.
                    Ok(Transition::Refused { current }) => debug!(
                        command_id = %command.command_id,
                        status = %current,
                        "command already past processing"
                    ),
                    Err(e) => warn!(command_id = %command.command_id, error = %e, "failed to mark command processing"),
                }
                Ok(())
            }
            Err(e) => {
                warn!(
                    command_id = %command.command_id,
                    device_serial = %command.device_serial,
                    error = %e,
                    "command publish failed"
                );
                let detail = json!({ "error": e.to_string() });
                if let Err(store_err) = self
                    .store
                    .transition(&command.command_id, CommandStatus::Error, Some(detail))
                    .await
                {
                    warn!(command_id = %command.command_id, error = %store_err, "failed to mark command error");
                }
                Err(CommandError::Transport(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePublisher;
    use readerfleet_storage::MemoryBackend;

    fn dispatcher(publisher: Arc<FakePublisher>) -> CommandDispatcher {
        let store = Arc::new(CommandStore::new(Arc::new(MemoryBackend::default())));
        CommandDispatcher::new(store, publisher)
    }

    #[tokio::test]
    async fn test_dispatch_publishes_and_marks_processing() {
        let publisher = Arc::new(FakePublisher::default());
        let dispatcher = dispatcher(publisher.clone());

        let id = dispatcher
            .dispatch("R-1", CommandType::Control, CommandPayload::Stop, None)
            .await
            .unwrap();

        let command = dispatcher.store().require(&id).await.unwrap();
        assert_eq!(command.status, CommandStatus::Processing);
        assert_eq!(command.priority, CommandPriority::Medium);

        let sent = publisher.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "R-1");
        assert_eq!(sent[0].2.command_id, id);
    }

    #[tokio::test]
    async fn test_publish_failure_marks_error() {
        let publisher = Arc::new(FakePublisher::failing_for(["R-1"]));
        let dispatcher = dispatcher(publisher);

        let id = dispatcher
            .dispatch("R-1", CommandType::Management, CommandPayload::Stop, Some(CommandPriority::High))
            .await
            .unwrap();

        let command = dispatcher.store().require(&id).await.unwrap();
        assert_eq!(command.status, CommandStatus::Error);
        assert!(command.response.unwrap()["error"].is_string());
        assert!(command.executed_at.is_some());
    }

    #[tokio::test]
    async fn test_dispatch_rejects_empty_serial() {
        let dispatcher = dispatcher(Arc::new(FakePublisher::default()));
        assert!(matches!(
            dispatcher.dispatch(" ", CommandType::Control, CommandPayload::Stop, None).await,
            Err(CommandError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_dispatch_rejects_topic_unsafe_serial() {
        let publisher = Arc::new(FakePublisher::default());
        let dispatcher = dispatcher(publisher.clone());

        for serial in ["R-1/events", "R-+", "#"] {
            assert!(matches!(
                dispatcher.dispatch(serial, CommandType::Control, CommandPayload::Stop, None).await,
                Err(CommandError::Validation(_))
            ));
        }
        assert!(publisher.sent().is_empty());
        assert_eq!(dispatcher.store().stats().await.unwrap().total, 0);
    }
}
