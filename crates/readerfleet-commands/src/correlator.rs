//! Command response correlation.
//!
//! Matches device responses to stored commands by `command_id` and records
//! the outcome. Duplicate responses are applied in arrival order, so the last
//! terminal response wins; there is no ordering guard between duplicates.

use std::sync::Arc;

use readerfleet_transport::ResponseMessage;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::command::{CommandId, CommandStatus};
use crate::error::CommandError;
use crate::state::{CommandStore, Transition};

/// What happened to one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrelationOutcome {
    Updated { command_id: CommandId, status: CommandStatus },
    /// Response carried no `command_id`.
    MissingCommandId,
    /// No stored command has this id.
    UnknownCommand(CommandId),
    /// The command belongs to another device.
    DeviceMismatch { command_id: CommandId, expected: String },
    /// The status would have moved the command backwards.
    Stale { command_id: CommandId, current: CommandStatus },
    Failed { command_id: CommandId, error: String },
}

/// Applies device responses to the command store.
pub struct CommandCorrelator {
    store: Arc<CommandStore>,
}

impl CommandCorrelator {
    pub fn new(store: Arc<CommandStore>) -> Self {
        Self { store }
    }

    pub async fn handle_response(&self, msg: ResponseMessage) -> CorrelationOutcome {
        let Some(command_id) = msg.command_id.clone() else {
            warn!(
                device_serial = %msg.device_serial,
                command = ?msg.command,
                "response without command_id discarded"
            );
            return CorrelationOutcome::MissingCommandId;
        };

        let command = match self.store.get(&command_id).await {
            Ok(Some(command)) => command,
            Ok(None) => {
                warn!(command_id = %command_id, device_serial = %msg.device_serial, "response for unknown command discarded");
                return CorrelationOutcome::UnknownCommand(command_id);
            }
            Err(e) => return self.failed(command_id, e),
        };

        if command.device_serial != msg.device_serial {
            warn!(
                command_id = %command_id,
                device_serial = %msg.device_serial,
                expected = %command.device_serial,
                "response from a different device discarded"
            );
            return CorrelationOutcome::DeviceMismatch {
                command_id,
                expected: command.device_serial,
            };
        }

        let status = msg
            .response
            .as_deref()
            .map(CommandStatus::from_response_token)
            .unwrap_or(CommandStatus::Error);
        let response = json!({
            "command": msg.command,
            "response": msg.response,
            "message": msg.message,
            "payload": msg.payload,
            "receivedAt": msg.received_at,
        });

        match self.store.transition(&command_id, status, Some(response)).await {
            Ok(Transition::Applied(_)) => {
                info!(
                    command_id = %command_id,
                    device_serial = %msg.device_serial,
                    status = %status,
                    "command response recorded"
                );
                CorrelationOutcome::Updated { command_id, status }
            }
            Ok(Transition::Refused { current }) => {
                debug!(command_id = %command_id, status = %status, current = %current, "stale response ignored");
                CorrelationOutcome::Stale { command_id, current }
            }
            Err(e) => self.failed(command_id, e),
        }
    }

    fn failed(&self, command_id: CommandId, e: CommandError) -> CorrelationOutcome {
        warn!(command_id = %command_id, error = %e, "failed to record command response");
        CorrelationOutcome::Failed {
            command_id,
            error: e.to_string(),
        }
    }

    /// Run until cancelled or the channel closes.
    pub async fn run(self, mut rx: mpsc::Receiver<ResponseMessage>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                msg = rx.recv() => match msg {
                    Some(msg) => {
                        self.handle_response(msg).await;
                    }
                    None => {
                        debug!("response channel closed");
                        break;
                    }
                }
            }
        }
        info!("command correlator stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, CommandPayload, CommandType};
    use chrono::Utc;
    use readerfleet_storage::MemoryBackend;
    use readerfleet_transport::Channel;

    fn response(serial: &str, command_id: Option<&str>, token: &str) -> ResponseMessage {
        ResponseMessage {
            device_serial: serial.to_string(),
            channel: Channel::Control,
            command: Some("stop".into()),
            command_id: command_id.map(str::to_string),
            response: Some(token.to_string()),
            message: None,
            payload: serde_json::Value::Null,
            received_at: Utc::now(),
        }
    }

    async fn setup() -> (CommandCorrelator, Arc<CommandStore>, Command) {
        let store = Arc::new(CommandStore::new(Arc::new(MemoryBackend::default())));
        let command = Command::new("R-1", CommandType::Control, CommandPayload::Stop);
        store.create(&command).await.unwrap();
        (CommandCorrelator::new(Arc::clone(&store)), store, command)
    }

    #[tokio::test]
    async fn test_success_response() {
        let (correlator, store, command) = setup().await;
        let outcome = correlator
            .handle_response(response("R-1", Some(&command.command_id), "success"))
            .await;

        assert_eq!(
            outcome,
            CorrelationOutcome::Updated {
                command_id: command.command_id.clone(),
                status: CommandStatus::Success
            }
        );
        let stored = store.require(&command.command_id).await.unwrap();
        assert_eq!(stored.status, CommandStatus::Success);
        assert!(stored.executed_at.is_some());
        assert_eq!(stored.response.unwrap()["response"], "success");
    }

    #[tokio::test]
    async fn test_duplicate_terminal_last_write_wins() {
        let (correlator, store, command) = setup().await;
        let id = command.command_id.as_str();

        correlator.handle_response(response("R-1", Some(id), "success")).await;
        correlator.handle_response(response("R-1", Some(id), "error")).await;
        assert_eq!(store.status_of(&id.to_string()).await.unwrap(), CommandStatus::Error);
    }

    #[tokio::test]
    async fn test_late_processing_ack_is_stale() {
        let (correlator, store, command) = setup().await;
        let id = command.command_id.as_str();

        correlator.handle_response(response("R-1", Some(id), "success")).await;
        let outcome = correlator.handle_response(response("R-1", Some(id), "accepted")).await;
        assert!(matches!(outcome, CorrelationOutcome::Stale { current: CommandStatus::Success, .. }));
        assert_eq!(store.status_of(&id.to_string()).await.unwrap(), CommandStatus::Success);
    }

    #[tokio::test]
    async fn test_missing_and_unknown_ids_are_discarded() {
        let (correlator, store, command) = setup().await;

        assert_eq!(
            correlator.handle_response(response("R-1", None, "success")).await,
            CorrelationOutcome::MissingCommandId
        );
        assert!(matches!(
            correlator.handle_response(response("R-1", Some("nope"), "success")).await,
            CorrelationOutcome::UnknownCommand(_)
        ));
        assert_eq!(store.status_of(&command.command_id).await.unwrap(), CommandStatus::Pending);
    }

    #[tokio::test]
    async fn test_response_from_other_device_is_discarded() {
        let (correlator, store, command) = setup().await;
        let outcome = correlator
            .handle_response(response("R-2", Some(&command.command_id), "success"))
            .await;
        assert!(matches!(outcome, CorrelationOutcome::DeviceMismatch { .. }));
        assert_eq!(store.status_of(&command.command_id).await.unwrap(), CommandStatus::Pending);
    }

    #[tokio::test]
    async fn test_run_drains_channel() {
        let (correlator, store, command) = setup().await;
        let (tx, rx) = mpsc::channel(4);
        tx.send(response("R-1", Some(&command.command_id), "success")).await.unwrap();
        drop(tx);

        correlator.run(rx, CancellationToken::new()).await;
        assert_eq!(store.status_of(&command.command_id).await.unwrap(), CommandStatus::Success);
    }
}
