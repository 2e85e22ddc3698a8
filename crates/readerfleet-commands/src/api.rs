//! Command API for external integration.
//!
//! [`CommandApi`] is the surface exposed to callers (CLI, HTTP layer, other
//! services). Requests carry the command name and raw JSON parameters; the
//! facade turns them into typed payloads before anything is stored.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use readerfleet_devices::DeviceDirectory;
use readerfleet_transport::DownlinkPublisher;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::command::{Command, CommandId, CommandPayload, CommandPriority, CommandStatus, CommandType};
use crate::dispatcher::{CommandDispatcher, validate_serial};
use crate::error::{CommandError, Result};
use crate::group::{GroupCommandFilter, GroupCommandSummary, GroupDispatchResult, GroupFanoutCoordinator};
use crate::state::CommandStore;

/// API request for submitting a command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitCommandRequest {
    /// Device channel.
    #[serde(rename = "type")]
    pub command_type: CommandType,
    /// Command name, e.g. `start`.
    pub command: String,
    #[serde(default)]
    pub payload: Value,
    /// `low`, `medium` or `high`.
    #[serde(default)]
    pub priority: Option<String>,
    /// Run later through the scheduler instead of publishing now.
    #[serde(default)]
    pub execute_at: Option<DateTime<Utc>>,
}

impl SubmitCommandRequest {
    fn parts(&self) -> Result<(CommandPayload, Option<CommandPriority>)> {
        let payload = CommandPayload::from_parts(&self.command, self.payload.clone())?;
        let priority = self.priority.as_deref().map(str::parse::<CommandPriority>).transpose()?;
        Ok((payload, priority))
    }
}

/// API response for command submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitCommandResponse {
    pub command_id: CommandId,
    pub status: CommandStatus,
}

/// Command facade.
pub struct CommandApi {
    store: Arc<CommandStore>,
    dispatcher: Arc<CommandDispatcher>,
    groups: GroupFanoutCoordinator,
}

impl CommandApi {
    pub fn new(
        store: Arc<CommandStore>,
        publisher: Arc<dyn DownlinkPublisher>,
        directory: Arc<dyn DeviceDirectory>,
    ) -> Self {
        let dispatcher = Arc::new(CommandDispatcher::new(Arc::clone(&store), publisher));
        let groups = GroupFanoutCoordinator::new(Arc::clone(&store), Arc::clone(&dispatcher), directory);
        Self {
            store,
            dispatcher,
            groups,
        }
    }

    pub fn store(&self) -> &Arc<CommandStore> {
        &self.store
    }

    /// Publish a command to one device now.
    pub async fn dispatch(
        &self,
        device_serial: &str,
        command_type: CommandType,
        payload: CommandPayload,
        priority: Option<CommandPriority>,
    ) -> Result<CommandId> {
        self.dispatcher.dispatch(device_serial, command_type, payload, priority).await
    }

    /// Store a command for the scheduler to run at `execute_at`.
    pub async fn schedule(
        &self,
        device_serial: &str,
        command_type: CommandType,
        payload: CommandPayload,
        priority: Option<CommandPriority>,
        execute_at: DateTime<Utc>,
    ) -> Result<CommandId> {
        validate_serial(device_serial)?;
        let command = Command::new(device_serial, command_type, payload)
            .with_priority(priority.unwrap_or_default())
            .with_execute_at(execute_at);
        self.store.create(&command).await?;
        info!(
            command_id = %command.command_id,
            device_serial = %device_serial,
            execute_at = %execute_at,
            "command scheduled"
        );
        Ok(command.command_id)
    }

    /// Submit an untyped request for one device.
    pub async fn submit(&self, device_serial: &str, request: SubmitCommandRequest) -> Result<SubmitCommandResponse> {
        let (payload, priority) = request.parts()?;
        let command_id = match request.execute_at {
            Some(at) => self.schedule(device_serial, request.command_type, payload, priority, at).await?,
            None => self.dispatch(device_serial, request.command_type, payload, priority).await?,
        };
        let status = self.store.status_of(&command_id).await?;
        Ok(SubmitCommandResponse { command_id, status })
    }

    pub async fn send_to_group(
        &self,
        group_id: &str,
        command_type: CommandType,
        payload: CommandPayload,
        priority: Option<CommandPriority>,
    ) -> Result<GroupDispatchResult> {
        self.groups.send_to_group(group_id, command_type, payload, priority).await
    }

    /// Submit an untyped request to a group. Scheduling is not supported for groups.
    pub async fn submit_to_group(&self, group_id: &str, request: SubmitCommandRequest) -> Result<GroupDispatchResult> {
        if request.execute_at.is_some() {
            return Err(CommandError::Validation("group commands cannot be scheduled".into()));
        }
        let (payload, priority) = request.parts()?;
        self.send_to_group(group_id, request.command_type, payload, priority).await
    }

    /// Full command record.
    pub async fn get_command_status(&self, command_id: &str) -> Result<Command> {
        self.store.require(command_id).await
    }

    pub async fn list_device_commands(&self, device_serial: &str, limit: usize) -> Result<Vec<Command>> {
        self.store.list_by_device(device_serial, limit).await
    }

    pub async fn get_group_command_history(
        &self,
        group_id: &str,
        filter: &GroupCommandFilter,
    ) -> Result<Vec<GroupCommandSummary>> {
        self.groups.group_history(group_id, filter).await
    }

    pub async fn get_group_command_details(&self, group_command_id: &str) -> Result<Vec<Command>> {
        self.groups.group_details(group_command_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePublisher;
    use readerfleet_devices::{DeviceGroup, DeviceRegistry};
    use readerfleet_storage::MemoryBackend;
    use serde_json::json;

    fn api() -> (CommandApi, Arc<FakePublisher>) {
        let backend = Arc::new(MemoryBackend::default());
        let registry = Arc::new(DeviceRegistry::new(backend.clone()));
        registry
            .create_group(DeviceGroup::new("dock").with_devices(["R-1", "R-2"]))
            .unwrap();
        let publisher = Arc::new(FakePublisher::default());
        let store = Arc::new(CommandStore::new(backend));
        (CommandApi::new(store, publisher.clone(), registry), publisher)
    }

    fn request(value: Value) -> SubmitCommandRequest {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_submit_immediate() {
        let (api, publisher) = api();
        let response = api
            .submit(
                "R-1",
                request(json!({"type": "control", "command": "start", "payload": {"antennas": [1]}, "priority": "high"})),
            )
            .await
            .unwrap();

        assert_eq!(response.status, CommandStatus::Processing);
        let command = api.get_command_status(&response.command_id).await.unwrap();
        assert_eq!(command.priority, CommandPriority::High);
        assert_eq!(publisher.sent_to("R-1")[0].payload, json!({"antennas": [1]}));
    }

    #[tokio::test]
    async fn test_submit_scheduled_is_not_published() {
        let (api, publisher) = api();
        let at = Utc::now() + chrono::Duration::minutes(5);
        let response = api
            .submit(
                "R-1",
                request(json!({"type": "management", "command": "reboot", "executeAt": at})),
            )
            .await
            .unwrap();

        assert_eq!(response.status, CommandStatus::Pending);
        assert!(publisher.sent().is_empty());
        assert_eq!(api.get_command_status(&response.command_id).await.unwrap().execute_at, Some(at));
    }

    #[tokio::test]
    async fn test_submit_rejects_bad_input() {
        let (api, _) = api();
        let bad_priority = request(json!({"type": "control", "command": "stop", "priority": "urgent"}));
        assert!(matches!(api.submit("R-1", bad_priority).await, Err(CommandError::Validation(_))));

        let bad_payload = request(json!({"type": "management", "command": "upgrade", "payload": {}}));
        assert!(matches!(api.submit("R-1", bad_payload).await, Err(CommandError::Validation(_))));

        let nested_serial = request(json!({"type": "control", "command": "stop", "executeAt": Utc::now()}));
        assert!(matches!(
            api.submit("R-1/events", nested_serial).await,
            Err(CommandError::Validation(_))
        ));

        let scheduled_group = request(json!({"type": "control", "command": "stop", "executeAt": Utc::now()}));
        assert!(matches!(
            api.submit_to_group("dock", scheduled_group).await,
            Err(CommandError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_group_flow_through_registry() {
        let (api, publisher) = api();
        let result = api
            .submit_to_group("dock", request(json!({"type": "control", "command": "stop"})))
            .await
            .unwrap();
        assert_eq!(result.success_count, 2);
        assert_eq!(publisher.sent().len(), 2);

        let history = api
            .get_group_command_history("dock", &GroupCommandFilter::default())
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(api.get_group_command_details(&result.group_command_id).await.unwrap().len(), 2);
        assert_eq!(api.list_device_commands("R-2", 10).await.unwrap().len(), 1);
    }
}
