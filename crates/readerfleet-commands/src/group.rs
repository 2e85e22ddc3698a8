//! Group command fan-out.
//!
//! A group dispatch resolves the group's membership once, stores one member
//! command per device under a shared `group_command_id`, then publishes every
//! member concurrently. A failed publish marks that member `error` and is
//! counted; it never aborts the rest of the fan-out.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use readerfleet_devices::{DeviceDirectory, DeviceError};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::command::{Command, CommandId, CommandPayload, CommandPriority, CommandStatus, CommandType, GroupCommandId};
use crate::dispatcher::{CommandDispatcher, validate_serial};
use crate::error::{CommandError, Result};
use crate::state::CommandStore;

/// Publish outcome for one member device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDispatchResult {
    pub device_serial: String,
    pub command_id: CommandId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary of one group dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupDispatchResult {
    pub group_command_id: GroupCommandId,
    pub total_devices: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub per_device_results: Vec<DeviceDispatchResult>,
}

/// Member command counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub pending: usize,
    pub processing: usize,
    pub success: usize,
    pub error: usize,
    pub timed_out: usize,
}

impl StatusCounts {
    pub fn add(&mut self, status: CommandStatus) {
        match status {
            CommandStatus::Pending => self.pending += 1,
            CommandStatus::Processing => self.processing += 1,
            CommandStatus::Success => self.success += 1,
            CommandStatus::Error => self.error += 1,
            CommandStatus::TimedOut => self.timed_out += 1,
        }
    }

    pub fn get(&self, status: CommandStatus) -> usize {
        match status {
            CommandStatus::Pending => self.pending,
            CommandStatus::Processing => self.processing,
            CommandStatus::Success => self.success,
            CommandStatus::Error => self.error,
            CommandStatus::TimedOut => self.timed_out,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.processing + self.success + self.error + self.timed_out
    }
}

/// One row of a group's command history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupCommandSummary {
    pub group_command_id: GroupCommandId,
    pub group_id: String,
    pub command: String,
    #[serde(rename = "type")]
    pub command_type: CommandType,
    pub created_at: DateTime<Utc>,
    pub total_devices: usize,
    pub status_counts: StatusCounts,
    /// Every member reached a terminal status.
    pub complete: bool,
}

/// Filter for group command history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupCommandFilter {
    /// Command name, e.g. `stop`.
    #[serde(default)]
    pub command: Option<String>,
    /// Keep group commands with at least one member in this status.
    #[serde(default)]
    pub status: Option<CommandStatus>,
    /// Keep group commands created at or after this time.
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl GroupCommandFilter {
    fn matches(&self, summary: &GroupCommandSummary) -> bool {
        self.command.as_deref().is_none_or(|name| summary.command == name)
            && self.status.is_none_or(|status| summary.status_counts.get(status) > 0)
            && self.since.is_none_or(|since| summary.created_at >= since)
    }
}

/// Fans commands out to device groups.
pub struct GroupFanoutCoordinator {
    store: Arc<CommandStore>,
    dispatcher: Arc<CommandDispatcher>,
    directory: Arc<dyn DeviceDirectory>,
}

impl GroupFanoutCoordinator {
    pub fn new(store: Arc<CommandStore>, dispatcher: Arc<CommandDispatcher>, directory: Arc<dyn DeviceDirectory>) -> Self {
        Self {
            store,
            dispatcher,
            directory,
        }
    }

    /// Send one command to every current member of `group_id`.
    ///
    /// Unknown, inactive and empty groups are rejected before anything is
    /// stored or published.
    pub async fn send_to_group(
        &self,
        group_id: &str,
        command_type: CommandType,
        payload: CommandPayload,
        priority: Option<CommandPriority>,
    ) -> Result<GroupDispatchResult> {
        let members = match self.directory.resolve_group_members(group_id).await {
            Ok(members) => members,
            Err(e @ (DeviceError::GroupNotFound(_) | DeviceError::GroupInactive(_))) => {
                return Err(CommandError::Validation(e.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        if members.is_empty() {
            return Err(CommandError::Validation(format!("group '{}' has no devices", group_id)));
        }
        for serial in &members {
            validate_serial(serial)?;
        }

        let group_command_id = Uuid::new_v4().to_string();
        let priority = priority.unwrap_or_default();
        let commands: Vec<Command> = members
            .iter()
            .map(|serial| {
                Command::new(serial.as_str(), command_type, payload.clone())
                    .with_priority(priority)
                    .with_group(group_id, group_command_id.as_str())
            })
            .collect();
        self.store.insert_many(&commands).await?;

        let outcomes = join_all(commands.iter().map(|command| self.dispatcher.send(command))).await;

        let per_device_results: Vec<DeviceDispatchResult> = commands
            .iter()
            .zip(outcomes)
            .map(|(command, outcome)| DeviceDispatchResult {
                device_serial: command.device_serial.clone(),
                command_id: command.command_id.clone(),
                success: outcome.is_ok(),
                error: outcome.err().map(|e| e.to_string()),
            })
            .collect();
        let success_count = per_device_results.iter().filter(|r| r.success).count();
        let error_count = per_device_results.len() - success_count;

        if error_count > 0 {
            warn!(
                group_id = %group_id,
                group_command_id = %group_command_id,
                success_count,
                error_count,
                "group command partially failed"
            );
        } else {
            info!(
                group_id = %group_id,
                group_command_id = %group_command_id,
                command = %payload.name(),
                total_devices = per_device_results.len(),
                "group command dispatched"
            );
        }

        Ok(GroupDispatchResult {
            group_command_id,
            total_devices: per_device_results.len(),
            success_count,
            error_count,
            per_device_results,
        })
    }

    /// Group commands sent to `group_id`, newest first.
    pub async fn group_history(&self, group_id: &str, filter: &GroupCommandFilter) -> Result<Vec<GroupCommandSummary>> {
        let mut grouped: BTreeMap<GroupCommandId, Vec<Command>> = BTreeMap::new();
        for command in self.store.list_by_group_id(group_id).await? {
            if let Some(gcid) = command.group_command_id.clone() {
                grouped.entry(gcid).or_default().push(command);
            }
        }

        let mut summaries: Vec<GroupCommandSummary> = grouped
            .into_iter()
            .filter_map(|(gcid, members)| summarize(group_id, gcid, &members))
            .filter(|summary| filter.matches(summary))
            .collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            summaries.truncate(limit);
        }
        Ok(summaries)
    }

    /// Every member command of one group dispatch, ordered by device serial.
    pub async fn group_details(&self, group_command_id: &str) -> Result<Vec<Command>> {
        let commands = self.store.list_by_group(group_command_id).await?;
        if commands.is_empty() {
            return Err(CommandError::GroupCommandNotFound(group_command_id.to_string()));
        }
        Ok(commands)
    }
}

fn summarize(group_id: &str, group_command_id: GroupCommandId, members: &[Command]) -> Option<GroupCommandSummary> {
    let first = members.first()?;
    let mut status_counts = StatusCounts::default();
    for member in members {
        status_counts.add(member.status);
    }
    Some(GroupCommandSummary {
        group_command_id,
        group_id: group_id.to_string(),
        command: first.name().to_string(),
        command_type: first.command_type,
        created_at: members.iter().map(|m| m.created_at).min().unwrap_or(first.created_at),
        total_devices: members.len(),
        complete: members.iter().all(|m| m.status.is_terminal()),
        status_counts,
    })
}
