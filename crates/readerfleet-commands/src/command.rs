//! Command data structures.
//!
//! Defines the core types for reader command management.

use chrono::{DateTime, Utc};
use readerfleet_transport::{Channel, CommandEnvelope};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::error::{CommandError, Result};

/// Unique command identifier.
pub type CommandId = String;

/// Identifier shared by every member command of one group dispatch.
pub type GroupCommandId = String;

/// Device channel a command travels on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CommandType {
    Control,
    Management,
}

impl CommandType {
    pub fn channel(&self) -> Channel {
        match self {
            CommandType::Control => Channel::Control,
            CommandType::Management => Channel::Management,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.channel().as_str()
    }
}

impl std::fmt::Display for CommandType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Command priority levels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum CommandPriority {
    Low = 1,
    #[default]
    Medium = 2,
    High = 3,
}

impl CommandPriority {
    /// Get the priority value.
    pub fn value(&self) -> u8 {
        *self as u8
    }

    /// Get priority from integer value.
    pub fn from_value(value: u8) -> Option<Self> {
        match value {
            1 => Some(CommandPriority::Low),
            2 => Some(CommandPriority::Medium),
            3 => Some(CommandPriority::High),
            _ => None,
        }
    }

    /// Get the priority type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            CommandPriority::Low => "low",
            CommandPriority::Medium => "medium",
            CommandPriority::High => "high",
        }
    }
}

impl std::fmt::Display for CommandPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.type_name())
    }
}

impl std::str::FromStr for CommandPriority {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(CommandPriority::Low),
            "medium" => Ok(CommandPriority::Medium),
            "high" => Ok(CommandPriority::High),
            other => Err(CommandError::Validation(format!("unknown priority '{}'", other))),
        }
    }
}

/// Command lifecycle.
///
/// `pending -> processing -> {success | error | timed-out}`. Status never
/// moves backwards; a terminal status may be overwritten by another terminal
/// status (duplicate device responses, last write wins).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum CommandStatus {
    Pending,
    Processing,
    Success,
    Error,
    TimedOut,
}

impl CommandStatus {
    pub const ALL: [CommandStatus; 5] = [
        CommandStatus::Pending,
        CommandStatus::Processing,
        CommandStatus::Success,
        CommandStatus::Error,
        CommandStatus::TimedOut,
    ];

    /// Check if command is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CommandStatus::Success | CommandStatus::Error | CommandStatus::TimedOut
        )
    }

    fn stage(&self) -> u8 {
        match self {
            CommandStatus::Pending => 0,
            CommandStatus::Processing => 1,
            _ => 2,
        }
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    pub fn can_transition_to(&self, next: CommandStatus) -> bool {
        next.stage() > self.stage() || (self.is_terminal() && next.is_terminal())
    }

    /// Map a device response token to a status.
    ///
    /// Unrecognized tokens count as errors.
    pub fn from_response_token(token: &str) -> Self {
        match token.trim().to_ascii_lowercase().as_str() {
            "success" | "ok" | "done" => CommandStatus::Success,
            "processing" | "accepted" | "in_progress" => CommandStatus::Processing,
            "timed-out" | "timeout" => CommandStatus::TimedOut,
            _ => CommandStatus::Error,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            CommandStatus::Pending => "pending",
            CommandStatus::Processing => "processing",
            CommandStatus::Success => "success",
            CommandStatus::Error => "error",
            CommandStatus::TimedOut => "timed-out",
        }
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Parameters of `start`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartParams {
    /// Antenna ports to enable; all when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub antennas: Option<Vec<u16>>,
    /// Stop automatically after this many seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u64>,
}

/// Parameters of `mode`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeParams {
    pub mode: String,
}

/// Parameters of `reboot`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RebootParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_secs: Option<u64>,
}

/// Parameters of `upgrade`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradeParams {
    pub firmware_url: String,
    pub version: String,
}

/// Command payload keyed by command name.
///
/// Serialized as `{"command": <name>, "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPayload", into = "RawPayload")]
pub enum CommandPayload {
    Start(StartParams),
    Stop,
    Mode(ModeParams),
    Reboot(RebootParams),
    Upgrade(UpgradeParams),
    /// Firmware command without a typed schema.
    Custom { name: String, params: Value },
}

#[derive(Serialize, Deserialize)]
struct RawPayload {
    command: String,
    #[serde(default)]
    payload: Value,
}

impl CommandPayload {
    /// Build a payload from its wire parts.
    pub fn from_parts(name: &str, payload: Value) -> Result<Self> {
        let params = if payload.is_null() { json!({}) } else { payload };
        let invalid = |e: serde_json::Error| {
            CommandError::Validation(format!("invalid payload for '{}': {}", name, e))
        };

        Ok(match name {
            "start" => CommandPayload::Start(serde_json::from_value(params).map_err(invalid)?),
            "stop" => CommandPayload::Stop,
            "mode" => CommandPayload::Mode(serde_json::from_value(params).map_err(invalid)?),
            "reboot" => CommandPayload::Reboot(serde_json::from_value(params).map_err(invalid)?),
            "upgrade" => CommandPayload::Upgrade(serde_json::from_value(params).map_err(invalid)?),
            "" => return Err(CommandError::Validation("command name is empty".into())),
            other => CommandPayload::Custom {
                name: other.to_string(),
                params,
            },
        })
    }

    /// Command name as sent to the device.
    pub fn name(&self) -> &str {
        match self {
            CommandPayload::Start(_) => "start",
            CommandPayload::Stop => "stop",
            CommandPayload::Mode(_) => "mode",
            CommandPayload::Reboot(_) => "reboot",
            CommandPayload::Upgrade(_) => "upgrade",
            CommandPayload::Custom { name, .. } => name,
        }
    }

    /// Parameters as sent to the device.
    pub fn params(&self) -> Value {
        let value = match self {
            CommandPayload::Start(p) => serde_json::to_value(p),
            CommandPayload::Stop => Ok(json!({})),
            CommandPayload::Mode(p) => serde_json::to_value(p),
            CommandPayload::Reboot(p) => serde_json::to_value(p),
            CommandPayload::Upgrade(p) => serde_json::to_value(p),
            CommandPayload::Custom { params, .. } => Ok(params.clone()),
        };
        // Plain structs of strings and integers always serialize.
        value.unwrap_or_else(|_| json!({}))
    }
}

impl TryFrom<RawPayload> for CommandPayload {
    type Error = CommandError;

    fn try_from(raw: RawPayload) -> Result<Self> {
        CommandPayload::from_parts(&raw.command, raw.payload)
    }
}

impl From<CommandPayload> for RawPayload {
    fn from(payload: CommandPayload) -> Self {
        RawPayload {
            command: payload.name().to_string(),
            payload: payload.params(),
        }
    }
}

/// A command addressed to one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub command_id: CommandId,
    #[serde(rename = "type")]
    pub command_type: CommandType,
    pub device_serial: String,
    pub payload: CommandPayload,
    pub status: CommandStatus,
    pub priority: CommandPriority,
    /// Due time for scheduled commands; `None` for immediate dispatch.
    #[serde(default)]
    pub execute_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub executed_at: Option<DateTime<Utc>>,
    /// Last device response or failure detail.
    #[serde(default)]
    pub response: Option<Value>,
    #[serde(default)]
    pub group_command_id: Option<GroupCommandId>,
    /// Group the command was fanned out to.
    #[serde(default)]
    pub group_id: Option<String>,
}

impl Command {
    /// Create a new pending command.
    pub fn new(device_serial: impl Into<String>, command_type: CommandType, payload: CommandPayload) -> Self {
        Self {
            command_id: Uuid::new_v4().to_string(),
            command_type,
            device_serial: device_serial.into(),
            payload,
            status: CommandStatus::Pending,
            priority: CommandPriority::default(),
            execute_at: None,
            created_at: Utc::now(),
            executed_at: None,
            response: None,
            group_command_id: None,
            group_id: None,
        }
    }

    /// Set command priority.
    pub fn with_priority(mut self, priority: CommandPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set scheduled execution time.
    pub fn with_execute_at(mut self, execute_at: DateTime<Utc>) -> Self {
        self.execute_at = Some(execute_at);
        self
    }

    /// Mark as a member of a group dispatch.
    pub fn with_group(mut self, group_id: impl Into<String>, group_command_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self.group_command_id = Some(group_command_id.into());
        self
    }

    pub fn name(&self) -> &str {
        self.payload.name()
    }

    /// Scheduled and due at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == CommandStatus::Pending && self.execute_at.is_some_and(|at| at <= now)
    }

    /// Time the command's deadline is measured from.
    pub fn reference_time(&self) -> DateTime<Utc> {
        self.execute_at.unwrap_or(self.created_at)
    }

    /// Wire body for the device.
    pub fn envelope(&self) -> CommandEnvelope {
        CommandEnvelope {
            command: self.payload.name().to_string(),
            command_id: self.command_id.clone(),
            group_command_id: self.group_command_id.clone(),
            payload: self.payload.params(),
        }
    }
}
