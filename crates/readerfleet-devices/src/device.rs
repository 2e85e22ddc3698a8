//! Device and group records.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use readerfleet_core::config::defaults;
use serde::{Deserialize, Serialize};

/// Derived reachability of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CommunicationStatus {
    Online,
    Offline,
    /// Not yet evaluated.
    #[default]
    Unknown,
}

impl CommunicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommunicationStatus::Online => "online",
            CommunicationStatus::Offline => "offline",
            CommunicationStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for CommunicationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_communication_timeout() -> u64 {
    defaults::COMMUNICATION_TIMEOUT_SECS
}

/// A registered reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub device_serial: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Last inbound telemetry.
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    /// Seconds of silence before the device counts as offline.
    #[serde(default = "default_communication_timeout")]
    pub communication_timeout: u64,
    #[serde(default)]
    pub communication_status: CommunicationStatus,
    /// Active certificate issued at provisioning.
    #[serde(default)]
    pub certificate_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Device {
    pub fn new(device_serial: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            device_serial: device_serial.into(),
            name: None,
            last_seen: None,
            communication_timeout: default_communication_timeout(),
            communication_status: CommunicationStatus::Unknown,
            certificate_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_communication_timeout(mut self, secs: u64) -> Self {
        self.communication_timeout = secs;
        self
    }

    pub fn with_last_seen(mut self, at: DateTime<Utc>) -> Self {
        self.last_seen = Some(at);
        self
    }
}

/// Named set of devices that commands can be fanned out to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceGroup {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub device_serials: BTreeSet<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl DeviceGroup {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            description: None,
            device_serials: BTreeSet::new(),
            tags: BTreeSet::new(),
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_devices<I, S>(mut self, serials: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.device_serials.extend(serials.into_iter().map(Into::into));
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_defaults() {
        let device = Device::new("R-1");
        assert_eq!(device.communication_timeout, 300);
        assert_eq!(device.communication_status, CommunicationStatus::Unknown);
        assert!(device.last_seen.is_none());
    }

    #[test]
    fn test_device_deserialize_minimal() {
        let device: Device = serde_json::from_str(
            r#"{"deviceSerial": "R-1", "createdAt": "2024-01-01T00:00:00Z", "updatedAt": "2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(device.communication_timeout, 300);
        assert_eq!(device.communication_status, CommunicationStatus::Unknown);
    }

    #[test]
    fn test_group_members_are_deduplicated() {
        let group = DeviceGroup::new("dock").with_devices(["R-2", "R-1", "R-2"]);
        let members: Vec<&str> = group.device_serials.iter().map(String::as_str).collect();
        assert_eq!(members, vec!["R-1", "R-2"]);
        assert!(group.active);
    }
}
