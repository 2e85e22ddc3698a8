//! Device registry.
//!
//! Devices and groups are JSON documents in the keyed document store:
//!
//! | table           | key            | value         |
//! |-----------------|----------------|---------------|
//! | `devices`       | device serial  | [`Device`]    |
//! | `device_groups` | group name     | [`DeviceGroup`] |
//!
//! Every mutation of an existing record goes through
//! [`StorageBackend::update`], so concurrent telemetry touches and
//! reachability updates never lose each other's fields.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use readerfleet_core::StorageBackend;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::device::{CommunicationStatus, Device, DeviceGroup};
use crate::error::{DeviceError, Result};

const DEVICES_TABLE: &str = "devices";
const GROUPS_TABLE: &str = "device_groups";

/// Resolves group names to member serials.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    /// Snapshot of the group's members.
    ///
    /// Fails with [`DeviceError::GroupNotFound`] for an unknown group and
    /// [`DeviceError::GroupInactive`] for a disabled one.
    async fn resolve_group_members(&self, group: &str) -> Result<Vec<String>>;
}

/// Persistent registry of devices and device groups.
pub struct DeviceRegistry {
    backend: Arc<dyn StorageBackend>,
}

impl DeviceRegistry {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    // ========== Devices ==========

    /// Register a new device.
    pub fn register(&self, device: Device) -> Result<Device> {
        validate_key("device serial", &device.device_serial)?;
        let bytes = serde_json::to_vec(&device)?;
        let created = self.backend.update(DEVICES_TABLE, &device.device_serial, &mut |current| {
            Ok(match current {
                Some(_) => None,
                None => Some(bytes.clone()),
            })
        })?;
        if !created {
            return Err(DeviceError::AlreadyExists(device.device_serial));
        }
        debug!(device_serial = %device.device_serial, "registered device");
        Ok(device)
    }

    pub fn get(&self, device_serial: &str) -> Result<Option<Device>> {
        read_json(self.backend.as_ref(), DEVICES_TABLE, device_serial)
    }

    pub fn require(&self, device_serial: &str) -> Result<Device> {
        self.get(device_serial)?
            .ok_or_else(|| DeviceError::NotFound(device_serial.to_string()))
    }

    /// All devices ordered by serial.
    pub fn list(&self) -> Result<Vec<Device>> {
        scan_json(self.backend.as_ref(), DEVICES_TABLE)
    }

    pub fn remove(&self, device_serial: &str) -> Result<bool> {
        Ok(self.backend.delete(DEVICES_TABLE, device_serial)?)
    }

    /// Apply `f` to a stored device and persist the result.
    pub fn update<F>(&self, device_serial: &str, mut f: F) -> Result<Device>
    where
        F: FnMut(&mut Device),
    {
        let mut updated = None;
        self.backend.update(DEVICES_TABLE, device_serial, &mut |current| {
            let Some(bytes) = current else {
                return Ok(None);
            };
            let mut device: Device = serde_json::from_slice(bytes)?;
            f(&mut device);
            device.updated_at = Utc::now();
            let out = serde_json::to_vec(&device)?;
            updated = Some(device);
            Ok(Some(out))
        })?;
        updated.ok_or_else(|| DeviceError::NotFound(device_serial.to_string()))
    }

    /// Record activity from a device, registering it on first contact.
    ///
    /// `last_seen` never moves backwards.
    pub fn touch(&self, device_serial: &str, at: DateTime<Utc>) -> Result<Device> {
        validate_key("device serial", device_serial)?;
        let mut touched = None;
        self.backend.update(DEVICES_TABLE, device_serial, &mut |current| {
            let mut device = match current {
                Some(bytes) => serde_json::from_slice::<Device>(bytes)?,
                None => {
                    debug!(device_serial = %device_serial, "auto-registering device on first contact");
                    Device::new(device_serial)
                }
            };
            if device.last_seen.is_none_or(|seen| seen < at) {
                device.last_seen = Some(at);
            }
            device.updated_at = Utc::now();
            let out = serde_json::to_vec(&device)?;
            touched = Some(device);
            Ok(Some(out))
        })?;
        touched.ok_or_else(|| DeviceError::NotFound(device_serial.to_string()))
    }

    /// Persist a new communication status.
    pub fn set_communication_status(&self, device_serial: &str, status: CommunicationStatus) -> Result<Device> {
        self.update(device_serial, |device| device.communication_status = status)
    }

    pub fn set_communication_timeout(&self, device_serial: &str, secs: u64) -> Result<Device> {
        if secs == 0 {
            return Err(DeviceError::InvalidParameter(
                "communication timeout must be greater than zero".into(),
            ));
        }
        self.update(device_serial, |device| device.communication_timeout = secs)
    }

    // ========== Groups ==========

    pub fn create_group(&self, group: DeviceGroup) -> Result<DeviceGroup> {
        validate_key("group name", &group.name)?;
        for serial in &group.device_serials {
            validate_key("device serial", serial)?;
        }
        let bytes = serde_json::to_vec(&group)?;
        let created = self.backend.update(GROUPS_TABLE, &group.name, &mut |current| {
            Ok(match current {
                Some(_) => None,
                None => Some(bytes.clone()),
            })
        })?;
        if !created {
            return Err(DeviceError::AlreadyExists(group.name));
        }
        debug!(group = %group.name, members = group.device_serials.len(), "created device group");
        Ok(group)
    }

    pub fn get_group(&self, name: &str) -> Result<Option<DeviceGroup>> {
        read_json(self.backend.as_ref(), GROUPS_TABLE, name)
    }

    pub fn list_groups(&self) -> Result<Vec<DeviceGroup>> {
        scan_json(self.backend.as_ref(), GROUPS_TABLE)
    }

    pub fn delete_group(&self, name: &str) -> Result<bool> {
        Ok(self.backend.delete(GROUPS_TABLE, name)?)
    }

    /// Apply `f` to a stored group and persist the result.
    pub fn update_group<F>(&self, name: &str, mut f: F) -> Result<DeviceGroup>
    where
        F: FnMut(&mut DeviceGroup),
    {
        let mut updated = None;
        self.backend.update(GROUPS_TABLE, name, &mut |current| {
            let Some(bytes) = current else {
                return Ok(None);
            };
            let mut group: DeviceGroup = serde_json::from_slice(bytes)?;
            f(&mut group);
            group.updated_at = Utc::now();
            let out = serde_json::to_vec(&group)?;
            updated = Some(group);
            Ok(Some(out))
        })?;
        updated.ok_or_else(|| DeviceError::GroupNotFound(name.to_string()))
    }

    pub fn add_to_group(&self, name: &str, device_serials: &[String]) -> Result<DeviceGroup> {
        for serial in device_serials {
            validate_key("device serial", serial)?;
        }
        self.update_group(name, |group| {
            group.device_serials.extend(device_serials.iter().cloned());
        })
    }

    pub fn remove_from_group(&self, name: &str, device_serials: &[String]) -> Result<DeviceGroup> {
        self.update_group(name, |group| {
            for serial in device_serials {
                group.device_serials.remove(serial);
            }
        })
    }

    pub fn set_group_active(&self, name: &str, active: bool) -> Result<DeviceGroup> {
        self.update_group(name, |group| group.active = active)
    }
}

#[async_trait]
impl DeviceDirectory for DeviceRegistry {
    async fn resolve_group_members(&self, group: &str) -> Result<Vec<String>> {
        let group = self
            .get_group(group)?
            .ok_or_else(|| DeviceError::GroupNotFound(group.to_string()))?;
        if !group.active {
            return Err(DeviceError::GroupInactive(group.name));
        }
        Ok(group.device_serials.into_iter().collect())
    }
}

/// Check that `key` can be used as a single MQTT topic level.
pub fn validate_key(what: &str, key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(DeviceError::InvalidParameter(format!("{} is empty", what)));
    }
    if key.contains(['/', '+', '#']) {
        return Err(DeviceError::InvalidParameter(format!(
            "{} '{}' contains a topic separator or wildcard",
            what, key
        )));
    }
    Ok(())
}

fn read_json<T: DeserializeOwned>(backend: &dyn StorageBackend, table: &str, key: &str) -> Result<Option<T>> {
    match backend.read(table, key)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

fn scan_json<T: DeserializeOwned>(backend: &dyn StorageBackend, table: &str) -> Result<Vec<T>> {
    let rows = backend.scan(table, "")?;
    let mut out = Vec::with_capacity(rows.len());
    for (key, bytes) in rows {
        match serde_json::from_slice(&bytes) {
            Ok(value) => out.push(value),
            Err(e) => warn!(table = %table, key = %key, error = %e, "skipping unreadable record"),
        }
    }
    Ok(out)
}
