//! Device reachability evaluation.
//!
//! A device is `online` while its last telemetry is within its own
//! communication timeout and `offline` otherwise. The monitor re-evaluates
//! every device on a fixed interval and persists only changed statuses.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use readerfleet_core::config::defaults;
use serde::{Deserialize, Serialize};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::device::{CommunicationStatus, Device};
use crate::error::Result;
use crate::registry::DeviceRegistry;

/// Reachability of a device at `now`.
///
/// The boundary is inclusive: silence of exactly `timeout_secs` is still
/// online, and any fraction of a second past it is offline.
pub fn evaluate(last_seen: Option<DateTime<Utc>>, timeout_secs: u64, now: DateTime<Utc>) -> CommunicationStatus {
    let Some(last_seen) = last_seen else {
        return CommunicationStatus::Offline;
    };
    // A timeout too large for `TimeDelta` never expires.
    let Some(timeout) = i64::try_from(timeout_secs).ok().and_then(TimeDelta::try_seconds) else {
        return CommunicationStatus::Online;
    };
    if now.signed_duration_since(last_seen) > timeout {
        CommunicationStatus::Offline
    } else {
        CommunicationStatus::Online
    }
}

/// Evaluate a device record.
pub fn evaluate_device(device: &Device, now: DateTime<Utc>) -> CommunicationStatus {
    evaluate(device.last_seen, device.communication_timeout, now)
}

/// Reachability monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReachabilityConfig {
    /// Evaluation interval in seconds.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_interval_secs() -> u64 {
    defaults::REACHABILITY_INTERVAL_SECS
}

impl Default for ReachabilityConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

impl ReachabilityConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Outcome of one evaluation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReachabilityReport {
    pub online: usize,
    pub offline: usize,
    /// Serials whose persisted status changed in this pass.
    pub changed: Vec<String>,
}

/// Periodic reachability evaluation over every registered device.
pub struct ReachabilityMonitor {
    registry: Arc<DeviceRegistry>,
    config: ReachabilityConfig,
}

impl ReachabilityMonitor {
    pub fn new(registry: Arc<DeviceRegistry>, config: ReachabilityConfig) -> Self {
        Self { registry, config }
    }

    /// Evaluate all devices once and persist changes.
    pub fn evaluate_all(&self, now: DateTime<Utc>) -> Result<ReachabilityReport> {
        let mut report = ReachabilityReport::default();

        for device in self.registry.list()? {
            let status = evaluate_device(&device, now);
            match status {
                CommunicationStatus::Online => report.online += 1,
                _ => report.offline += 1,
            }
            if status == device.communication_status {
                continue;
            }

            match self.registry.set_communication_status(&device.device_serial, status) {
                Ok(_) => {
                    info!(
                        device_serial = %device.device_serial,
                        from = %device.communication_status,
                        to = %status,
                        "device reachability changed"
                    );
                    report.changed.push(device.device_serial);
                }
                Err(e) => warn!(
                    device_serial = %device.device_serial,
                    error = %e,
                    "failed to persist reachability"
                ),
            }
        }

        Ok(report)
    }

    /// Run until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        let mut timer = interval(self.config.interval());
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.config.interval_secs, "reachability monitor started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {
                    match self.evaluate_all(Utc::now()) {
                        Ok(report) => debug!(
                            online = report.online,
                            offline = report.offline,
                            changed = report.changed.len(),
                            "reachability pass complete"
                        ),
                        Err(e) => warn!(error = %e, "reachability pass failed"),
                    }
                }
            }
        }

        info!("reachability monitor stopped");
    }
}
