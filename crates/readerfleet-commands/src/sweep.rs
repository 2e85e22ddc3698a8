//! Timed-out sweep.
//!
//! Closes commands that never reached a terminal status. The deadline is
//! measured from `execute_at` for scheduled commands and from `created_at`
//! otherwise. Without a configured `timeout_secs` the sweeper does nothing.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use readerfleet_core::config::defaults;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::command::{CommandId, CommandStatus};
use crate::error::Result;
use crate::state::{CommandStore, Transition};

/// Sweep configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Deadline in seconds; `None` disables the sweep.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_interval_secs() -> u64 {
    defaults::SWEEP_INTERVAL_SECS
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            timeout_secs: None,
            interval_secs: default_interval_secs(),
        }
    }
}

impl SweepConfig {
    /// Largest accepted `timeout_secs` (one year).
    pub const MAX_TIMEOUT_SECS: u64 = 365 * 24 * 60 * 60;

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Deadline as a `TimeDelta`, `None` when unset or not representable.
    pub fn deadline(&self) -> Option<TimeDelta> {
        self.timeout_secs
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(TimeDelta::try_seconds)
    }
}

/// Marks overdue commands `timed-out`.
pub struct TimeoutSweeper {
    store: Arc<CommandStore>,
    config: SweepConfig,
}

impl TimeoutSweeper {
    pub fn new(store: Arc<CommandStore>, config: SweepConfig) -> Self {
        Self { store, config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.timeout_secs.is_some()
    }

    /// Time out every overdue command; returns the ids that were changed.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<Vec<CommandId>> {
        let Some(timeout_secs) = self.config.timeout_secs else {
            return Ok(Vec::new());
        };
        // A deadline reaching past the representable range has no overdue commands.
        let Some(cutoff) = self.config.deadline().and_then(|d| now.checked_sub_signed(d)) else {
            debug!(timeout_secs, "command deadline out of range, nothing to sweep");
            return Ok(Vec::new());
        };

        let mut timed_out = Vec::new();
        for command in self.store.find_stale(cutoff).await? {
            let detail = json!({ "error": format!("no response within {}s", timeout_secs) });
            match self.store.transition(&command.command_id, CommandStatus::TimedOut, Some(detail)).await? {
                Transition::Applied(_) => {
                    debug!(command_id = %command.command_id, device_serial = %command.device_serial, "command timed out");
                    timed_out.push(command.command_id);
                }
                // Finished between the scan and the update.
                Transition::Refused { .. } => {}
            }
        }

        if !timed_out.is_empty() {
            info!(count = timed_out.len(), "timed out stale commands");
        }
        Ok(timed_out)
    }

    /// Run until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        if !self.is_enabled() {
            debug!("command timeout not configured, sweeper idle");
            return;
        }

        let mut timer = interval(self.config.interval());
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {
                    if let Err(e) = self.sweep(Utc::now()).await {
                        error!(error = %e, "timeout sweep failed");
                    }
                }
            }
        }
        info!("timeout sweeper stopped");
    }
}
