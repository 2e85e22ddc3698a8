//! Scheduled command execution.
//!
//! Polls the store for the single most urgent due command, claims it with a
//! compare-and-set and executes it. Every replica may run a scheduler over
//! the same store; the claim guarantees one execution per command.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use readerfleet_core::config::defaults;
use readerfleet_transport::DownlinkPublisher;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::command::{Command, CommandId, CommandStatus};
use crate::error::Result;
use crate::state::CommandStore;

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Poll interval in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    defaults::SCHEDULER_POLL_INTERVAL_MS
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Runs a claimed command.
///
/// `Ok` marks the command `success` with the returned value as its response;
/// `Err` marks it `error`.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, command: &Command) -> Result<Option<Value>>;
}

/// Executes a command by publishing it to its device.
pub struct PublishingExecutor {
    publisher: Arc<dyn DownlinkPublisher>,
}

impl PublishingExecutor {
    pub fn new(publisher: Arc<dyn DownlinkPublisher>) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl CommandExecutor for PublishingExecutor {
    async fn execute(&self, command: &Command) -> Result<Option<Value>> {
        self.publisher
            .publish(&command.device_serial, command.command_type.channel(), &command.envelope())
            .await?;
        Ok(None)
    }
}

/// What one poll did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing due.
    Idle,
    /// Another scheduler claimed the command first.
    Lost(CommandId),
    Executed { command_id: CommandId, status: CommandStatus },
}

struct PollTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Polling scheduler over the command store.
pub struct CommandScheduler {
    store: Arc<CommandStore>,
    executor: Arc<dyn CommandExecutor>,
    config: SchedulerConfig,
    task: Mutex<Option<PollTask>>,
}

impl CommandScheduler {
    pub fn new(store: Arc<CommandStore>, executor: Arc<dyn CommandExecutor>, config: SchedulerConfig) -> Self {
        Self {
            store,
            executor,
            config,
            task: Mutex::new(None),
        }
    }

    /// Claim and execute at most one due command.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickOutcome> {
        let Some(command) = self.store.find_next_eligible(now).await? else {
            return Ok(TickOutcome::Idle);
        };

        if !self.store.claim(&command.command_id).await? {
            debug!(command_id = %command.command_id, "command claimed elsewhere");
            return Ok(TickOutcome::Lost(command.command_id));
        }

        debug!(
            command_id = %command.command_id,
            device_serial = %command.device_serial,
            priority = %command.priority,
            "executing scheduled command"
        );
        let (status, response) = match self.executor.execute(&command).await {
            Ok(response) => (CommandStatus::Success, response),
            Err(e) => {
                warn!(command_id = %command.command_id, error = %e, "scheduled command failed");
                (CommandStatus::Error, Some(json!({ "error": e.to_string() })))
            }
        };
        self.store.transition(&command.command_id, status, response).await?;

        info!(command_id = %command.command_id, status = %status, "scheduled command finished");
        Ok(TickOutcome::Executed {
            command_id: command.command_id,
            status,
        })
    }

    /// Spawn the polling loop.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.is_some() {
            warn!("command scheduler already started");
            return;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(self).run(cancel.clone()));
        *task = Some(PollTask { cancel, handle });
        info!(poll_interval_ms = self.config.poll_interval_ms, "command scheduler started");
    }

    /// Stop polling and wait for the in-flight tick.
    pub async fn stop(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                warn!(error = %e, "scheduler task failed");
            }
            info!("command scheduler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut timer = interval(self.config.poll_interval());
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        error!(error = %e, "scheduler poll failed");
                    }
                }
            }
        }
    }
}
