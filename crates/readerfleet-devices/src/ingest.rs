//! Batched telemetry ingestion.
//!
//! [`EventIngestBuffer`] stages events in memory and hands them to the
//! [`TelemetryStore`] in batches: synchronously from [`EventIngestBuffer::ingest`]
//! once `batch_size` events are staged, and from a background timer every
//! `batch_interval`. Each flush swaps the staging list out under the lock, so
//! an event is part of exactly one batch.
//!
//! The timer ticks on a fixed period rather than restarting at the first
//! staged event, so an event waits at most one `batch_interval` (often less)
//! before it is written.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use readerfleet_core::config::defaults;
use readerfleet_transport::TelemetryMessage;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::registry::DeviceRegistry;
use crate::telemetry::{TelemetryEvent, TelemetryStore};

/// Buffer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Events per synchronous flush.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Timer flush interval in milliseconds.
    #[serde(default = "default_batch_interval_ms")]
    pub batch_interval_ms: u64,
}

fn default_batch_size() -> usize {
    defaults::BATCH_SIZE
}

fn default_batch_interval_ms() -> u64 {
    defaults::BATCH_INTERVAL_MS
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_interval_ms: default_batch_interval_ms(),
        }
    }
}

impl IngestConfig {
    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }
}

/// Counters since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub flushes: u64,
    pub events_flushed: u64,
    pub events_dropped: u64,
}

struct TimerTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// In-memory staging list in front of a [`TelemetryStore`].
pub struct EventIngestBuffer {
    store: Arc<dyn TelemetryStore>,
    config: IngestConfig,
    staging: Mutex<Vec<TelemetryEvent>>,
    flushes: AtomicU64,
    events_flushed: AtomicU64,
    events_dropped: AtomicU64,
    timer: Mutex<Option<TimerTask>>,
}

impl EventIngestBuffer {
    pub fn new(store: Arc<dyn TelemetryStore>, config: IngestConfig) -> Self {
        let batch_size = config.batch_size.max(1);
        Self {
            store,
            staging: Mutex::new(Vec::with_capacity(batch_size)),
            config: IngestConfig { batch_size, ..config },
            flushes: AtomicU64::new(0),
            events_flushed: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            timer: Mutex::new(None),
        }
    }

    /// Stage an event, flushing inline when the batch is full.
    pub async fn ingest(&self, event: TelemetryEvent) {
        let full_batch = {
            let mut staging = self.staging.lock();
            staging.push(event);
            if staging.len() >= self.config.batch_size {
                Some(std::mem::take(&mut *staging))
            } else {
                None
            }
        };

        if let Some(batch) = full_batch {
            self.write_batch(batch, "size").await;
        }
    }

    /// Write everything staged so far. Returns the number of events stored.
    pub async fn flush(&self) -> usize {
        let batch = std::mem::take(&mut *self.staging.lock());
        if batch.is_empty() {
            return 0;
        }
        self.write_batch(batch, "manual").await
    }

    pub fn len(&self) -> usize {
        self.staging.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.staging.lock().is_empty()
    }

    pub fn stats(&self) -> IngestStats {
        IngestStats {
            flushes: self.flushes.load(Ordering::Relaxed),
            events_flushed: self.events_flushed.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
        }
    }

    /// Start the interval flush task. Calling it twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut timer = self.timer.lock();
        if timer.is_some() {
            warn!("ingest buffer already started");
            return;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(self).run_timer(cancel.clone()));
        *timer = Some(TimerTask { cancel, handle });
        info!(
            batch_size = self.config.batch_size,
            batch_interval_ms = self.config.batch_interval_ms,
            "ingest buffer started"
        );
    }

    /// Stop the timer and write whatever is still staged.
    pub async fn stop(&self) {
        let task = self.timer.lock().take();
        if let Some(task) = task {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                warn!(error = %e, "ingest timer task failed");
            }
        }

        let remaining = self.flush().await;
        info!(flushed = remaining, "ingest buffer stopped");
    }

    async fn run_timer(self: Arc<Self>, cancel: CancellationToken) {
        let mut timer = interval(self.config.batch_interval());
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately.
        timer.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {
                    let batch = std::mem::take(&mut *self.staging.lock());
                    if !batch.is_empty() {
                        self.write_batch(batch, "interval").await;
                    }
                }
            }
        }
    }

    async fn write_batch(&self, batch: Vec<TelemetryEvent>, trigger: &'static str) -> usize {
        let count = batch.len();
        match self.store.insert_many(batch).await {
            Ok(_) => {
                self.flushes.fetch_add(1, Ordering::Relaxed);
                self.events_flushed.fetch_add(count as u64, Ordering::Relaxed);
                debug!(events = count, trigger, "flushed telemetry batch");
                count
            }
            Err(e) => {
                self.events_dropped.fetch_add(count as u64, Ordering::Relaxed);
                error!(events = count, trigger, error = %e, "telemetry flush failed, batch dropped");
                0
            }
        }
    }
}

/// Drains the bridge's telemetry channel into the buffer.
///
/// Every message touches its device's `last_seen` before it is staged.
pub struct TelemetryConsumer {
    buffer: Arc<EventIngestBuffer>,
    registry: Arc<DeviceRegistry>,
}

impl TelemetryConsumer {
    pub fn new(buffer: Arc<EventIngestBuffer>, registry: Arc<DeviceRegistry>) -> Self {
        Self { buffer, registry }
    }

    pub async fn handle(&self, msg: TelemetryMessage) {
        if let Err(e) = self.registry.touch(&msg.device_serial, msg.received_at) {
            warn!(device_serial = %msg.device_serial, error = %e, "failed to update last seen");
        }
        self.buffer.ingest(TelemetryEvent::from(msg)).await;
    }

    /// Run until cancelled or the channel closes.
    pub async fn run(self, mut rx: mpsc::Receiver<TelemetryMessage>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                msg = rx.recv() => match msg {
                    Some(msg) => self.handle(msg).await,
                    None => {
                        debug!("telemetry channel closed");
                        break;
                    }
                }
            }
        }
        info!("telemetry consumer stopped");
    }
}
