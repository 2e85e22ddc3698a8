//! Service wiring.
//!
//! ```text
//! broker ──> TransportBridge ─┬─ telemetry ─> TelemetryConsumer ─> EventIngestBuffer ─> TelemetryStore
//!                             └─ responses ─> CommandCorrelator ─> CommandStore
//! CommandApi ─> CommandDispatcher / GroupFanoutCoordinator ─> TransportBridge ─> broker
//! CommandScheduler, TimeoutSweeper, ReachabilityMonitor: polling loops over the stores
//! ```

use std::sync::Arc;

use readerfleet_commands::{
    CommandApi, CommandCorrelator, CommandScheduler, CommandStore, PublishingExecutor, TimeoutSweeper,
};
use readerfleet_core::{Result, StorageBackend};
use readerfleet_devices::{
    DeviceRegistry, EventIngestBuffer, ReachabilityMonitor, StorageTelemetryStore, TelemetryConsumer,
};
use readerfleet_transport::{ConnectionStatus, DownlinkPublisher, TransportBridge};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ServerConfig;

/// Running service. Dropping it without [`Pipeline::shutdown`] loses staged telemetry.
pub struct Pipeline {
    bridge: Arc<TransportBridge>,
    buffer: Arc<EventIngestBuffer>,
    scheduler: Arc<CommandScheduler>,
    registry: Arc<DeviceRegistry>,
    api: Arc<CommandApi>,
    cancel: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Pipeline {
    /// Connect to the broker and start every background worker.
    pub async fn start(config: &ServerConfig, backend: Arc<dyn StorageBackend>) -> Result<Self> {
        let registry = Arc::new(DeviceRegistry::new(Arc::clone(&backend)));
        let commands = Arc::new(CommandStore::new(Arc::clone(&backend)));
        let telemetry = Arc::new(StorageTelemetryStore::new(Arc::clone(&backend)));

        let bridge = Arc::new(TransportBridge::new(config.mqtt.clone()));
        let streams = bridge.connect().await?;
        let publisher: Arc<dyn DownlinkPublisher> = bridge.clone();

        let buffer = Arc::new(EventIngestBuffer::new(telemetry, config.ingest.clone()));
        buffer.start();

        let scheduler = Arc::new(CommandScheduler::new(
            Arc::clone(&commands),
            Arc::new(PublishingExecutor::new(Arc::clone(&publisher))),
            config.scheduler.clone(),
        ));
        scheduler.start();

        let api = Arc::new(CommandApi::new(
            Arc::clone(&commands),
            publisher,
            registry.clone(),
        ));

        let cancel = CancellationToken::new();
        let consumer = TelemetryConsumer::new(Arc::clone(&buffer), Arc::clone(&registry));
        let correlator = CommandCorrelator::new(Arc::clone(&commands));
        let monitor = ReachabilityMonitor::new(Arc::clone(&registry), config.reachability.clone());
        let sweeper = TimeoutSweeper::new(commands, config.commands.clone());

        let tasks = vec![
            ("telemetry consumer", tokio::spawn(consumer.run(streams.telemetry, cancel.clone()))),
            ("command correlator", tokio::spawn(correlator.run(streams.responses, cancel.clone()))),
            ("reachability monitor", tokio::spawn(monitor.run(cancel.clone()))),
            ("timeout sweeper", tokio::spawn(sweeper.run(cancel.clone()))),
        ];

        info!(
            namespace = %config.mqtt.namespace,
            storage = %config.storage.backend,
            "readerfleet pipeline started"
        );

        Ok(Self {
            bridge,
            buffer,
            scheduler,
            registry,
            api,
            cancel,
            tasks,
        })
    }

    pub fn api(&self) -> &Arc<CommandApi> {
        &self.api
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn buffer(&self) -> &Arc<EventIngestBuffer> {
        &self.buffer
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.bridge.status()
    }

    /// Stop workers, disconnect, then flush staged telemetry.
    pub async fn shutdown(self) {
        info!("shutting down");
        self.cancel.cancel();
        for (name, handle) in self.tasks {
            if let Err(e) = handle.await {
                warn!(task = name, error = %e, "worker task failed");
            }
        }
        self.scheduler.stop().await;
        self.bridge.stop().await;
        self.buffer.stop().await;

        let stats = self.buffer.stats();
        info!(
            events_flushed = stats.events_flushed,
            events_dropped = stats.events_dropped,
            "readerfleet stopped"
        );
    }
}
