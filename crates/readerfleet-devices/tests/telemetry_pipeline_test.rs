//! Telemetry flow from decoded bridge messages to stored events.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use readerfleet_devices::{
    CommunicationStatus, DeviceRegistry, EventIngestBuffer, IngestConfig, ReachabilityConfig,
    ReachabilityMonitor, StorageTelemetryStore, TelemetryConsumer, TelemetryStore,
};
use readerfleet_storage::MemoryBackend;
use readerfleet_transport::TelemetryMessage;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn message(serial: &str, n: u64) -> TelemetryMessage {
    TelemetryMessage {
        device_serial: serial.to_string(),
        event_type: "tag_read".to_string(),
        payload: json!({ "deviceSerial": serial, "n": n }),
        received_at: Utc::now(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_consumer_batches_and_touches_devices() {
    let backend = Arc::new(MemoryBackend::default());
    let registry = Arc::new(DeviceRegistry::new(backend.clone()));
    let store = Arc::new(StorageTelemetryStore::new(backend.clone()));
    let buffer = Arc::new(EventIngestBuffer::new(store.clone(), IngestConfig::default()));
    buffer.start();

    let (tx, rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let consumer = TelemetryConsumer::new(Arc::clone(&buffer), Arc::clone(&registry));
    let handle = tokio::spawn(consumer.run(rx, cancel.clone()));

    for n in 0..12 {
        tx.send(message("R-1", n)).await.unwrap();
    }
    tx.send(message("R-2", 0)).await.unwrap();

    // Let the consumer drain the channel without reaching the flush interval.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(store.query("R-1", None, 100).await.unwrap().len(), 10);
    assert_eq!(buffer.len(), 3);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(store.query("R-1", None, 100).await.unwrap().len(), 12);
    assert_eq!(store.query("R-2", None, 100).await.unwrap().len(), 1);
    assert!(buffer.is_empty());

    // Unknown serials were auto-registered on first contact.
    let devices = registry.list().unwrap();
    assert_eq!(devices.len(), 2);
    assert!(devices.iter().all(|d| d.last_seen.is_some()));

    let report = ReachabilityMonitor::new(Arc::clone(&registry), ReachabilityConfig::default())
        .evaluate_all(Utc::now())
        .unwrap();
    assert_eq!(report.online, 2);
    assert_eq!(
        registry.require("R-2").unwrap().communication_status,
        CommunicationStatus::Online
    );

    cancel.cancel();
    handle.await.unwrap();
    buffer.stop().await;
}

#[tokio::test]
async fn test_consumer_stops_when_channel_closes() {
    let backend = Arc::new(MemoryBackend::default());
    let registry = Arc::new(DeviceRegistry::new(backend.clone()));
    let store = Arc::new(StorageTelemetryStore::new(backend));
    let buffer = Arc::new(EventIngestBuffer::new(store.clone(), IngestConfig::default()));

    let (tx, rx) = mpsc::channel(4);
    let consumer = TelemetryConsumer::new(Arc::clone(&buffer), registry);
    tx.send(message("R-1", 0)).await.unwrap();
    drop(tx);

    consumer.run(rx, CancellationToken::new()).await;
    assert_eq!(buffer.len(), 1);

    buffer.stop().await;
    assert_eq!(store.query("R-1", None, 10).await.unwrap().len(), 1);
}
