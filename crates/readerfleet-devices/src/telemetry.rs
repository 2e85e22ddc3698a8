//! Device Telemetry - event storage
//!
//! Telemetry events are immutable once written. Rows are keyed
//! `<serial>:<created_at millis>:<id>` so a prefix scan returns one device's
//! events in time order.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use readerfleet_core::StorageBackend;
use readerfleet_transport::TelemetryMessage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;

const TELEMETRY_TABLE: &str = "telemetry";

/// A stored telemetry event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    pub id: Uuid,
    pub device_serial: String,
    pub event_type: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl TelemetryEvent {
    pub fn new(device_serial: impl Into<String>, event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_serial: device_serial.into(),
            event_type: event_type.into(),
            payload,
            created_at: Utc::now(),
        }
    }

    fn storage_key(&self) -> String {
        format!(
            "{}:{:020}:{}",
            self.device_serial,
            self.created_at.timestamp_millis().max(0),
            self.id
        )
    }
}

impl From<TelemetryMessage> for TelemetryEvent {
    fn from(msg: TelemetryMessage) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_serial: msg.device_serial,
            event_type: msg.event_type,
            payload: msg.payload,
            created_at: msg.received_at,
        }
    }
}

/// Bulk sink for telemetry events.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Insert a batch; all-or-nothing.
    async fn insert_many(&self, events: Vec<TelemetryEvent>) -> Result<usize>;

    /// A device's events, newest first.
    async fn query(&self, device_serial: &str, since: Option<DateTime<Utc>>, limit: usize) -> Result<Vec<TelemetryEvent>>;
}

/// [`TelemetryStore`] over a [`StorageBackend`].
pub struct StorageTelemetryStore {
    backend: Arc<dyn StorageBackend>,
}

impl StorageTelemetryStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl TelemetryStore for StorageTelemetryStore {
    async fn insert_many(&self, events: Vec<TelemetryEvent>) -> Result<usize> {
        let count = events.len();
        let items = events
            .iter()
            .map(|event| Ok((event.storage_key(), serde_json::to_vec(event)?)))
            .collect::<Result<Vec<_>>>()?;
        self.backend.write_batch(TELEMETRY_TABLE, items)?;
        Ok(count)
    }

    async fn query(&self, device_serial: &str, since: Option<DateTime<Utc>>, limit: usize) -> Result<Vec<TelemetryEvent>> {
        let prefix = format!("{}:", device_serial);
        let rows = self.backend.scan(TELEMETRY_TABLE, &prefix)?;

        let mut events = Vec::new();
        for (key, bytes) in rows.into_iter().rev() {
            if events.len() >= limit {
                break;
            }
            let event: TelemetryEvent = match serde_json::from_slice(&bytes) {
                Ok(e) => e,
                Err(e) => {
                    warn!(key = %key, error = %e, "skipping unreadable telemetry row");
                    continue;
                }
            };
            if since.is_some_and(|since| event.created_at < since) {
                break;
            }
            events.push(event);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use readerfleet_storage::MemoryBackend;
    use serde_json::json;

    fn event_at(serial: &str, secs_ago: i64) -> TelemetryEvent {
        let mut event = TelemetryEvent::new(serial, "tag_read", json!({"epc": secs_ago}));
        event.created_at = Utc::now() - chrono::Duration::seconds(secs_ago);
        event
    }

    #[tokio::test]
    async fn test_insert_and_query_newest_first() {
        let store = StorageTelemetryStore::new(Arc::new(MemoryBackend::default()));
        let inserted = store
            .insert_many(vec![event_at("R-1", 30), event_at("R-1", 10), event_at("R-1", 20), event_at("R-2", 5)])
            .await
            .unwrap();
        assert_eq!(inserted, 4);

        let events = store.query("R-1", None, 10).await.unwrap();
        let ages: Vec<i64> = events.iter().map(|e| e.payload["epc"].as_i64().unwrap()).collect();
        assert_eq!(ages, vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn test_query_since_and_limit() {
        let store = StorageTelemetryStore::new(Arc::new(MemoryBackend::default()));
        store
            .insert_many(vec![event_at("R-1", 300), event_at("R-1", 20), event_at("R-1", 10)])
            .await
            .unwrap();

        let since = Utc::now() - chrono::Duration::seconds(60);
        assert_eq!(store.query("R-1", Some(since), 10).await.unwrap().len(), 2);
        assert_eq!(store.query("R-1", None, 1).await.unwrap().len(), 1);
    }

    #[test]
    fn test_from_message() {
        let msg = TelemetryMessage {
            device_serial: "R-1".into(),
            event_type: "heartbeat".into(),
            payload: json!({"deviceSerial": "R-1"}),
            received_at: Utc::now(),
        };
        let received_at = msg.received_at;
        let event = TelemetryEvent::from(msg);
        assert_eq!(event.device_serial, "R-1");
        assert_eq!(event.created_at, received_at);
    }
}
