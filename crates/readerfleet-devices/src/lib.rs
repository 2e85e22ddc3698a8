//! Device fleet state for readerfleet.
//!
//! - [`DeviceRegistry`]: devices and groups in the document store, plus the
//!   [`DeviceDirectory`] seam used by group fan-out
//! - [`reachability`]: online/offline evaluation and the periodic monitor
//! - [`EventIngestBuffer`] / [`TelemetryConsumer`]: batched telemetry ingestion
//! - [`ProvisioningService`]: certificate lifecycle over a [`CertificateAuthority`]

pub mod device;
pub mod error;
pub mod ingest;
pub mod provisioning;
pub mod reachability;
pub mod registry;
pub mod telemetry;

pub use device::{CommunicationStatus, Device, DeviceGroup};
pub use error::{DeviceError, Result};
pub use ingest::{EventIngestBuffer, IngestConfig, IngestStats, TelemetryConsumer};
pub use provisioning::{Certificate, CertificateAuthority, ProvisionedDevice, ProvisioningService};
pub use reachability::{ReachabilityConfig, ReachabilityMonitor, ReachabilityReport};
pub use registry::{DeviceDirectory, DeviceRegistry, validate_key};
pub use telemetry::{StorageTelemetryStore, TelemetryEvent, TelemetryStore};
