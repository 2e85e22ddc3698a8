//! Device provisioning.
//!
//! Certificates are issued by an external authority; the service records
//! which certificate is active on each device.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::device::Device;
use crate::error::{DeviceError, Result};
use crate::registry::DeviceRegistry;

/// Certificate issued to a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pub id: String,
    pub device_serial: String,
    pub certificate_pem: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_pem: Option<String>,
    pub issued_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// External certificate issuer.
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    async fn generate(&self, device_serial: &str) -> Result<Certificate>;
    async fn revoke(&self, certificate_id: &str) -> Result<()>;
    async fn renew(&self, device_serial: &str) -> Result<Certificate>;
}

/// A freshly provisioned device and its credentials.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionedDevice {
    pub device: Device,
    pub certificate: Certificate,
}

/// Registers devices and manages their certificates.
pub struct ProvisioningService {
    registry: Arc<DeviceRegistry>,
    authority: Arc<dyn CertificateAuthority>,
}

impl ProvisioningService {
    pub fn new(registry: Arc<DeviceRegistry>, authority: Arc<dyn CertificateAuthority>) -> Self {
        Self { registry, authority }
    }

    /// Register a device (if needed) and issue its first certificate.
    ///
    /// Fails if the device already holds an active certificate.
    pub async fn provision(&self, device_serial: &str) -> Result<ProvisionedDevice> {
        let existing = self.registry.get(device_serial)?;
        if let Some(device) = &existing {
            if device.certificate_id.is_some() {
                return Err(DeviceError::AlreadyExists(format!(
                    "device {} is already provisioned",
                    device_serial
                )));
            }
        } else {
            self.registry.register(Device::new(device_serial))?;
        }

        let certificate = self.authority.generate(device_serial).await?;
        let device = self.attach(device_serial, &certificate)?;

        info!(device_serial = %device_serial, certificate_id = %certificate.id, "device provisioned");
        Ok(ProvisionedDevice { device, certificate })
    }

    /// Revoke the device's active certificate.
    pub async fn revoke(&self, device_serial: &str) -> Result<Device> {
        let device = self.registry.require(device_serial)?;
        let certificate_id = device.certificate_id.ok_or_else(|| {
            DeviceError::InvalidParameter(format!("device {} has no active certificate", device_serial))
        })?;

        self.authority.revoke(&certificate_id).await?;
        let device = self.registry.update(device_serial, |d| d.certificate_id = None)?;

        info!(device_serial = %device_serial, certificate_id = %certificate_id, "certificate revoked");
        Ok(device)
    }

    /// Issue a replacement certificate.
    pub async fn renew(&self, device_serial: &str) -> Result<ProvisionedDevice> {
        self.registry.require(device_serial)?;

        let certificate = self.authority.renew(device_serial).await?;
        let device = self.attach(device_serial, &certificate)?;

        info!(device_serial = %device_serial, certificate_id = %certificate.id, "certificate renewed");
        Ok(ProvisionedDevice { device, certificate })
    }

    fn attach(&self, device_serial: &str, certificate: &Certificate) -> Result<Device> {
        if certificate.device_serial != device_serial {
            return Err(DeviceError::Certificate(format!(
                "certificate {} was issued for {}, not {}",
                certificate.id, certificate.device_serial, device_serial
            )));
        }
        self.registry
            .update(device_serial, |d| d.certificate_id = Some(certificate.id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use readerfleet_storage::MemoryBackend;

    #[derive(Default)]
    struct FakeAuthority {
        issued: Mutex<u32>,
        revoked: Mutex<Vec<String>>,
    }

    impl FakeAuthority {
        fn issue(&self, device_serial: &str) -> Certificate {
            let mut issued = self.issued.lock();
            *issued += 1;
            Certificate {
                id: format!("cert-{}", *issued),
                device_serial: device_serial.to_string(),
                certificate_pem: "-----BEGIN CERTIFICATE-----".into(),
                private_key_pem: None,
                issued_at: Utc::now(),
                expires_at: None,
            }
        }
    }

    #[async_trait]
    impl CertificateAuthority for FakeAuthority {
        async fn generate(&self, device_serial: &str) -> Result<Certificate> {
            Ok(self.issue(device_serial))
        }

        async fn revoke(&self, certificate_id: &str) -> Result<()> {
            self.revoked.lock().push(certificate_id.to_string());
            Ok(())
        }

        async fn renew(&self, device_serial: &str) -> Result<Certificate> {
            Ok(self.issue(device_serial))
        }
    }

    fn service() -> (ProvisioningService, Arc<DeviceRegistry>, Arc<FakeAuthority>) {
        let registry = Arc::new(DeviceRegistry::new(Arc::new(MemoryBackend::default())));
        let authority = Arc::new(FakeAuthority::default());
        (
            ProvisioningService::new(Arc::clone(&registry), authority.clone()),
            registry,
            authority,
        )
    }

    #[tokio::test]
    async fn test_provision_registers_and_attaches() {
        let (service, registry, _) = service();

        let provisioned = service.provision("R-1").await.unwrap();
        assert_eq!(provisioned.certificate.id, "cert-1");
        assert_eq!(
            registry.require("R-1").unwrap().certificate_id.as_deref(),
            Some("cert-1")
        );

        assert!(matches!(
            service.provision("R-1").await,
            Err(DeviceError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_revoke_then_reprovision() {
        let (service, registry, authority) = service();
        service.provision("R-1").await.unwrap();

        let device = service.revoke("R-1").await.unwrap();
        assert!(device.certificate_id.is_none());
        assert_eq!(*authority.revoked.lock(), vec!["cert-1".to_string()]);
        assert!(service.revoke("R-1").await.is_err());

        service.provision("R-1").await.unwrap();
        assert_eq!(
            registry.require("R-1").unwrap().certificate_id.as_deref(),
            Some("cert-2")
        );
    }

    #[tokio::test]
    async fn test_renew_requires_known_device() {
        let (service, _, _) = service();
        assert!(matches!(service.renew("ghost").await, Err(DeviceError::NotFound(_))));

        service.provision("R-1").await.unwrap();
        let renewed = service.renew("R-1").await.unwrap();
        assert_eq!(renewed.device.certificate_id.as_deref(), Some("cert-2"));
    }
}
