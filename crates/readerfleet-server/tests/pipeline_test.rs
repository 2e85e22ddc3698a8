//! Pipeline lifecycle without a reachable broker.

use std::sync::Arc;

use readerfleet_commands::{CommandPayload, CommandStatus, CommandType};
use readerfleet_devices::DeviceGroup;
use readerfleet_server::{Pipeline, ServerConfig};
use readerfleet_storage::MemoryBackend;
use readerfleet_transport::ConnectionStatus;

fn offline_config() -> ServerConfig {
    let mut config = ServerConfig::from_toml(
        r#"
        [mqtt]
        host = "127.0.0.1"
        port = 1
        reconnect_initial_delay_ms = 50
        reconnect_max_delay_ms = 200

        [storage]
        backend = "memory"
        "#,
    )
    .unwrap();
    config.commands.timeout_secs = Some(60);
    config.validate().unwrap();
    config
}

#[tokio::test]
async fn test_commands_fail_fast_while_disconnected() {
    let pipeline = Pipeline::start(&offline_config(), Arc::new(MemoryBackend::default()))
        .await
        .unwrap();
    assert_ne!(pipeline.connection_status(), ConnectionStatus::Connected);

    let api = pipeline.api().clone();
    let command_id = api
        .dispatch("R-1", CommandType::Control, CommandPayload::Stop, None)
        .await
        .unwrap();
    let command = api.get_command_status(&command_id).await.unwrap();
    assert_eq!(command.status, CommandStatus::Error);

    pipeline
        .registry()
        .create_group(DeviceGroup::new("dock").with_devices(["R-1", "R-2"]))
        .unwrap();
    let result = api
        .send_to_group("dock", CommandType::Control, CommandPayload::Stop, None)
        .await
        .unwrap();
    assert_eq!(result.error_count, 2);
    assert_eq!(result.success_count, 0);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_storage_config_opens_memory_backend() {
    let config = offline_config();
    let backend = config.storage.open().unwrap();
    assert!(!backend.is_persistent());
}
