//! MQTT transport bridge.
//!
//! Owns the single broker connection. A background task polls the rumqttc
//! event loop, renews subscriptions on every `ConnAck` and routes inbound
//! publishes into two bounded channels. Send awaits on a full channel, so a
//! slow consumer back-pressures the event loop rather than growing memory.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MqttConfig;
use crate::error::{Result, TransportError};
use crate::message::{CommandEnvelope, InboundMessage, ResponseMessage, TelemetryMessage, decode_publish};
use crate::publisher::DownlinkPublisher;
use crate::topic::{Channel, command_topic, subscription_filters};

/// Broker connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Receiving ends of the inbound channels handed out by [`TransportBridge::connect`].
pub struct InboundStreams {
    pub telemetry: mpsc::Receiver<TelemetryMessage>,
    pub responses: mpsc::Receiver<ResponseMessage>,
}

/// Routes decoded publishes to their consumer channel.
#[derive(Clone)]
pub(crate) struct InboundRouter {
    namespace: String,
    telemetry: mpsc::Sender<TelemetryMessage>,
    responses: mpsc::Sender<ResponseMessage>,
}

impl InboundRouter {
    pub(crate) fn new(
        namespace: impl Into<String>,
        telemetry: mpsc::Sender<TelemetryMessage>,
        responses: mpsc::Sender<ResponseMessage>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            telemetry,
            responses,
        }
    }

    /// Decode and forward one publish. Malformed input is logged and dropped.
    pub(crate) async fn route(&self, topic: &str, payload: &[u8]) {
        let message = match decode_publish(&self.namespace, topic, payload) {
            Ok(m) => m,
            Err(e) => {
                warn!(topic = %topic, payload_size = payload.len(), error = %e, "dropping inbound message");
                return;
            }
        };

        let device_serial = message.device_serial().to_string();
        let delivered = match message {
            InboundMessage::Telemetry(m) => self.telemetry.send(m).await.is_ok(),
            InboundMessage::Response(m) => self.responses.send(m).await.is_ok(),
        };

        if delivered {
            debug!(topic = %topic, device_serial = %device_serial, "routed inbound message");
        } else {
            warn!(topic = %topic, device_serial = %device_serial, "inbound consumer closed, message dropped");
        }
    }
}

/// Exponential reconnect delay.
#[derive(Debug)]
pub(crate) struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub(crate) fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait now; doubles the next one up to `max`.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub(crate) fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// The single upstream broker connection.
pub struct TransportBridge {
    config: MqttConfig,
    client: RwLock<Option<AsyncClient>>,
    status: Arc<watch::Sender<ConnectionStatus>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TransportBridge {
    pub fn new(config: MqttConfig) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            config,
            client: RwLock::new(None),
            status: Arc::new(status),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &MqttConfig {
        &self.config
    }

    /// Current connection state.
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Watch connection state changes.
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// Open the broker connection and start the event loop task.
    ///
    /// Subscriptions are issued once the broker acknowledges the connection
    /// and again after every reconnect.
    pub async fn connect(&self) -> Result<InboundStreams> {
        self.config.validate()?;

        let mut client_slot = self.client.write().await;
        if client_slot.is_some() {
            return Err(TransportError::Configuration("bridge already connected".into()));
        }
        if self.cancel.is_cancelled() {
            return Err(TransportError::Configuration("bridge has been stopped".into()));
        }

        let mut options = MqttOptions::new(&self.config.client_id, &self.config.host, self.config.port);
        options.set_keep_alive(self.config.keep_alive());
        options.set_clean_session(true);
        if let Some(username) = &self.config.username {
            options.set_credentials(username, self.config.password.clone().unwrap_or_default());
        }

        let (client, eventloop) = AsyncClient::new(options, self.config.request_capacity);
        let (telemetry_tx, telemetry_rx) = mpsc::channel(self.config.inbound_capacity);
        let (responses_tx, responses_rx) = mpsc::channel(self.config.inbound_capacity);

        self.status.send_replace(ConnectionStatus::Connecting);
        info!(
            host = %self.config.host,
            port = self.config.port,
            client_id = %self.config.client_id,
            namespace = %self.config.namespace,
            "connecting to MQTT broker"
        );

        let worker = EventLoopWorker {
            client: client.clone(),
            namespace: self.config.namespace.clone(),
            router: InboundRouter::new(&self.config.namespace, telemetry_tx, responses_tx),
            status: Arc::clone(&self.status),
            backoff: Backoff::new(self.config.reconnect_initial_delay(), self.config.reconnect_max_delay()),
        };
        let handle = tokio::spawn(worker.run(eventloop, self.cancel.clone()));

        *client_slot = Some(client);
        *self.task.lock().await = Some(handle);

        Ok(InboundStreams {
            telemetry: telemetry_rx,
            responses: responses_rx,
        })
    }

    /// Stop the event loop and drop the connection.
    pub async fn stop(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.task.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "MQTT event loop task failed");
            }
        }
        self.client.write().await.take();
        self.status.send_replace(ConnectionStatus::Disconnected);
        info!("transport bridge stopped");
    }
}

#[async_trait]
impl DownlinkPublisher for TransportBridge {
    async fn publish(&self, device_serial: &str, channel: Channel, message: &CommandEnvelope) -> Result<()> {
        if self.status() != ConnectionStatus::Connected {
            return Err(TransportError::NotConnected);
        }
        let client = self.client.read().await.clone().ok_or(TransportError::NotConnected)?;

        let topic = command_topic(&self.config.namespace, device_serial, channel);
        let body = serde_json::to_vec(message)?;
        client
            .publish(topic.as_str(), QoS::AtLeastOnce, false, body)
            .await?;

        debug!(
            topic = %topic,
            command = %message.command,
            command_id = %message.command_id,
            "published command"
        );
        Ok(())
    }
}

struct EventLoopWorker {
    client: AsyncClient,
    namespace: String,
    router: InboundRouter,
    status: Arc<watch::Sender<ConnectionStatus>>,
    backoff: Backoff,
}

impl EventLoopWorker {
    async fn run(mut self, mut eventloop: EventLoop, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("shutdown signal received");
                    let _ = self.client.try_disconnect();
                    break;
                }
                event = eventloop.poll() => {
                    match event {
                        Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                            info!(code = ?ack.code, "connected to MQTT broker");
                            self.status.send_replace(ConnectionStatus::Connected);
                            self.backoff.reset();
                            self.subscribe_all();
                        }
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            self.router.route(&publish.topic, &publish.payload).await;
                        }
                        Ok(Event::Incoming(Packet::SubAck(ack))) => {
                            debug!(pkid = ack.pkid, "subscription acknowledged");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            self.status.send_replace(ConnectionStatus::Reconnecting);
                            let delay = self.backoff.next_delay();
                            warn!(error = %e, retry_in_ms = delay.as_millis() as u64, "MQTT connection error");

                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                _ = tokio::time::sleep(delay) => {}
                            }
                        }
                    }
                }
            }
        }

        self.status.send_replace(ConnectionStatus::Disconnected);
        info!("MQTT event loop stopped");
    }

    /// Non-blocking: this task is the one draining the request queue.
    fn subscribe_all(&self) {
        for filter in subscription_filters(&self.namespace) {
            match self.client.try_subscribe(filter.as_str(), QoS::AtLeastOnce) {
                Ok(()) => info!(topic = %filter, "subscribed to MQTT topic"),
                Err(e) => warn!(topic = %filter, error = %e, "failed to subscribe"),
            }
        }
    }
}
