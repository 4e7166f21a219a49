use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS, Transport};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::MqttConfig;
use super::message_manager::{InboundMessage, Publisher, TransportError};

const REQUEST_CAPACITY: usize = 100;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
    Reconnecting,
}

#[derive(Clone, Debug, Default)]
pub struct MqttStatus {
    pub connection_state: ConnectionState,
    pub error_messages: Vec<String>,
    pub messages_received: usize,
    pub messages_sent: usize,
    pub last_activity: Option<chrono::DateTime<chrono::Utc>>,
}

impl MqttStatus {
    fn record_error(&mut self, message: String) {
        // keep the last few only
        if self.error_messages.len() >= 10 {
            self.error_messages.remove(0);
        }
        self.error_messages.push(message);
    }
}

/// Owns the broker connection.
///
/// Outbound traffic goes through the [`Publisher`] impl; inbound publishes are pumped by a
/// background task into the channel handed to [`MqttHandler::connect`], one at a time and in
/// broker delivery order.
pub struct MqttHandler {
    client: AsyncClient,
    status: Arc<watch::Sender<MqttStatus>>,
    cancel: CancellationToken,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl MqttHandler {
    /// Connects, subscribes and starts the receive pump.
    ///
    /// Returns an error if the first connection attempt fails; that is the only fatal
    /// transport condition; later connection drops are retried by the pump.
    pub async fn connect(
        config: MqttConfig,
        inbound: mpsc::Sender<InboundMessage>,
    ) -> Result<Self, TransportError> {
        let mut mqtt_options = MqttOptions::new(
            config.client_id.clone(),
            config.server.host.clone(),
            config.server.port,
        );
        mqtt_options
            .set_keep_alive(Duration::from_secs(config.server.keep_alive_secs.max(1)))
            .set_clean_session(true);
        if !config.server.username.is_empty() {
            mqtt_options.set_credentials(
                config.server.username.clone(),
                config.server.password.clone(),
            );
        }
        if config.server.tls {
            mqtt_options.set_transport(Transport::tls_with_default_config());
        }

        let (client, mut eventloop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);
        let (status_tx, _) = watch::channel(MqttStatus {
            connection_state: ConnectionState::Connecting,
            ..Default::default()
        });
        let status = Arc::new(status_tx);

        info!("Connecting to MQTT broker {} as {}", config.server, config.client_id);
        if let Err(e) = wait_for_connack(&mut eventloop).await {
            error!("Initial MQTT connection failed: {}", e);
            status.send_modify(|s| {
                s.connection_state = ConnectionState::Failed;
                s.record_error(e.to_string());
            });
            return Err(e);
        }
        subscribe_all(&client, &config.subbed_topics);
        status.send_modify(|s| {
            s.connection_state = ConnectionState::Connected;
            s.last_activity = Some(chrono::Utc::now());
        });
        info!("Connected, subscribed to {:?}", config.subbed_topics);

        let cancel = CancellationToken::new();
        let pump = tokio::spawn(run_pump(
            eventloop,
            client.clone(),
            config.subbed_topics,
            inbound,
            status.clone(),
            cancel.clone(),
        ));

        Ok(MqttHandler {
            client,
            status,
            cancel,
            pump: Mutex::new(Some(pump)),
        })
    }

    pub fn status(&self) -> watch::Receiver<MqttStatus> {
        self.status.subscribe()
    }

    /// Stops the receive pump and disconnects from the broker.
    pub async fn shutdown(&self) {
        if let Err(e) = self.client.try_disconnect() {
            debug!("Disconnect request not delivered: {}", e);
        }
        self.cancel.cancel();
        if let Some(handle) = self.pump.lock().await.take() {
            if let Err(e) = handle.await {
                error!("MQTT receive pump panicked: {}", e);
            }
        }
        self.status
            .send_modify(|s| s.connection_state = ConnectionState::Disconnected);
        info!("MQTT connection closed");
    }
}

#[async_trait]
impl Publisher for MqttHandler {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await?;
        self.status.send_modify(|s| {
            s.messages_sent += 1;
            s.last_activity = Some(chrono::Utc::now());
        });
        Ok(())
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), TransportError> {
    loop {
        match eventloop.poll().await? {
            Event::Incoming(Packet::ConnAck(ack)) => {
                if ack.code == ConnectReturnCode::Success {
                    return Ok(());
                }
                return Err(TransportError::Refused(ack.code));
            }
            other => debug!("Event before ConnAck: {:?}", other),
        }
    }
}

fn subscribe_all(client: &AsyncClient, topics: &[String]) {
    for topic in topics {
        // try_subscribe: called from the task that drives the event loop, must not block on it
        if let Err(e) = client.try_subscribe(topic.clone(), QoS::AtLeastOnce) {
            error!("Failed to subscribe to {}: {}", topic, e);
        }
    }
}

async fn run_pump(
    mut eventloop: EventLoop,
    client: AsyncClient,
    topics: Vec<String>,
    inbound: mpsc::Sender<InboundMessage>,
    status: Arc<watch::Sender<MqttStatus>>,
    cancel: CancellationToken,
) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Receive pump cancelled");
                break;
            }
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let msg = InboundMessage::new(publish.topic, publish.payload.to_vec());
                status.send_modify(|s| {
                    s.messages_received += 1;
                    s.last_activity = Some(msg.received_at);
                });
                if inbound.send(msg).await.is_err() {
                    info!("Inbound channel closed, stopping receive pump");
                    break;
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("Reconnected to broker, restoring subscriptions");
                subscribe_all(&client, &topics);
                backoff = INITIAL_BACKOFF;
                status.send_modify(|s| s.connection_state = ConnectionState::Connected);
            }
            Ok(_) => {}
            Err(e) => {
                warn!("MQTT connection error: {}, retrying in {:?}", e, backoff);
                status.send_modify(|s| {
                    s.connection_state = ConnectionState::Reconnecting;
                    s.record_error(e.to_string());
                });
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_history_is_bounded() {
        let mut status = MqttStatus::default();
        for i in 0..15 {
            status.record_error(format!("error {}", i));
        }
        assert_eq!(status.error_messages.len(), 10);
        assert_eq!(status.error_messages.first().map(String::as_str), Some("error 5"));
    }
}
