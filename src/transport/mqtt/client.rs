//! Impure I/O operations for the MQTT transport
//!
//! This module owns the `rumqttc` client and event loop. The event loop runs
//! in its own task and forwards routed events through a channel that
//! [`MqttTransport::poll`] drains; nothing else crosses the task boundary.

use super::connection::{configure_mqtt_options, REQUEST_CHANNEL_CAPACITY};
use super::message_handler::{EventRoute, MessageHandler};
use crate::transport::{
    ConnAckCode, ConnectRequest, DisconnectCause, QoS, Transport, TransportError, TransportEvent,
};
use async_trait::async_trait;
use rumqttc::{AsyncClient, EventLoop, SubscribeFilter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type ConnAckSender = oneshot::Sender<Result<(), TransportError>>;

/// One live connection. Never reused: a reconnect builds a new one.
struct ConnectionHandle {
    client: AsyncClient,
    event_loop_handle: JoinHandle<()>,
    events_rx: mpsc::UnboundedReceiver<TransportEvent>,
    connected: Arc<AtomicBool>,
}

/// MQTT-over-websocket transport built on `rumqttc`
#[derive(Default)]
pub struct MqttTransport {
    connection: Option<ConnectionHandle>,
}

impl MqttTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drive the event loop until it fails or the receiver goes away
    async fn run_event_loop(
        mut event_loop: EventLoop,
        events_tx: mpsc::UnboundedSender<TransportEvent>,
        connack_tx: ConnAckSender,
        connected: Arc<AtomicBool>,
    ) {
        let mut connack_tx = Some(connack_tx);

        loop {
            match event_loop.poll().await {
                Ok(event) => match MessageHandler::route_mqtt_event(&event) {
                    EventRoute::ConnectionAcknowledged(code) => {
                        if !Self::handle_connack(code, &mut connack_tx, &events_tx, &connected) {
                            break;
                        }
                    }
                    EventRoute::FrameReceived(frame) => {
                        debug!(target: "mqtt_transport", topic = %frame.topic, "Received MQTT frame");
                        if events_tx.send(TransportEvent::Frame(frame)).is_err() {
                            break;
                        }
                    }
                    EventRoute::Disconnected => {
                        info!("MQTT broker disconnected us");
                        connected.store(false, Ordering::SeqCst);
                        let _ = events_tx
                            .send(TransportEvent::Disconnected(DisconnectCause::ConnectionLost));
                        break;
                    }
                    EventRoute::SubscriptionConfirmed { packet_id } => {
                        debug!(target: "mqtt_transport", packet_id, "Subscription confirmed");
                    }
                    EventRoute::InfrastructureEvent(event_str) => {
                        debug!(target: "mqtt_transport", "MQTT event: {}", event_str);
                    }
                    EventRoute::OutgoingEvent => {}
                },
                Err(e) => {
                    let cause = MessageHandler::classify_connection_error(&e);
                    connected.store(false, Ordering::SeqCst);
                    match connack_tx.take() {
                        Some(tx) => {
                            let _ = tx.send(Err(MessageHandler::connect_error(cause)));
                        }
                        None => {
                            error!("MQTT event loop error: {}", e);
                            let _ = events_tx.send(TransportEvent::Disconnected(cause));
                        }
                    }
                    // Polling again would make rumqttc reconnect with stale
                    // credentials; reconnection belongs to the supervisor
                    break;
                }
            }
        }
        debug!(target: "mqtt_transport", "MQTT event loop stopped");
    }

    /// Returns false when the event loop should stop
    fn handle_connack(
        code: ConnAckCode,
        connack_tx: &mut Option<ConnAckSender>,
        events_tx: &mpsc::UnboundedSender<TransportEvent>,
        connected: &AtomicBool,
    ) -> bool {
        let accepted = code == ConnAckCode::ACCEPTED;
        connected.store(accepted, Ordering::SeqCst);

        match connack_tx.take() {
            Some(tx) => {
                let result = if accepted {
                    Ok(())
                } else {
                    Err(TransportError::Refused(code))
                };
                let _ = tx.send(result);
            }
            None if !accepted => {
                let _ = events_tx.send(TransportEvent::Disconnected(DisconnectCause::Refused(code)));
            }
            None => {}
        }
        accepted
    }

    /// Wait for ConnAck with timeout
    async fn wait_for_connection_confirmation(
        connack_rx: oneshot::Receiver<Result<(), TransportError>>,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        match tokio::time::timeout(timeout, connack_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::ConnectionFailed(
                "event loop stopped before ConnAck".to_string(),
            )),
            Err(_) => Err(TransportError::Timeout),
        }
    }

    fn live_client(&self) -> Result<&AsyncClient, TransportError> {
        match &self.connection {
            Some(connection) if connection.connected.load(Ordering::SeqCst) => {
                Ok(&connection.client)
            }
            _ => Err(TransportError::NotConnected),
        }
    }

    fn teardown(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.event_loop_handle.abort();
        }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&mut self, request: ConnectRequest) -> Result<(), TransportError> {
        // Replace the previous connection wholesale
        self.teardown();

        let mqtt_options = configure_mqtt_options(&request)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (connack_tx, connack_rx) = oneshot::channel();
        let connected = Arc::new(AtomicBool::new(false));

        info!(host = %request.host, port = request.port, "Opening MQTT connection");
        let event_loop_handle = tokio::spawn(Self::run_event_loop(
            event_loop,
            events_tx,
            connack_tx,
            connected.clone(),
        ));

        self.connection = Some(ConnectionHandle {
            client,
            event_loop_handle,
            events_rx,
            connected,
        });

        let result =
            Self::wait_for_connection_confirmation(connack_rx, request.connect_timeout).await;
        if result.is_err() {
            self.teardown();
        }
        result
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        let Some(connection) = self.connection.take() else {
            return Ok(());
        };

        if connection.connected.swap(false, Ordering::SeqCst) {
            if let Err(e) = connection.client.disconnect().await {
                warn!("Failed to queue MQTT disconnect: {}", e);
            }
        }

        // Give the event loop a moment to flush the DISCONNECT packet
        let mut handle = connection.event_loop_handle;
        match tokio::time::timeout(Duration::from_secs(2), &mut handle).await {
            Ok(_) => info!("MQTT event loop shut down gracefully"),
            Err(_) => {
                warn!("MQTT event loop didn't shut down gracefully, forcing abort");
                handle.abort();
            }
        }
        Ok(())
    }

    async fn subscribe(&mut self, topics: &[String]) -> Result<(), TransportError> {
        let client = self.live_client()?;
        let filters = topics
            .iter()
            .map(|topic| SubscribeFilter::new(topic.clone(), QoS::AtMostOnce));
        client
            .subscribe_many(filters)
            .await
            .map_err(|e| TransportError::SubscriptionFailed(e.to_string()))
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
    ) -> Result<(), TransportError> {
        let client = self.live_client()?;
        client
            .publish(topic, qos, false, payload)
            .await
            .map_err(|e| TransportError::PublishFailed {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn poll(&mut self, max_wait: Duration) -> Vec<TransportEvent> {
        let Some(connection) = self.connection.as_mut() else {
            tokio::time::sleep(max_wait).await;
            return Vec::new();
        };

        let mut events = Vec::new();
        if let Ok(Some(event)) = tokio::time::timeout(max_wait, connection.events_rx.recv()).await
        {
            events.push(event);
        }
        while let Ok(event) = connection.events_rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn is_connected(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|connection| connection.connected.load(Ordering::SeqCst))
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        // No async in Drop; callers should disconnect() for a clean close
        self.teardown();
    }
}
