//! In-memory transport for driving the listener in tests
//!
//! Poll results are scripted as batches: each call to `poll` hands out the
//! next batch, or nothing once the script runs dry. Every connect, subscribe,
//! publish and disconnect is recorded for later inspection. Clones share the
//! same script and records, so a test keeps one clone while the listener owns
//! the other.

use crate::transport::{
    ConnectRequest, DisconnectCause, QoS, RawFrame, Transport, TransportError, TransportEvent,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// A publish recorded by [`FakeTransport`]
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
}

impl PublishedMessage {
    /// Payload parsed as JSON, `Null` when it is not JSON
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.payload).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Default)]
struct FakeScript {
    connect_results: VecDeque<Result<(), TransportError>>,
    poll_batches: VecDeque<Vec<TransportEvent>>,
    connects: Vec<ConnectRequest>,
    subscriptions: Vec<Vec<String>>,
    publishes: Vec<PublishedMessage>,
    disconnects: usize,
}

/// Scripted [`Transport`] implementation
#[derive(Debug, Clone, Default)]
pub struct FakeTransport {
    script: Arc<Mutex<FakeScript>>,
    connected: Arc<AtomicBool>,
    polls: Arc<AtomicUsize>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next connect attempt fail with `error`
    pub async fn fail_next_connect(&self, error: TransportError) {
        self.script.lock().await.connect_results.push_back(Err(error));
    }

    /// Queue a batch of events for one `poll` call
    pub async fn push_batch(&self, events: Vec<TransportEvent>) {
        self.script.lock().await.poll_batches.push_back(events);
    }

    /// Queue a single frame as its own batch
    pub async fn push_frame(&self, topic: &str, payload: impl Into<bytes::Bytes>) {
        self.push_batch(vec![TransportEvent::Frame(RawFrame::new(topic, payload))])
            .await;
    }

    /// Queue a JSON frame as its own batch
    pub async fn push_json(&self, topic: &str, value: Value) {
        self.push_frame(topic, value.to_string().into_bytes()).await;
    }

    /// Queue an unsolicited disconnect as its own batch
    pub async fn push_disconnect(&self, cause: DisconnectCause) {
        self.push_batch(vec![TransportEvent::Disconnected(cause)])
            .await;
    }

    /// Number of scripted batches not yet handed out
    pub async fn pending_batches(&self) -> usize {
        self.script.lock().await.poll_batches.len()
    }

    pub async fn connects(&self) -> Vec<ConnectRequest> {
        self.script.lock().await.connects.clone()
    }

    pub async fn subscriptions(&self) -> Vec<Vec<String>> {
        self.script.lock().await.subscriptions.clone()
    }

    pub async fn publishes(&self) -> Vec<PublishedMessage> {
        self.script.lock().await.publishes.clone()
    }

    /// JSON payloads published on one topic, oldest first
    pub async fn publishes_on(&self, topic: &str) -> Vec<Value> {
        self.script
            .lock()
            .await
            .publishes
            .iter()
            .filter(|message| message.topic == topic)
            .map(PublishedMessage::json)
            .collect()
    }

    pub async fn disconnect_count(&self) -> usize {
        self.script.lock().await.disconnects
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&mut self, request: ConnectRequest) -> Result<(), TransportError> {
        let mut script = self.script.lock().await;
        script.connects.push(request);
        let result = script.connect_results.pop_front().unwrap_or(Ok(()));
        self.connected.store(result.is_ok(), Ordering::SeqCst);
        result
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.script.lock().await.disconnects += 1;
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(&mut self, topics: &[String]) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.script.lock().await.subscriptions.push(topics.to_vec());
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
    ) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.script.lock().await.publishes.push(PublishedMessage {
            topic: topic.to_string(),
            payload,
            qos,
        });
        Ok(())
    }

    async fn poll(&mut self, _max_wait: Duration) -> Vec<TransportEvent> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let batch = self
            .script
            .lock()
            .await
            .poll_batches
            .pop_front()
            .unwrap_or_default();

        if batch
            .iter()
            .any(|event| matches!(event, TransportEvent::Disconnected(_)))
        {
            self.connected.store(false, Ordering::SeqCst);
        }
        batch
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> ConnectRequest {
        ConnectRequest {
            url: "wss://edge-chat.messenger.com/chat?sid=1".to_string(),
            host: "edge-chat.messenger.com".to_string(),
            port: 443,
            client_id: "mqttwsclient".to_string(),
            username: "{}".to_string(),
            headers: Default::default(),
            topics: vec!["/t_ms".to_string()],
            keep_alive: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(30),
        }
    }

    #[tokio::test]
    async fn test_scripted_batches_in_order() {
        let fake = FakeTransport::new();
        let mut transport = fake.clone();
        fake.push_json("/t_ms", json!({"lastIssuedSeqId": 1})).await;
        fake.push_disconnect(DisconnectCause::ConnectionLost).await;

        transport.connect(request()).await.unwrap();
        let first = transport.poll(Duration::ZERO).await;
        assert!(matches!(&first[0], TransportEvent::Frame(frame) if frame.topic == "/t_ms"));
        assert!(transport.is_connected());

        let second = transport.poll(Duration::ZERO).await;
        assert_eq!(
            second,
            vec![TransportEvent::Disconnected(DisconnectCause::ConnectionLost)]
        );
        assert!(!transport.is_connected());

        assert!(transport.poll(Duration::ZERO).await.is_empty());
        assert_eq!(fake.poll_count(), 3);
    }

    #[tokio::test]
    async fn test_connect_failures_are_consumed_once() {
        let fake = FakeTransport::new();
        let mut transport = fake.clone();
        fake.fail_next_connect(TransportError::Timeout).await;

        assert!(transport.connect(request()).await.is_err());
        assert!(!transport.is_connected());
        assert!(transport.connect(request()).await.is_ok());
        assert_eq!(fake.connects().await.len(), 2);
    }

    #[tokio::test]
    async fn test_publish_requires_connection() {
        let fake = FakeTransport::new();
        let mut transport = fake.clone();

        let result = transport
            .publish("/foreground_state", b"{}".to_vec(), QoS::AtLeastOnce)
            .await;
        assert!(matches!(result, Err(TransportError::NotConnected)));

        transport.connect(request()).await.unwrap();
        transport
            .publish("/foreground_state", br#"{"foreground":true}"#.to_vec(), QoS::AtLeastOnce)
            .await
            .unwrap();

        assert_eq!(
            fake.publishes_on("/foreground_state").await,
            vec![json!({"foreground": true})]
        );
    }
}
