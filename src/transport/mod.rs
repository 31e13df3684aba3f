//! Transport layer for the push channel
//!
//! This module provides the transport abstraction the listener is written
//! against, and the MQTT-over-websocket implementation used in production.
//! Tests drive the listener through [`crate::testing::FakeTransport`] instead.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

pub mod mqtt;

pub use rumqttc::QoS;

/// A frame as delivered by the transport. Consumed immediately, never retained.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub topic: String,
    pub payload: Bytes,
}

impl RawFrame {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Everything needed to open one connection.
///
/// A new request is built for every attempt, so each connection carries its
/// own session id and a freshly built auth blob.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectRequest {
    /// Full websocket URL including the `sid` query parameter
    pub url: String,
    pub host: String,
    pub port: u16,
    /// MQTT client identifier
    pub client_id: String,
    /// Serialized auth blob, sent as the MQTT username
    pub username: String,
    /// Extra headers for the websocket handshake
    pub headers: BTreeMap<String, String>,
    /// Topics to subscribe to once connected
    pub topics: Vec<String>,
    pub keep_alive: Duration,
    /// How long to wait for ConnAck before giving up on this attempt
    pub connect_timeout: Duration,
}

/// Connection-health and delivery notifications produced by [`Transport::poll`].
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A publish arrived on a subscribed topic
    Frame(RawFrame),
    /// The connection went away without being asked to
    Disconnected(DisconnectCause),
}

/// Why a live connection stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum DisconnectCause {
    /// The socket closed or the peer went silent
    ConnectionLost,
    /// I/O failure while reading or writing
    ConnectionError(String),
    /// An operation was attempted with no connection
    NoConnection,
    /// The broker refused the connection outright
    Refused(ConnAckCode),
    /// Anything else the transport could not classify
    Other(String),
}

/// Raw ConnAck return code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAckCode(pub u8);

impl ConnAckCode {
    pub const ACCEPTED: ConnAckCode = ConnAckCode(0);
    pub const BAD_USERNAME_PASSWORD: ConnAckCode = ConnAckCode(4);
    pub const NOT_AUTHORIZED: ConnAckCode = ConnAckCode(5);
    /// Returned by the edge when the session cookies are rejected
    pub const SESSION_REJECTED: ConnAckCode = ConnAckCode(21);

    /// Whether this code means the credentials themselves were rejected
    pub fn is_credential_rejection(&self) -> bool {
        matches!(
            *self,
            Self::BAD_USERNAME_PASSWORD | Self::NOT_AUTHORIZED | Self::SESSION_REJECTED
        )
    }
}

impl std::fmt::Display for ConnAckCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transport-level failures
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection refused with return code {0}")]
    Refused(ConnAckCode),
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("ConnAck timeout - no connection confirmation received")]
    Timeout,
    #[error("Not connected")]
    NotConnected,
    #[error("Publishing to {topic} failed: {reason}")]
    PublishFailed { topic: String, reason: String },
    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),
    #[error("Invalid connect request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    pub fn is_credential_rejection(&self) -> bool {
        matches!(self, TransportError::Refused(code) if code.is_credential_rejection())
    }
}

/// Minimal pub/sub contract the listener depends on
///
/// Implementations own the live connection. `connect` always replaces any
/// previous connection wholesale rather than mutating it.
#[async_trait]
pub trait Transport: Send {
    /// Open a new connection and wait for the broker to confirm it
    async fn connect(&mut self, request: ConnectRequest) -> Result<(), TransportError>;

    /// Close the current connection, if any
    async fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Subscribe to the given topics on the current connection
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), TransportError>;

    /// Publish a payload on the current connection
    async fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
    ) -> Result<(), TransportError>;

    /// Service pending I/O for at most `max_wait` and return what happened
    ///
    /// Returns early once at least one event is available.
    async fn poll(&mut self, max_wait: Duration) -> Vec<TransportEvent>;

    /// Whether a confirmed connection is currently open
    fn is_connected(&self) -> bool;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn connect(&mut self, request: ConnectRequest) -> Result<(), TransportError> {
        (**self).connect(request).await
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        (**self).disconnect().await
    }

    async fn subscribe(&mut self, topics: &[String]) -> Result<(), TransportError> {
        (**self).subscribe(topics).await
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
    ) -> Result<(), TransportError> {
        (**self).publish(topic, payload, qos).await
    }

    async fn poll(&mut self, max_wait: Duration) -> Vec<TransportEvent> {
        (**self).poll(max_wait).await
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
}
