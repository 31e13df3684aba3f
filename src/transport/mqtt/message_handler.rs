//! Pure event routing for the MQTT transport
//!
//! This module maps `rumqttc` events and connection errors onto the
//! transport-neutral vocabulary the listener understands.

use crate::transport::{ConnAckCode, DisconnectCause, RawFrame, TransportError};
use rumqttc::mqttbytes::Error as MqttBytesError;
use rumqttc::{ConnectReturnCode, ConnectionError, Event, Packet, StateError};

/// Pure routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route an MQTT event (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) => {
                    EventRoute::ConnectionAcknowledged(Self::connack_code(&connack.code))
                }
                Packet::Publish(publish) => EventRoute::FrameReceived(RawFrame::new(
                    publish.topic.clone(),
                    publish.payload.clone(),
                )),
                Packet::Disconnect => EventRoute::Disconnected,
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Numeric ConnAck code for a `rumqttc` return code (pure function)
    pub fn connack_code(code: &ConnectReturnCode) -> ConnAckCode {
        match code {
            ConnectReturnCode::Success => ConnAckCode(0),
            ConnectReturnCode::RefusedProtocolVersion => ConnAckCode(1),
            ConnectReturnCode::BadClientId => ConnAckCode(2),
            ConnectReturnCode::ServiceUnavailable => ConnAckCode(3),
            ConnectReturnCode::BadUserNamePassword => ConnAckCode(4),
            ConnectReturnCode::NotAuthorized => ConnAckCode(5),
        }
    }

    /// Classify an event loop error into a disconnect cause (pure function)
    pub fn classify_connection_error(error: &ConnectionError) -> DisconnectCause {
        match error {
            ConnectionError::ConnectionRefused(code) => {
                DisconnectCause::Refused(Self::connack_code(code))
            }
            // The edge answers with non-standard return codes that rumqttc
            // cannot represent, so they surface as a decoding failure
            ConnectionError::MqttState(StateError::Deserialization(
                MqttBytesError::InvalidConnectReturnCode(code),
            )) => DisconnectCause::Refused(ConnAckCode(*code)),
            ConnectionError::MqttState(StateError::AwaitPingResp) => {
                DisconnectCause::ConnectionLost
            }
            ConnectionError::NetworkTimeout => DisconnectCause::ConnectionLost,
            ConnectionError::Io(e) => match e.kind() {
                std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::UnexpectedEof
                | std::io::ErrorKind::BrokenPipe => DisconnectCause::ConnectionLost,
                std::io::ErrorKind::NotConnected => DisconnectCause::NoConnection,
                _ => DisconnectCause::ConnectionError(e.to_string()),
            },
            other => DisconnectCause::Other(other.to_string()),
        }
    }

    /// Convert a failure seen before ConnAck into a connect error (pure function)
    pub fn connect_error(cause: DisconnectCause) -> TransportError {
        match cause {
            DisconnectCause::Refused(code) => TransportError::Refused(code),
            DisconnectCause::ConnectionLost => {
                TransportError::ConnectionFailed("connection closed before ConnAck".to_string())
            }
            DisconnectCause::NoConnection => TransportError::NotConnected,
            DisconnectCause::ConnectionError(reason) | DisconnectCause::Other(reason) => {
                TransportError::ConnectionFailed(reason)
            }
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// ConnAck received with the given return code
    ConnectionAcknowledged(ConnAckCode),
    /// Publish received on a subscribed topic
    FrameReceived(RawFrame),
    /// Broker sent DISCONNECT
    Disconnected,
    /// Subscription confirmed
    SubscriptionConfirmed { packet_id: u16 },
    /// Infrastructure event (PingResp, PubAck, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}
