//! MQTT-over-websocket transport for the Messenger push channel
//!
//! The module is split the same way as the rest of the crate, separating
//! pure functions from I/O:
//!
//! - [`connection`] - Pure translation of a connect request into `rumqttc` options
//! - [`message_handler`] - Pure routing of `rumqttc` events and errors
//! - [`client`] - Impure I/O: the event loop task and the [`Transport`](crate::transport::Transport) impl
//!
//! # Usage
//!
//! ```rust,no_run
//! use messenger_listener::transport::mqtt::MqttTransport;
//! use messenger_listener::transport::Transport;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let mut transport = MqttTransport::new();
//! let events = transport.poll(Duration::from_millis(10)).await;
//! assert!(events.is_empty());
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::MqttTransport;
pub use connection::{configure_mqtt_options, MAX_PACKET_SIZE};
pub use message_handler::{EventRoute, MessageHandler};
