//! Messenger Listener - Rust Implementation
//!
//! A resumable real-time event listener for the Messenger MQTT push channel.
//!
//! # Overview
//!
//! This crate connects to `edge-chat.{domain}` over MQTT on secure websockets
//! and turns the frames it receives into typed events, including:
//! - Connection lifecycle with automatic reconnection and backoff
//! - Sync-queue bookkeeping so a reconnect resumes instead of replaying
//! - Translation of delta, typing, presence and notification frames
//! - Bounded, backpressure-aware delivery to the consumer
//!
//! Logging in is not part of this crate: it is handed an authenticated
//! cookie header through a [`CredentialSource`](session::CredentialSource).
//!
//! # Quick Start
//!
//! ```rust
//! use messenger_listener::events::{translate, decode_payload, DomainEvent, ThreadRef};
//!
//! let payload = br#"{"thread": 5678, "sender_fbid": 1234, "state": 1}"#;
//! let value = decode_payload(payload).unwrap();
//! let events = translate("/thread_typing", &value).unwrap();
//!
//! assert_eq!(
//!     events,
//!     vec![DomainEvent::TypingStatus {
//!         thread: ThreadRef::Group("5678".to_string()),
//!         author: "1234".to_string(),
//!         typing: true,
//!     }]
//! );
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod listener;
pub mod observability;
pub mod protocol;
pub mod session;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, ListenerConfig};
pub use error::{ErrorClass, ListenerError, ListenerResult};
pub use events::DomainEvent;
pub use listener::{Listener, ListenerHandle, ListenerSettings};
pub use session::{CredentialSource, Credentials};
pub use transport::mqtt::MqttTransport;
