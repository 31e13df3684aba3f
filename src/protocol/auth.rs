//! Connect-time auth blob and websocket request
//!
//! The edge accepts the session description as a JSON document in the MQTT
//! username. It also carries the topic list, so subscriptions start as soon
//! as the connection is accepted.

use super::topics::subscribed_topics;
use crate::session::Credentials;
use crate::transport::ConnectRequest;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// MQTT client id expected by the edge
pub const MQTT_CLIENT_ID: &str = "mqttwsclient";

/// Application id of the web client
pub const APP_ID: u64 = 219_994_525_426_954;

/// Largest session id the web client generates (2^53)
pub const MAX_SESSION_ID: u64 = 1 << 53;

/// Port of the push edge
pub const EDGE_PORT: u16 = 443;

/// Generate a random session id in `1..=2^53`
pub fn generate_session_id() -> u64 {
    let random = uuid::Uuid::new_v4().as_u128() as u64;
    random % MAX_SESSION_ID + 1
}

/// Username payload of the CONNECT packet
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthBlob {
    /// User id
    pub u: String,
    /// Session id
    pub s: u64,
    pub chat_on: bool,
    /// Foreground flag
    pub fg: bool,
    /// Client id
    pub d: String,
    /// Application id
    pub aid: u64,
    /// Topics to subscribe to while connecting
    pub st: Vec<String>,
    /// Publishes to send while connecting
    pub pm: Vec<Value>,
    pub cp: u32,
    pub ecp: u32,
    pub ct: String,
    pub mqtt_sid: String,
    pub dc: String,
    pub no_auto_fg: bool,
    pub gas: Option<Value>,
    pub pack: Vec<Value>,
}

impl AuthBlob {
    pub fn new(credentials: &Credentials, session_id: u64, chat_on: bool, foreground: bool) -> Self {
        Self {
            u: credentials.user_id.clone(),
            s: session_id,
            chat_on,
            fg: foreground,
            d: credentials.client_id.clone(),
            aid: APP_ID,
            st: subscribed_topics(),
            pm: Vec::new(),
            cp: 3,
            ecp: 10,
            ct: "websocket".to_string(),
            mqtt_sid: String::new(),
            dc: String::new(),
            no_auto_fg: true,
            gas: None,
            pack: Vec::new(),
        }
    }
}

/// Presence flags that go into the auth blob
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PresenceFlags {
    pub chat_on: bool,
    pub foreground: bool,
}

/// Connection timing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConnectTiming {
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
}

/// Build the request for one connect attempt (pure function)
pub fn build_connect_request(
    credentials: &Credentials,
    session_id: u64,
    flags: PresenceFlags,
    timing: ConnectTiming,
) -> Result<ConnectRequest, serde_json::Error> {
    let blob = AuthBlob::new(credentials, session_id, flags.chat_on, flags.foreground);
    let username = serde_json::to_string(&blob)?;
    let host = credentials.edge_host();

    let mut headers = BTreeMap::new();
    headers.insert("Cookie".to_string(), credentials.cookie_header.clone());
    headers.insert("User-Agent".to_string(), credentials.user_agent.clone());
    headers.insert("Origin".to_string(), credentials.origin());
    headers.insert("Host".to_string(), host.clone());

    Ok(ConnectRequest {
        url: format!("wss://{host}/chat?sid={session_id}"),
        host,
        port: EDGE_PORT,
        client_id: MQTT_CLIENT_ID.to_string(),
        username,
        headers,
        topics: blob.st,
        keep_alive: timing.keep_alive,
        connect_timeout: timing.connect_timeout,
    })
}
