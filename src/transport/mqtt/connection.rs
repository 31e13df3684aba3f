//! Pure connection configuration for the MQTT transport
//!
//! This module turns a [`ConnectRequest`] into `rumqttc` options. It performs
//! no I/O, so every option can be checked without a broker.

use crate::transport::{ConnectRequest, TransportError};
use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;
use rumqttc::{MqttOptions, Transport as RumqttcTransport};
use std::time::Duration;

/// Largest frame accepted in either direction. Delta batches can be large.
pub const MAX_PACKET_SIZE: usize = 1024 * 1024;

/// Capacity of the request channel between `AsyncClient` and `EventLoop`
pub const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// Validate the handshake headers of a request (pure function)
pub fn build_header_map(request: &ConnectRequest) -> Result<HeaderMap, TransportError> {
    let mut headers = HeaderMap::with_capacity(request.headers.len());
    for (name, value) in &request.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| TransportError::InvalidRequest(format!("bad header name: {name}")))?;
        // Values can carry cookies, so they are never echoed back in errors
        let value = HeaderValue::from_str(value).map_err(|_| {
            TransportError::InvalidRequest(format!("bad value for header {name}"))
        })?;
        headers.insert(name, value);
    }
    Ok(headers)
}

/// Configure MQTT options for one connection attempt
pub fn configure_mqtt_options(request: &ConnectRequest) -> Result<MqttOptions, TransportError> {
    if request.client_id.is_empty() {
        return Err(TransportError::InvalidRequest(
            "client id must not be empty".to_string(),
        ));
    }
    if !request.url.starts_with("wss://") && !request.url.starts_with("ws://") {
        return Err(TransportError::InvalidRequest(format!(
            "expected a websocket url, got {}",
            request.url
        )));
    }

    // rumqttc panics on a sub-second keep-alive
    if !request.keep_alive.is_zero() && request.keep_alive < Duration::from_secs(1) {
        return Err(TransportError::InvalidRequest(format!(
            "keep-alive must be zero or at least one second, got {:?}",
            request.keep_alive
        )));
    }

    let headers = build_header_map(request)?;

    // rumqttc takes the full websocket URL in place of the host
    let mut mqtt_options = MqttOptions::new(&request.client_id, &request.url, request.port);

    let transport = if request.url.starts_with("wss://") {
        RumqttcTransport::wss_with_default_config()
    } else {
        RumqttcTransport::Ws
    };
    mqtt_options.set_transport(transport);

    mqtt_options.set_keep_alive(request.keep_alive);
    mqtt_options.set_clean_session(true);
    // The auth blob travels as the username, the password stays empty
    mqtt_options.set_credentials(&request.username, "");
    mqtt_options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);

    mqtt_options.set_request_modifier(move |mut ws_request: http::Request<()>| {
        let headers = headers.clone();
        async move {
            // insert, not append: the handshake already carries a Host header
            for (name, value) in headers.iter() {
                ws_request.headers_mut().insert(name.clone(), value.clone());
            }
            ws_request
        }
    });

    Ok(mqtt_options)
}
