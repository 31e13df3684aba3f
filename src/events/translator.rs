//! Pure translation of raw frames into domain events
//!
//! Both entry points are free of I/O. A frame that cannot be decoded, or
//! whose shape does not match its topic, yields a [`FrameDecodeError`]: the
//! listener logs and counts it and moves on to the next frame. Inside a delta
//! batch a malformed entry is logged and counted on its own, and the rest of
//! the batch still translates.

use super::deltas;
use super::DomainEvent;
use crate::observability::metrics;
use crate::protocol::topics::{
    CONTROL_TOPIC, LEGACY_WEB_TOPIC, ORCA_TYPING_TOPIC, PRESENCE_TOPIC, THREAD_TYPING_TOPIC,
};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

/// Non-fatal failure to turn a frame into events
#[derive(Debug, Error)]
pub enum FrameDecodeError {
    #[error("Payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error("Payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("Unexpected payload shape on {topic}: {reason}")]
    UnexpectedShape { topic: String, reason: String },
}

impl FrameDecodeError {
    fn shape(topic: &str, reason: impl Into<String>) -> Self {
        Self::UnexpectedShape {
            topic: topic.to_string(),
            reason: reason.into(),
        }
    }
}

/// Decode a frame payload as UTF-8 JSON (pure function)
pub fn decode_payload(payload: &[u8]) -> Result<Value, FrameDecodeError> {
    let text = std::str::from_utf8(payload)?;
    Ok(serde_json::from_str(text)?)
}

/// Translate a decoded payload into domain events
///
/// Control-topic frames with no `deltas` field translate to nothing; their
/// bookkeeping is handled by the sequence tracker.
pub fn translate(topic: &str, payload: &Value) -> Result<Vec<DomainEvent>, FrameDecodeError> {
    let result = match topic {
        CONTROL_TOPIC => translate_control(payload),
        THREAD_TYPING_TOPIC => deltas::translate_group_typing(payload),
        ORCA_TYPING_TOPIC => deltas::translate_user_typing(payload),
        PRESENCE_TOPIC => deltas::translate_presence(payload),
        LEGACY_WEB_TOPIC => deltas::translate_legacy_web(topic, payload),
        _ => Ok(vec![DomainEvent::Unknown {
            source: topic.to_string(),
            data: payload.clone(),
        }]),
    };
    result.map_err(|reason| FrameDecodeError::shape(topic, reason))
}

fn translate_control(payload: &Value) -> Result<Vec<DomainEvent>, String> {
    let entries = match payload.get("deltas") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(entries)) => entries,
        Some(_) => return Err("deltas is not an array".to_string()),
    };

    let mut events = Vec::with_capacity(entries.len());
    for (index, delta) in entries.iter().enumerate() {
        match deltas::translate_delta(delta) {
            Ok(translated) => events.extend(translated),
            Err(reason) => {
                metrics().decode_failure();
                warn!(index, reason = %reason, "Skipping malformed delta");
            }
        }
    }
    Ok(events)
}
