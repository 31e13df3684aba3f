//! Control-channel frames and queue requests
//!
//! Frames on [`CONTROL_TOPIC`](super::topics::CONTROL_TOPIC) double as queue
//! bookkeeping. This module classifies them and builds the create/resume
//! publishes sent after every confirmed connect.

use super::topics::{CREATE_QUEUE_TOPIC, GET_DIFFS_TOPIC};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sync API version announced in every queue request
pub const SYNC_API_VERSION: u32 = 10;
/// Upper bound on deltas the server may push per batch window
pub const MAX_DELTAS_ABLE_TO_PROCESS: u32 = 1000;
/// Deltas per batch
pub const DELTA_BATCH_SIZE: u32 = 500;

/// Server error code meaning the queue was deleted or never existed
pub const ERROR_QUEUE_NOT_FOUND: &str = "ERROR_QUEUE_NOT_FOUND";
/// Server error code meaning the requested sequence id is too old
pub const ERROR_QUEUE_OVERFLOW: &str = "ERROR_QUEUE_OVERFLOW";

/// Classification of a JSON object received on the control topic
#[derive(Debug, Clone, PartialEq)]
pub enum ControlFrame {
    /// First frame of a freshly created queue
    QueueCreated {
        sync_token: String,
        first_delta_seq_id: u64,
    },
    /// The server-side queue is gone; resynchronise
    QueueInvalidated { code: String },
    /// Any other error code; only worth a log line
    ServerError { code: String },
    /// A delta batch carrying the newest sequence id
    Deltas { last_issued_seq_id: u64 },
    /// Nothing the tracker cares about
    Other,
}

impl ControlFrame {
    /// Classify a decoded control payload (pure function)
    ///
    /// Checks run in a fixed order: sync token first, then error code, then
    /// the delta sequence id.
    pub fn classify(value: &Value) -> Self {
        if let (Some(token), Some(seq)) = (
            value.get("syncToken").and_then(Value::as_str),
            value.get("firstDeltaSeqId").and_then(as_sequence_id),
        ) {
            return ControlFrame::QueueCreated {
                sync_token: token.to_string(),
                first_delta_seq_id: seq,
            };
        }

        if let Some(code) = value.get("errorCode") {
            let code = match code {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return if is_queue_loss(&code) {
                ControlFrame::QueueInvalidated { code }
            } else {
                ControlFrame::ServerError { code }
            };
        }

        if let Some(seq) = value.get("lastIssuedSeqId").and_then(as_sequence_id) {
            return ControlFrame::Deltas {
                last_issued_seq_id: seq,
            };
        }

        ControlFrame::Other
    }

    /// Whether the translator should still see this frame's deltas
    pub fn carries_deltas(&self) -> bool {
        matches!(self, ControlFrame::Deltas { .. } | ControlFrame::Other)
    }
}

/// Whether an error code means the server-side queue is lost (pure function)
pub fn is_queue_loss(code: &str) -> bool {
    code == ERROR_QUEUE_NOT_FOUND || code == ERROR_QUEUE_OVERFLOW
}

/// Sequence ids arrive either as JSON numbers or as decimal strings
fn as_sequence_id(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Fields shared by both queue requests
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueParams {
    pub sync_api_version: u32,
    pub max_deltas_able_to_process: u32,
    pub delta_batch_size: u32,
    pub encoding: String,
    pub entity_fbid: String,
}

impl QueueParams {
    pub fn new(entity_fbid: impl Into<String>) -> Self {
        Self {
            sync_api_version: SYNC_API_VERSION,
            max_deltas_able_to_process: MAX_DELTAS_ABLE_TO_PROCESS,
            delta_batch_size: DELTA_BATCH_SIZE,
            encoding: "JSON".to_string(),
            entity_fbid: entity_fbid.into(),
        }
    }
}

/// The publish sent after every confirmed connect
#[derive(Debug, Clone, PartialEq)]
pub enum QueueRequest {
    /// No sync token: ask for a new queue starting at the given sequence id
    Create {
        params: QueueParams,
        initial_titan_sequence_id: Option<u64>,
    },
    /// Resume the queue identified by the sync token
    Resume {
        params: QueueParams,
        last_seq_id: Option<u64>,
        sync_token: String,
    },
}

#[derive(Serialize)]
struct CreateQueueBody<'a> {
    #[serde(flatten)]
    params: &'a QueueParams,
    initial_titan_sequence_id: Option<String>,
    device_params: Option<Value>,
}

#[derive(Serialize)]
struct GetDiffsBody<'a> {
    #[serde(flatten)]
    params: &'a QueueParams,
    last_seq_id: Option<String>,
    sync_token: &'a str,
    device_params: Option<Value>,
}

impl QueueRequest {
    /// Topic this request is published to
    pub fn topic(&self) -> &'static str {
        match self {
            QueueRequest::Create { .. } => CREATE_QUEUE_TOPIC,
            QueueRequest::Resume { .. } => GET_DIFFS_TOPIC,
        }
    }

    pub fn is_create(&self) -> bool {
        matches!(self, QueueRequest::Create { .. })
    }

    /// JSON body with sequence ids rendered as decimal strings
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            QueueRequest::Create {
                params,
                initial_titan_sequence_id,
            } => serde_json::to_vec(&CreateQueueBody {
                params,
                initial_titan_sequence_id: initial_titan_sequence_id.map(|id| id.to_string()),
                device_params: None,
            }),
            QueueRequest::Resume {
                params,
                last_seq_id,
                sync_token,
            } => serde_json::to_vec(&GetDiffsBody {
                params,
                last_seq_id: last_seq_id.map(|id| id.to_string()),
                sync_token,
                device_params: None,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_queue_created() {
        let frame = ControlFrame::classify(&json!({"syncToken": "T1", "firstDeltaSeqId": 100}));
        assert_eq!(
            frame,
            ControlFrame::QueueCreated {
                sync_token: "T1".to_string(),
                first_delta_seq_id: 100
            }
        );
        assert!(!frame.carries_deltas());
    }

    #[test]
    fn test_classify_queue_loss_codes() {
        for code in [ERROR_QUEUE_NOT_FOUND, ERROR_QUEUE_OVERFLOW] {
            let frame = ControlFrame::classify(&json!({ "errorCode": code }));
            assert_eq!(
                frame,
                ControlFrame::QueueInvalidated {
                    code: code.to_string()
                }
            );
            assert!(!frame.carries_deltas());
        }
    }

    #[test]
    fn test_classify_other_error_code() {
        let frame =
            ControlFrame::classify(&json!({"errorCode": "FB_PAGES_INSUFFICIENT_PERMISSION"}));
        assert!(matches!(frame, ControlFrame::ServerError { .. }));
        assert!(!frame.carries_deltas());
    }

    #[test]
    fn test_classify_deltas_accepts_string_ids() {
        let frame = ControlFrame::classify(&json!({"lastIssuedSeqId": "105", "deltas": []}));
        assert_eq!(
            frame,
            ControlFrame::Deltas {
                last_issued_seq_id: 105
            }
        );
        assert!(frame.carries_deltas());
    }

    #[test]
    fn test_classify_sync_token_without_sequence_is_not_queue_created() {
        let frame = ControlFrame::classify(&json!({"syncToken": "T1"}));
        assert_eq!(frame, ControlFrame::Other);
        assert!(frame.carries_deltas());
    }

    #[test]
    fn test_create_payload_shape() {
        let request = QueueRequest::Create {
            params: QueueParams::new("100"),
            initial_titan_sequence_id: Some(42),
        };
        let body: Value = serde_json::from_slice(&request.to_payload().unwrap()).unwrap();

        assert_eq!(request.topic(), "/messenger_sync_create_queue");
        assert_eq!(
            body,
            json!({
                "sync_api_version": 10,
                "max_deltas_able_to_process": 1000,
                "delta_batch_size": 500,
                "encoding": "JSON",
                "entity_fbid": "100",
                "initial_titan_sequence_id": "42",
                "device_params": null
            })
        );
    }

    #[test]
    fn test_create_payload_without_sequence_id() {
        let request = QueueRequest::Create {
            params: QueueParams::new("100"),
            initial_titan_sequence_id: None,
        };
        let body: Value = serde_json::from_slice(&request.to_payload().unwrap()).unwrap();
        assert_eq!(body["initial_titan_sequence_id"], Value::Null);
    }

    #[test]
    fn test_resume_payload_shape() {
        let request = QueueRequest::Resume {
            params: QueueParams::new("100"),
            last_seq_id: Some(105),
            sync_token: "T1".to_string(),
        };
        let body: Value = serde_json::from_slice(&request.to_payload().unwrap()).unwrap();

        assert_eq!(request.topic(), "/messenger_sync_get_diffs");
        assert_eq!(body["last_seq_id"], "105");
        assert_eq!(body["sync_token"], "T1");
        assert_eq!(body["sync_api_version"], 10);
        assert!(body.get("initial_titan_sequence_id").is_none());
    }
}
