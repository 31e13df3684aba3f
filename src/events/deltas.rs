//! Payload shapes for every topic the translator understands
//!
//! Ids arrive as JSON numbers on some topics and as strings on others, and
//! timestamps are millisecond counts in either form, so both go through the
//! lenient helpers at the top of this file.

use super::{ActiveStatus, DomainEvent, ThreadRef};
use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Deserialize)]
#[serde(untagged)]
enum IdRepr {
    Text(String),
    Number(u64),
}

impl IdRepr {
    fn into_string(self) -> String {
        match self {
            IdRepr::Text(s) => s,
            IdRepr::Number(n) => n.to_string(),
        }
    }
}

fn id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    IdRepr::deserialize(deserializer).map(IdRepr::into_string)
}

fn opt_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<IdRepr>::deserialize(deserializer)?.map(IdRepr::into_string))
}

fn millis_to_datetime<E: de::Error>(raw: &str) -> Result<DateTime<Utc>, E> {
    let ms: i64 = raw
        .parse()
        .map_err(|_| E::custom(format!("invalid timestamp: {raw}")))?;
    DateTime::from_timestamp_millis(ms).ok_or_else(|| E::custom(format!("timestamp out of range: {ms}")))
}

fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = id(deserializer)?;
    millis_to_datetime(&raw)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadKey {
    #[serde(default, deserialize_with = "opt_id")]
    thread_fb_id: Option<String>,
    #[serde(default, deserialize_with = "opt_id")]
    other_user_fb_id: Option<String>,
}

impl ThreadKey {
    fn into_thread<E: de::Error>(self) -> Result<ThreadRef, E> {
        match (self.thread_fb_id, self.other_user_fb_id) {
            (Some(id), _) => Ok(ThreadRef::Group(id)),
            (None, Some(id)) => Ok(ThreadRef::User(id)),
            (None, None) => Err(E::custom("thread key without an id")),
        }
    }
}

fn thread_key<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ThreadRef, D::Error> {
    ThreadKey::deserialize(deserializer)?.into_thread()
}

fn thread_keys<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<ThreadRef>, D::Error> {
    Vec::<ThreadKey>::deserialize(deserializer)?
        .into_iter()
        .map(ThreadKey::into_thread)
        .collect()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageMetadata {
    #[serde(deserialize_with = "id")]
    actor_fb_id: String,
    #[serde(default, deserialize_with = "opt_id")]
    message_id: Option<String>,
    #[serde(deserialize_with = "thread_key")]
    thread_key: ThreadRef,
    #[serde(deserialize_with = "millis")]
    timestamp: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewMessage {
    message_metadata: MessageMetadata,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    attachments: Vec<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadReceipt {
    #[serde(deserialize_with = "id")]
    actor_fb_id: String,
    #[serde(deserialize_with = "thread_key")]
    thread_key: ThreadRef,
    #[serde(deserialize_with = "millis")]
    action_timestamp_ms: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkRead {
    #[serde(deserialize_with = "thread_keys")]
    thread_keys: Vec<ThreadRef>,
    #[serde(deserialize_with = "millis")]
    action_timestamp: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeliveryReceipt {
    #[serde(default, deserialize_with = "opt_id")]
    actor_fb_id: Option<String>,
    #[serde(deserialize_with = "thread_key")]
    thread_key: ThreadRef,
    #[serde(default)]
    message_ids: Vec<String>,
    #[serde(deserialize_with = "millis")]
    delivered_watermark_timestamp_ms: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadName {
    message_metadata: MessageMetadata,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddedParticipant {
    #[serde(deserialize_with = "id")]
    user_fb_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParticipantsAdded {
    message_metadata: MessageMetadata,
    added_participants: Vec<AddedParticipant>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParticipantLeft {
    message_metadata: MessageMetadata,
    #[serde(deserialize_with = "id")]
    left_participant_fb_id: String,
}

#[derive(Deserialize)]
struct ClientPayload {
    payload: Vec<u8>,
}

#[derive(Deserialize)]
struct ClientPayloadBody {
    #[serde(default)]
    deltas: Vec<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageReaction {
    #[serde(deserialize_with = "thread_key")]
    thread_key: ThreadRef,
    #[serde(deserialize_with = "id")]
    message_id: String,
    #[serde(deserialize_with = "id")]
    user_id: String,
    #[serde(default)]
    reaction: Option<String>,
    action: u8,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecallMessage {
    #[serde(deserialize_with = "thread_key")]
    thread_key: ThreadRef,
    #[serde(rename = "messageID", deserialize_with = "id")]
    message_id: String,
    #[serde(rename = "senderID", deserialize_with = "id")]
    sender_id: String,
    #[serde(deserialize_with = "millis")]
    deletion_timestamp: DateTime<Utc>,
}

#[derive(Deserialize)]
struct GroupTyping {
    #[serde(deserialize_with = "id")]
    sender_fbid: String,
    state: i64,
    #[serde(deserialize_with = "id")]
    thread: String,
}

#[derive(Deserialize)]
struct UserTyping {
    #[serde(deserialize_with = "id")]
    sender_fbid: String,
    state: i64,
}

#[derive(Deserialize)]
struct PresenceEntry {
    #[serde(deserialize_with = "id")]
    u: String,
    p: i64,
    #[serde(default)]
    l: Option<i64>,
}

#[derive(Deserialize)]
struct PresenceList {
    #[serde(default)]
    list_type: Option<String>,
    list: Vec<PresenceEntry>,
}

#[derive(Deserialize)]
struct LegacyWeb {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, deserialize_with = "opt_id")]
    from: Option<String>,
}

fn parse<'a, T: Deserialize<'a>>(what: &str, value: &'a Value) -> Result<T, String> {
    T::deserialize(value).map_err(|e| format!("{what}: {e}"))
}

/// Translate one entry of a control-topic `deltas` array
pub(super) fn translate_delta(delta: &Value) -> Result<Vec<DomainEvent>, String> {
    let class = delta
        .get("class")
        .and_then(Value::as_str)
        .ok_or_else(|| "delta without a class".to_string())?;

    let event = match class {
        "NoOp" => return Ok(Vec::new()),
        "ClientPayload" => {
            let payload: ClientPayload = parse(class, delta)?;
            return translate_client_payload(&payload.payload);
        }
        "NewMessage" => {
            let d: NewMessage = parse(class, delta)?;
            let metadata = d.message_metadata;
            DomainEvent::Message {
                thread: metadata.thread_key,
                author: metadata.actor_fb_id,
                message_id: metadata
                    .message_id
                    .ok_or_else(|| "NewMessage: missing messageId".to_string())?,
                text: d.body,
                attachments: d.attachments,
                at: metadata.timestamp,
            }
        }
        "ReadReceipt" => {
            let d: ReadReceipt = parse(class, delta)?;
            DomainEvent::ReadReceipt {
                thread: d.thread_key,
                author: d.actor_fb_id,
                at: d.action_timestamp_ms,
            }
        }
        "MarkRead" => {
            let d: MarkRead = parse(class, delta)?;
            DomainEvent::ThreadsRead {
                threads: d.thread_keys,
                at: d.action_timestamp,
            }
        }
        "DeliveryReceipt" => {
            let d: DeliveryReceipt = parse(class, delta)?;
            // One-to-one receipts omit the actor; it is the other user
            let author = match (d.actor_fb_id, &d.thread_key) {
                (Some(actor), _) => actor,
                (None, ThreadRef::User(other)) => other.clone(),
                (None, ThreadRef::Group(_)) => {
                    return Err("DeliveryReceipt: group receipt without actorFbId".to_string())
                }
            };
            DomainEvent::Delivered {
                thread: d.thread_key,
                author,
                message_ids: d.message_ids,
                at: d.delivered_watermark_timestamp_ms,
            }
        }
        "ThreadName" => {
            let d: ThreadName = parse(class, delta)?;
            DomainEvent::TitleSet {
                thread: d.message_metadata.thread_key,
                author: d.message_metadata.actor_fb_id,
                title: d.name.filter(|name| !name.is_empty()),
                at: d.message_metadata.timestamp,
            }
        }
        "ParticipantsAddedToGroupThread" => {
            let d: ParticipantsAdded = parse(class, delta)?;
            DomainEvent::PeopleAdded {
                thread: d.message_metadata.thread_key,
                author: d.message_metadata.actor_fb_id,
                added: d
                    .added_participants
                    .into_iter()
                    .map(|p| p.user_fb_id)
                    .collect(),
                at: d.message_metadata.timestamp,
            }
        }
        "ParticipantLeftGroupThread" => {
            let d: ParticipantLeft = parse(class, delta)?;
            DomainEvent::PersonRemoved {
                thread: d.message_metadata.thread_key,
                author: d.message_metadata.actor_fb_id,
                removed: d.left_participant_fb_id,
                at: d.message_metadata.timestamp,
            }
        }
        _ => DomainEvent::Unknown {
            source: "/t_ms".to_string(),
            data: delta.clone(),
        },
    };
    Ok(vec![event])
}

/// Nested JSON carried as a byte array inside a `ClientPayload` delta
fn translate_client_payload(bytes: &[u8]) -> Result<Vec<DomainEvent>, String> {
    let body: ClientPayloadBody = serde_json::from_slice(bytes)
        .map_err(|e| format!("ClientPayload: nested payload is not JSON: {e}"))?;

    let mut events = Vec::with_capacity(body.deltas.len());
    for delta in &body.deltas {
        if let Some(reaction) = delta.get("deltaMessageReaction") {
            let d: MessageReaction = parse("deltaMessageReaction", reaction)?;
            let reaction = match d.action {
                0 => d.reaction,
                1 => None,
                other => return Err(format!("deltaMessageReaction: unknown action {other}")),
            };
            events.push(DomainEvent::Reaction {
                thread: d.thread_key,
                author: d.user_id,
                message_id: d.message_id,
                reaction,
            });
        } else if let Some(recall) = delta.get("deltaRecallMessageData") {
            let d: RecallMessage = parse("deltaRecallMessageData", recall)?;
            events.push(DomainEvent::Unsend {
                thread: d.thread_key,
                author: d.sender_id,
                message_id: d.message_id,
                at: d.deletion_timestamp,
            });
        } else {
            events.push(DomainEvent::Unknown {
                source: "/t_ms client payload".to_string(),
                data: delta.clone(),
            });
        }
    }
    Ok(events)
}

pub(super) fn translate_group_typing(value: &Value) -> Result<Vec<DomainEvent>, String> {
    let d: GroupTyping = parse("thread typing", value)?;
    Ok(vec![DomainEvent::TypingStatus {
        thread: ThreadRef::Group(d.thread),
        author: d.sender_fbid,
        typing: d.state == 1,
    }])
}

pub(super) fn translate_user_typing(value: &Value) -> Result<Vec<DomainEvent>, String> {
    let d: UserTyping = parse("typing notification", value)?;
    Ok(vec![DomainEvent::TypingStatus {
        thread: ThreadRef::User(d.sender_fbid.clone()),
        author: d.sender_fbid,
        typing: d.state == 1,
    }])
}

pub(super) fn translate_presence(value: &Value) -> Result<Vec<DomainEvent>, String> {
    let d: PresenceList = parse("presence", value)?;
    let mut statuses = BTreeMap::new();
    for entry in d.list {
        let last_active = match entry.l {
            Some(secs) => Some(
                DateTime::from_timestamp(secs, 0)
                    .ok_or_else(|| format!("presence: last active out of range: {secs}"))?,
            ),
            None => None,
        };
        statuses.insert(
            entry.u,
            ActiveStatus {
                active: matches!(entry.p, 2 | 3),
                last_active,
            },
        );
    }
    Ok(vec![DomainEvent::Presence {
        statuses,
        full: d.list_type.as_deref() == Some("full"),
    }])
}

pub(super) fn translate_legacy_web(topic: &str, value: &Value) -> Result<Vec<DomainEvent>, String> {
    let d: LegacyWeb = parse("legacy web", value)?;
    let event = match (d.kind.as_str(), d.from) {
        ("jewel_requests_add", Some(from)) => DomainEvent::FriendRequest { from },
        ("jewel_requests_add", None) => {
            return Err("jewel_requests_add without a sender".to_string())
        }
        _ => DomainEvent::Unknown {
            source: topic.to_string(),
            data: value.clone(),
        },
    };
    Ok(vec![event])
}
