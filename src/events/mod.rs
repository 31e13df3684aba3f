//! Typed domain events produced by the listener
//!
//! Every frame the listener receives is translated into zero or more
//! [`DomainEvent`]s. Events are immutable and handed to the consumer exactly
//! once each.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

mod deltas;
pub mod translator;

pub use translator::{decode_payload, translate, FrameDecodeError};

/// The thread an event happened in
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ThreadRef {
    /// One-to-one conversation, identified by the other user's id
    User(String),
    /// Group conversation, identified by the thread id
    Group(String),
}

impl ThreadRef {
    pub fn id(&self) -> &str {
        match self {
            ThreadRef::User(id) | ThreadRef::Group(id) => id,
        }
    }
}

/// Presence of one user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActiveStatus {
    pub active: bool,
    pub last_active: Option<DateTime<Utc>>,
}

/// Everything the listener can emit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    /// The push channel is connected and the queue request was sent
    Connect,
    /// The connection dropped; a reconnect follows
    Disconnect { reason: String },
    /// Server-side queue state was lost; events may have been missed
    Resync,
    Message {
        thread: ThreadRef,
        author: String,
        message_id: String,
        text: Option<String>,
        attachments: Vec<Value>,
        at: DateTime<Utc>,
    },
    TypingStatus {
        thread: ThreadRef,
        author: String,
        typing: bool,
    },
    Presence {
        statuses: BTreeMap<String, ActiveStatus>,
        /// Whether this is the full list rather than an increment
        full: bool,
    },
    /// Someone read a thread
    ReadReceipt {
        thread: ThreadRef,
        author: String,
        at: DateTime<Utc>,
    },
    /// The logged-in user marked threads as read
    ThreadsRead {
        threads: Vec<ThreadRef>,
        at: DateTime<Utc>,
    },
    Delivered {
        thread: ThreadRef,
        author: String,
        message_ids: Vec<String>,
        at: DateTime<Utc>,
    },
    Reaction {
        thread: ThreadRef,
        author: String,
        message_id: String,
        /// `None` when the reaction was removed
        reaction: Option<String>,
    },
    Unsend {
        thread: ThreadRef,
        author: String,
        message_id: String,
        at: DateTime<Utc>,
    },
    TitleSet {
        thread: ThreadRef,
        author: String,
        title: Option<String>,
        at: DateTime<Utc>,
    },
    PeopleAdded {
        thread: ThreadRef,
        author: String,
        added: Vec<String>,
        at: DateTime<Utc>,
    },
    PersonRemoved {
        thread: ThreadRef,
        author: String,
        removed: String,
        at: DateTime<Utc>,
    },
    FriendRequest { from: String },
    /// Anything the translator does not model
    Unknown { source: String, data: Value },
}

impl DomainEvent {
    /// Short name used in log fields and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::Connect => "connect",
            DomainEvent::Disconnect { .. } => "disconnect",
            DomainEvent::Resync => "resync",
            DomainEvent::Message { .. } => "message",
            DomainEvent::TypingStatus { .. } => "typing_status",
            DomainEvent::Presence { .. } => "presence",
            DomainEvent::ReadReceipt { .. } => "read_receipt",
            DomainEvent::ThreadsRead { .. } => "threads_read",
            DomainEvent::Delivered { .. } => "delivered",
            DomainEvent::Reaction { .. } => "reaction",
            DomainEvent::Unsend { .. } => "unsend",
            DomainEvent::TitleSet { .. } => "title_set",
            DomainEvent::PeopleAdded { .. } => "people_added",
            DomainEvent::PersonRemoved { .. } => "person_removed",
            DomainEvent::FriendRequest { .. } => "friend_request",
            DomainEvent::Unknown { .. } => "unknown",
        }
    }

    /// Connection lifecycle events, as opposed to content
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            DomainEvent::Connect | DomainEvent::Disconnect { .. } | DomainEvent::Resync
        )
    }
}
