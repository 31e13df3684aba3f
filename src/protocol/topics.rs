//! Topic names used on the Messenger push channel
//!
//! The subscribed set is fixed: the edge only delivers what the auth blob
//! lists in `st`, and the same list is passed to SUBSCRIBE.

/// Control topic carrying queue bookkeeping and message deltas
pub const CONTROL_TOPIC: &str = "/t_ms";

/// Typing notifications in group threads
pub const THREAD_TYPING_TOPIC: &str = "/thread_typing";

/// Typing notifications in one-to-one threads
pub const ORCA_TYPING_TOPIC: &str = "/orca_typing_notifications";

/// Presence updates
pub const PRESENCE_TOPIC: &str = "/orca_presence";

/// Legacy web notifications (friend requests)
pub const LEGACY_WEB_TOPIC: &str = "/legacy_web";

/// Publish target for creating a fresh server-side queue
pub const CREATE_QUEUE_TOPIC: &str = "/messenger_sync_create_queue";

/// Publish target for resuming an existing queue
pub const GET_DIFFS_TOPIC: &str = "/messenger_sync_get_diffs";

/// Publish target for the foreground flag
pub const FOREGROUND_STATE_TOPIC: &str = "/foreground_state";

/// Publish target for the chat-on flag
pub const CLIENT_SETTINGS_TOPIC: &str = "/set_client_settings";

/// Every topic the listener subscribes to, in subscription order
pub const SUBSCRIBED_TOPICS: [&str; 16] = [
    CONTROL_TOPIC,
    THREAD_TYPING_TOPIC,
    ORCA_TYPING_TOPIC,
    PRESENCE_TOPIC,
    LEGACY_WEB_TOPIC,
    "/br_sr",
    "/sr_res",
    "/webrtc",
    "/onevc",
    "/notify_disconnect",
    "/inbox",
    "/mercury",
    "/messaging_events",
    "/orca_message_notifications",
    "/pp",
    "/webrtc_response",
];

/// Owned copy of the subscribed topic set
pub fn subscribed_topics() -> Vec<String> {
    SUBSCRIBED_TOPICS.iter().map(|t| t.to_string()).collect()
}

/// Whether a frame arrived on the control topic
pub fn is_control_topic(topic: &str) -> bool {
    topic == CONTROL_TOPIC
}
