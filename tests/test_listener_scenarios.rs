//! End-to-end listener tests over the in-memory transport
//!
//! Covers the connection lifecycle as the consumer sees it:
//! - Queue creation, resumption and loss (resync)
//! - Unsolicited disconnects and automatic reconnection
//! - Malformed frames, queue overflow and fatal login failures
//! - Cooperative cancellation


use futures::StreamExt;
use messenger_listener::error::{ErrorClass, ListenerError};
use messenger_listener::events::DomainEvent;
use messenger_listener::listener::{Listener, ListenerSettings, SequenceState};
use messenger_listener::protocol::topics::{
    CONTROL_TOPIC, CREATE_QUEUE_TOPIC, GET_DIFFS_TOPIC, THREAD_TYPING_TOPIC,
};
use messenger_listener::session::{CredentialSource, Credentials};
use messenger_listener::testing::FakeTransport;
use messenger_listener::transport::{
    ConnAckCode, DisconnectCause, RawFrame, TransportError, TransportEvent,
};
use messenger_listener::ConfigError;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use test_helpers::{fake_listener, fast_settings, message_frame, message_text, next_ok};

fn json_frame(topic: &str, value: Value) -> TransportEvent {
    TransportEvent::Frame(RawFrame::new(topic, value.to_string().into_bytes()))
}

#[tokio::test]
async fn test_queue_creation_then_delta_updates_cursor_without_resync() {
    // Arrange: sequence id unknown until the application supplies one
    let (mut listener, fake) = fake_listener(None);
    listener.handle().set_sequence_id(7);
    fake.push_batch(vec![
        json_frame(CONTROL_TOPIC, json!({"syncToken": "abc", "firstDeltaSeqId": 42})),
        json_frame(CONTROL_TOPIC, message_frame("hello", Some(50))),
    ])
    .await;

    // Act
    let first = next_ok(&mut listener).await;
    let second = next_ok(&mut listener).await;

    // Assert
    assert_eq!(first, DomainEvent::Connect);
    assert_eq!(message_text(&second), Some("hello"));
    assert_eq!(
        listener.sequence_state(),
        &SequenceState {
            sync_token: Some("abc".to_string()),
            sequence_id: Some(50),
        }
    );
    let creates = fake.publishes_on(CREATE_QUEUE_TOPIC).await;
    assert_eq!(creates.len(), 1);
    assert_eq!(creates[0]["initial_titan_sequence_id"], "7");
}

#[tokio::test]
async fn test_queue_overflow_emits_single_resync_before_messages() {
    // Arrange: connected and caught up at sequence id 50
    let (mut listener, fake) = fake_listener(Some(40));
    fake.push_batch(vec![
        json_frame(CONTROL_TOPIC, json!({"syncToken": "T1", "firstDeltaSeqId": 40})),
        json_frame(CONTROL_TOPIC, json!({"lastIssuedSeqId": 50, "deltas": []})),
        json_frame(CONTROL_TOPIC, json!({"errorCode": "ERROR_QUEUE_OVERFLOW"})),
        json_frame(CONTROL_TOPIC, message_frame("after overflow", None)),
    ])
    .await;

    // Act
    let events = vec![
        next_ok(&mut listener).await,
        next_ok(&mut listener).await,
        next_ok(&mut listener).await,
    ];

    // Assert
    assert_eq!(events[0], DomainEvent::Connect);
    assert_eq!(events[1], DomainEvent::Resync);
    assert_eq!(message_text(&events[2]), Some("after overflow"));
    assert_eq!(listener.sequence_state(), &SequenceState::default());

    let creates = fake.publishes_on(CREATE_QUEUE_TOPIC).await;
    assert_eq!(creates.len(), 2, "initial create plus one after the overflow");
    assert_eq!(creates[1]["initial_titan_sequence_id"], Value::Null);
}

#[tokio::test]
async fn test_sync_token_after_resync_repopulates_cursor() {
    let (mut listener, fake) = fake_listener(Some(1));
    fake.push_json(CONTROL_TOPIC, json!({"errorCode": "ERROR_QUEUE_NOT_FOUND"}))
        .await;
    fake.push_batch(vec![
        json_frame(CONTROL_TOPIC, json!({"syncToken": "T2", "firstDeltaSeqId": 900})),
        json_frame(CONTROL_TOPIC, message_frame("fresh", Some(901))),
    ])
    .await;

    assert_eq!(next_ok(&mut listener).await, DomainEvent::Connect);
    assert_eq!(next_ok(&mut listener).await, DomainEvent::Resync);
    assert_eq!(message_text(&next_ok(&mut listener).await), Some("fresh"));

    assert_eq!(listener.sequence_state().sync_token.as_deref(), Some("T2"));
    assert_eq!(listener.sequence_state().sequence_id, Some(901));
}

#[tokio::test]
async fn test_unknown_error_code_is_only_logged() {
    let (mut listener, fake) = fake_listener(Some(5));
    fake.push_batch(vec![
        json_frame(CONTROL_TOPIC, json!({"errorCode": "ERROR_SOMETHING_ELSE"})),
        json_frame(CONTROL_TOPIC, message_frame("still here", None)),
    ])
    .await;

    assert_eq!(next_ok(&mut listener).await, DomainEvent::Connect);
    let next = next_ok(&mut listener).await;

    assert_eq!(message_text(&next), Some("still here"));
    assert_eq!(listener.sequence_state().sequence_id, Some(5));
    assert_eq!(fake.publishes_on(CREATE_QUEUE_TOPIC).await.len(), 1);
}

#[tokio::test]
async fn test_connection_lost_reconnects_and_resumes() {
    // Arrange
    let (mut listener, fake) = fake_listener(Some(10));
    fake.push_json(CONTROL_TOPIC, json!({"syncToken": "abc", "firstDeltaSeqId": 10}))
        .await;
    fake.push_disconnect(DisconnectCause::ConnectionLost).await;
    fake.push_json(CONTROL_TOPIC, message_frame("after reconnect", Some(11)))
        .await;

    // Act
    let events = vec![
        next_ok(&mut listener).await,
        next_ok(&mut listener).await,
        next_ok(&mut listener).await,
        next_ok(&mut listener).await,
    ];

    // Assert
    assert_eq!(events[0], DomainEvent::Connect);
    match &events[1] {
        DomainEvent::Disconnect { reason } => assert!(reason.contains("Connection lost")),
        other => panic!("Expected Disconnect, got {other:?}"),
    }
    assert_eq!(events[2], DomainEvent::Connect);
    assert_eq!(message_text(&events[3]), Some("after reconnect"));

    // A fresh session id and a re-subscribe for the second connection
    let connects = fake.connects().await;
    assert_eq!(connects.len(), 2);
    assert_ne!(connects[0].url, connects[1].url);
    assert_eq!(fake.subscriptions().await.len(), 2);

    // The second connection resumes the queue instead of creating one
    let resumes = fake.publishes_on(GET_DIFFS_TOPIC).await;
    assert_eq!(resumes.len(), 1);
    assert_eq!(resumes[0]["sync_token"], "abc");
    assert_eq!(resumes[0]["last_seq_id"], "10");
}

#[tokio::test]
async fn test_late_sequence_seed_never_rewinds_resume_cursor() {
    // Arrange: cursor established by the server
    let (mut listener, fake) = fake_listener(Some(10));
    let handle = listener.handle();
    fake.push_batch(vec![
        json_frame(CONTROL_TOPIC, json!({"syncToken": "abc", "firstDeltaSeqId": 10})),
        json_frame(CONTROL_TOPIC, message_frame("before", Some(50))),
    ])
    .await;
    assert_eq!(next_ok(&mut listener).await, DomainEvent::Connect);
    assert_eq!(message_text(&next_ok(&mut listener).await), Some("before"));

    // Act: a stale seed arrives mid-stream, then the connection drops
    handle.set_sequence_id(3);
    fake.push_disconnect(DisconnectCause::ConnectionLost).await;
    fake.push_json(CONTROL_TOPIC, message_frame("after", Some(51)))
        .await;

    // Assert
    assert!(matches!(
        next_ok(&mut listener).await,
        DomainEvent::Disconnect { .. }
    ));
    assert_eq!(next_ok(&mut listener).await, DomainEvent::Connect);
    assert_eq!(message_text(&next_ok(&mut listener).await), Some("after"));

    let resumes = fake.publishes_on(GET_DIFFS_TOPIC).await;
    assert_eq!(resumes.len(), 1);
    assert_eq!(resumes[0]["last_seq_id"], "50");
    assert_eq!(listener.sequence_state().sequence_id, Some(51));
}

#[tokio::test]
async fn test_disconnect_reasons() {
    let (mut listener, fake) = fake_listener(Some(1));
    fake.push_disconnect(DisconnectCause::ConnectionError("buffer".into()))
        .await;
    fake.push_disconnect(DisconnectCause::Other("protocol violation".into()))
        .await;

    let mut reasons = Vec::new();
    while reasons.len() < 2 {
        if let DomainEvent::Disconnect { reason } = next_ok(&mut listener).await {
            reasons.push(reason);
        }
    }

    assert_eq!(reasons[0], "Connection error, retrying");
    assert_eq!(reasons[1], "MQTT Error: protocol violation, retrying");
}

#[tokio::test]
async fn test_reconnect_survives_transient_connect_failures() {
    let (mut listener, fake) = fake_listener(Some(1));
    fake.push_disconnect(DisconnectCause::NoConnection).await;
    // The initial connect is retried like any other
    fake.fail_next_connect(TransportError::Timeout).await;

    assert_eq!(next_ok(&mut listener).await, DomainEvent::Connect);
    fake.fail_next_connect(TransportError::ConnectionFailed("reset".into()))
        .await;

    assert!(matches!(
        next_ok(&mut listener).await,
        DomainEvent::Disconnect { .. }
    ));
    assert_eq!(next_ok(&mut listener).await, DomainEvent::Connect);
    assert_eq!(fake.connects().await.len(), 4);
}

#[tokio::test]
async fn test_malformed_frames_do_not_block_later_frames() {
    let (mut listener, fake) = fake_listener(Some(1));
    fake.push_batch(vec![
        TransportEvent::Frame(RawFrame::new(THREAD_TYPING_TOPIC, b"{not json".to_vec())),
        TransportEvent::Frame(RawFrame::new(THREAD_TYPING_TOPIC, vec![0xff, 0xfe])),
        json_frame(THREAD_TYPING_TOPIC, json!({"state": 1})),
        json_frame(
            THREAD_TYPING_TOPIC,
            json!({"thread": 55, "sender_fbid": 200, "state": 1}),
        ),
    ])
    .await;

    assert_eq!(next_ok(&mut listener).await, DomainEvent::Connect);
    match next_ok(&mut listener).await {
        DomainEvent::TypingStatus {
            author, typing, ..
        } => {
            assert_eq!(author, "200");
            assert!(typing);
        }
        other => panic!("Expected TypingStatus, got {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_delta_does_not_discard_its_batch() {
    // Arrange
    let (mut listener, fake) = fake_listener(Some(1));
    let mut batch = message_frame("good", Some(9));
    let good = batch["deltas"][0].clone();
    batch["deltas"] = json!([good, {"class": "NewMessage"}]);
    fake.push_json(CONTROL_TOPIC, batch).await;
    fake.push_json(CONTROL_TOPIC, message_frame("later", Some(10)))
        .await;

    // Act
    assert_eq!(next_ok(&mut listener).await, DomainEvent::Connect);
    let first = next_ok(&mut listener).await;
    let second = next_ok(&mut listener).await;

    // Assert
    assert_eq!(message_text(&first), Some("good"));
    assert_eq!(message_text(&second), Some("later"));
    assert_eq!(listener.sequence_state().sequence_id, Some(10));
}

#[tokio::test]
async fn test_overflow_within_one_frame_is_held_back_not_dropped() {
    // Arrange: room for exactly one event
    let fake = FakeTransport::new();
    let settings = ListenerSettings {
        queue_capacity: 1,
        ..fast_settings(Some(1))
    };
    let mut listener = Listener::new(
        fake.clone(),
        Arc::new(test_helpers::test_credentials()),
        settings,
    );
    let mut burst = message_frame("m1", None);
    let deltas = burst["deltas"].as_array().cloned().unwrap();
    let second = message_frame("m2", None)["deltas"][0].clone();
    let third = message_frame("m3", None)["deltas"][0].clone();
    burst["deltas"] = json!([deltas[0].clone(), second, third]);
    fake.push_json(CONTROL_TOPIC, burst).await;
    fake.push_json(CONTROL_TOPIC, message_frame("m4", None)).await;

    // Act
    assert_eq!(next_ok(&mut listener).await, DomainEvent::Connect);
    let mut texts = Vec::new();
    for _ in 0..4 {
        let event = next_ok(&mut listener).await;
        texts.push(message_text(&event).map(str::to_string));
    }

    // Assert: the burst drains over later ticks, ahead of the next frame
    assert_eq!(
        texts,
        vec![
            Some("m1".to_string()),
            Some("m2".to_string()),
            Some("m3".to_string()),
            Some("m4".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_rejected_credentials_end_the_sequence() {
    let (mut listener, fake) = fake_listener(Some(1));
    fake.fail_next_connect(TransportError::Refused(ConnAckCode::SESSION_REJECTED))
        .await;

    let err = listener
        .next_event()
        .await
        .expect("an error item")
        .expect_err("connect must fail");

    assert_eq!(err.class(), ErrorClass::FatalAuth);
    assert_eq!(
        err.to_string(),
        "Not logged in: Failed connecting. Maybe your cookies are wrong?"
    );
    assert!(listener.next_event().await.is_none());
    assert_eq!(fake.connects().await.len(), 1, "never retried");
}

#[tokio::test]
async fn test_missing_cookie_is_fatal() {
    struct NoCookie;
    impl CredentialSource for NoCookie {
        fn credentials(&self) -> Result<Credentials, ConfigError> {
            Err(ConfigError::EnvVarNotFound("MESSENGER_COOKIE".to_string()))
        }
    }

    let fake = FakeTransport::new();
    let mut listener = Listener::new(fake.clone(), Arc::new(NoCookie), fast_settings(Some(1)));

    let err = listener.next_event().await.unwrap().unwrap_err();

    assert!(matches!(err, ListenerError::Config(_)));
    assert!(err.is_terminal());
    assert!(fake.connects().await.is_empty());
}

#[tokio::test]
async fn test_credentials_are_reread_on_every_connect() {
    struct RotatingCookie {
        calls: AtomicUsize,
    }
    impl CredentialSource for RotatingCookie {
        fn credentials(&self) -> Result<Credentials, ConfigError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Credentials {
                cookie_header: format!("c_user=100; xs=cookie-{call}"),
                ..test_helpers::test_credentials()
            })
        }
    }

    let fake = FakeTransport::new();
    let source = Arc::new(RotatingCookie {
        calls: AtomicUsize::new(0),
    });
    let mut listener = Listener::new(fake.clone(), source.clone(), fast_settings(Some(1)));
    fake.push_disconnect(DisconnectCause::ConnectionLost).await;

    for _ in 0..3 {
        next_ok(&mut listener).await;
    }

    let cookies: Vec<_> = fake
        .connects()
        .await
        .iter()
        .map(|request| request.headers["Cookie"].clone())
        .collect();
    assert_eq!(cookies, vec!["c_user=100; xs=cookie-0", "c_user=100; xs=cookie-1"]);
    assert_eq!(source.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_exhausted_reconnect_limit_is_terminal() {
    let fake = FakeTransport::new();
    let mut settings = fast_settings(Some(1));
    settings.reconnect.max_attempts = Some(2);
    let mut listener = Listener::new(
        fake.clone(),
        Arc::new(test_helpers::test_credentials()),
        settings,
    );
    fake.fail_next_connect(TransportError::Timeout).await;
    fake.fail_next_connect(TransportError::Timeout).await;

    let err = listener.next_event().await.unwrap().unwrap_err();

    assert!(matches!(err, ListenerError::NotConnected { .. }));
    assert!(listener.next_event().await.is_none());
}

#[tokio::test]
async fn test_disconnect_request_ends_sequence_on_next_tick() {
    // Arrange
    let (mut listener, fake) = fake_listener(Some(1));
    let handle = listener.handle();
    assert_eq!(next_ok(&mut listener).await, DomainEvent::Connect);

    // Act
    handle.disconnect();
    fake.push_json(CONTROL_TOPIC, message_frame("too late", None))
        .await;
    let end = listener.next_event().await;

    // Assert
    assert!(end.is_none());
    assert!(handle.is_disconnect_requested());
    assert_eq!(fake.disconnect_count().await, 1);
    assert!(listener.next_event().await.is_none());
}

#[tokio::test]
async fn test_listener_as_stream() {
    let (listener, fake) = fake_listener(Some(1));
    let handle = listener.handle();
    fake.push_json(CONTROL_TOPIC, message_frame("one", None)).await;
    fake.push_json(CONTROL_TOPIC, message_frame("two", None)).await;

    let stream = listener.into_stream();
    tokio::pin!(stream);

    let mut texts = Vec::new();
    while let Some(item) = stream.next().await {
        let event = item.expect("no errors expected");
        if let Some(text) = message_text(&event) {
            texts.push(text.to_string());
            if texts.len() == 2 {
                handle.disconnect();
            }
        }
    }

    assert_eq!(texts, vec!["one", "two"]);
}
