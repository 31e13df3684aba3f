//! Connect and reconnect sequencing
//!
//! The [`ConnectionSupervisor`] owns the transport and the connection state.
//! Every connect attempt re-reads credentials, generates a new session id,
//! builds a fresh auth blob and, once the broker confirms, subscribes and
//! asks the server to create or resume the delta queue.

use crate::error::{ListenerError, ListenerResult};
use crate::listener::health::{
    ConnectionEvent, ConnectionState, HealthMonitor, HealthTransition, ReconnectConfig,
    ReconnectionDecision,
};
use crate::listener::sequence::SequenceTracker;
use crate::observability::metrics;
use crate::protocol::auth::{build_connect_request, generate_session_id, ConnectTiming, PresenceFlags};
use crate::protocol::topics::{CLIENT_SETTINGS_TOPIC, FOREGROUND_STATE_TOPIC};
use crate::session::CredentialSource;
use crate::transport::{DisconnectCause, QoS, Transport, TransportEvent};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn, Instrument};

/// Reported when the edge rejects the session cookies
pub const CREDENTIALS_REJECTED_MESSAGE: &str = "Failed connecting. Maybe your cookies are wrong?";

pub struct ConnectionSupervisor<T: Transport> {
    transport: T,
    credentials: Arc<dyn CredentialSource>,
    state: ConnectionState,
    reconnect_config: ReconnectConfig,
    flags: PresenceFlags,
    timing: ConnectTiming,
    attempts: u32,
    session_id: Option<u64>,
    user_id: Option<String>,
}

impl<T: Transport> ConnectionSupervisor<T> {
    pub fn new(
        transport: T,
        credentials: Arc<dyn CredentialSource>,
        reconnect_config: ReconnectConfig,
        flags: PresenceFlags,
        timing: ConnectTiming,
    ) -> Self {
        Self {
            transport,
            credentials,
            state: ConnectionState::Disconnected,
            reconnect_config,
            flags,
            timing,
            attempts: 0,
            session_id: None,
            user_id: None,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn is_connected(&self) -> bool {
        HealthMonitor::can_publish(&self.state)
    }

    /// Session id of the most recent connect attempt
    pub fn session_id(&self) -> Option<u64> {
        self.session_id
    }

    pub fn flags(&self) -> PresenceFlags {
        self.flags
    }

    /// Consecutive failed attempts since the last confirmed connection
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    fn transition(&mut self, event: ConnectionEvent) {
        let next = HealthMonitor::determine_next_state(&self.state, event);
        if next != self.state {
            HealthMonitor::log_state_transition(&self.state, &next);
            self.state = next;
        }
    }

    /// Make one connect attempt
    ///
    /// On success the connection is subscribed and the queue request for the
    /// tracker's current cursor has been published.
    pub async fn connect(&mut self, tracker: &SequenceTracker) -> ListenerResult<()> {
        self.transition(ConnectionEvent::ConnectStarted);
        metrics().connection_attempt();

        let credentials = match self.credentials.credentials() {
            Ok(credentials) => credentials,
            Err(e) => {
                self.transition(ConnectionEvent::CredentialsRejected(e.to_string()));
                metrics().connection_failed();
                return Err(e.into());
            }
        };

        let session_id = generate_session_id();
        self.session_id = Some(session_id);
        self.user_id = Some(credentials.user_id.clone());

        let request = build_connect_request(&credentials, session_id, self.flags, self.timing)
            .map_err(|e| ListenerError::internal(format!("Failed to build auth blob: {e}")))?;
        let topics = request.topics.clone();

        let span = crate::connection_span!(session_id, host = %request.host);
        let connected = self.transport.connect(request).instrument(span).await;

        if let Err(e) = connected {
            metrics().connection_failed();
            if e.is_credential_rejection() {
                self.transition(ConnectionEvent::CredentialsRejected(e.to_string()));
                return Err(ListenerError::not_logged_in(CREDENTIALS_REJECTED_MESSAGE));
            }
            self.transition(ConnectionEvent::ConnectFailed(e.to_string()));
            return Err(e.into());
        }

        self.transition(ConnectionEvent::ConnAckReceived);
        metrics().connection_established();
        self.attempts = 0;

        if let Err(e) = self.transport.subscribe(&topics).await {
            self.transition(ConnectionEvent::ConnectFailed(e.to_string()));
            return Err(e.into());
        }
        debug!(count = topics.len(), "Subscribed to topics");

        self.publish_queue_request(tracker).await
    }

    /// Connect, retrying with backoff until connected, cancelled or fatal
    ///
    /// Returns `Ok(false)` when shutdown was requested before a connection
    /// could be made.
    pub async fn connect_with_retry(
        &mut self,
        tracker: &SequenceTracker,
        shutdown: &watch::Receiver<bool>,
    ) -> ListenerResult<bool> {
        loop {
            let shutdown_requested = *shutdown.borrow();
            match HealthMonitor::should_attempt_reconnection(
                self.attempts,
                &self.reconnect_config,
                shutdown_requested,
            ) {
                ReconnectionDecision::AbortShutdownRequested => {
                    info!("Shutdown requested, not reconnecting");
                    return Ok(false);
                }
                ReconnectionDecision::AbortMaxAttemptsExceeded => {
                    return Err(ListenerError::not_connected(format!(
                        "Gave up after {} connection attempts",
                        self.attempts
                    )));
                }
                ReconnectionDecision::Proceed { attempt, delay_ms } => {
                    self.attempts = attempt;
                    if delay_ms > 0 {
                        debug!(attempt, delay_ms, "Waiting before next connect attempt");
                        if !Self::interruptible_sleep(shutdown.clone(), delay_ms).await {
                            return Ok(false);
                        }
                    }

                    match self.connect(tracker).await {
                        Ok(()) => return Ok(true),
                        Err(e) if e.is_terminal() => return Err(e),
                        Err(e) => {
                            warn!(attempt, error = %e.sanitized(), "Connect attempt failed");
                        }
                    }
                }
            }
        }
    }

    /// Perform interruptible sleep with shutdown monitoring
    /// Returns true if sleep completed, false if shutdown requested
    async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Shutdown signal received during reconnection delay, stopping");
                    return false;
                }
                true
            }
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
        }
    }

    /// Record an unsolicited disconnect and decide what it means
    pub fn on_disconnect(&mut self, cause: &DisconnectCause) -> HealthTransition {
        metrics().connection_lost();
        let transition = HealthMonitor::classify_disconnect(cause);
        match &transition {
            HealthTransition::Retry { reason } => {
                self.transition(ConnectionEvent::ConnectionLost(reason.clone()));
            }
            HealthTransition::Fatal { reason } => {
                self.transition(ConnectionEvent::CredentialsRejected(reason.clone()));
            }
        }
        transition
    }

    /// Ask the server to create or resume the delta queue
    pub async fn publish_queue_request(&mut self, tracker: &SequenceTracker) -> ListenerResult<()> {
        let user_id = self
            .user_id
            .clone()
            .ok_or_else(|| ListenerError::not_connected("No connection has been made yet"))?;
        let request = tracker.queue_request(&user_id);
        let payload = request
            .to_payload()
            .map_err(|e| ListenerError::internal(format!("Failed to encode queue request: {e}")))?;

        self.publish(request.topic(), payload).await?;
        if request.is_create() {
            info!("Requested a new sync queue");
        } else {
            debug!("Resuming existing sync queue");
        }
        Ok(())
    }

    /// Tell the server whether the client is in the foreground
    ///
    /// The flag is also used for the auth blob of later connections.
    pub async fn set_foreground(&mut self, value: bool) -> ListenerResult<()> {
        self.flags.foreground = value;
        let payload = json!({ "foreground": value }).to_string().into_bytes();
        self.publish_if_connected(FOREGROUND_STATE_TOPIC, payload).await
    }

    /// Set whether the user shows as active while the client is in the foreground
    pub async fn set_chat_on(&mut self, value: bool) -> ListenerResult<()> {
        self.flags.chat_on = value;
        let payload = json!({ "make_user_available_when_in_foreground": value })
            .to_string()
            .into_bytes();
        self.publish_if_connected(CLIENT_SETTINGS_TOPIC, payload).await
    }

    async fn publish_if_connected(&mut self, topic: &str, payload: Vec<u8>) -> ListenerResult<()> {
        if !self.is_connected() {
            debug!(topic, "Not connected, setting applies from the next connection");
            return Ok(());
        }
        self.publish(topic, payload).await
    }

    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> ListenerResult<()> {
        if !self.is_connected() {
            return Err(ListenerError::not_connected(format!(
                "Cannot publish to {topic} without a connection"
            )));
        }
        self.transport.publish(topic, payload, QoS::AtLeastOnce).await?;
        metrics().control_published();
        Ok(())
    }

    /// Service transport I/O for at most `max_wait`
    pub async fn poll(&mut self, max_wait: Duration) -> Vec<TransportEvent> {
        self.transport.poll(max_wait).await
    }

    /// Protocol-level disconnect
    pub async fn disconnect(&mut self) -> ListenerResult<()> {
        let result = self.transport.disconnect().await;
        self.transition(ConnectionEvent::DisconnectRequested);
        result.map_err(Into::into)
    }
}
