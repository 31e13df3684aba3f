//! Pure connection-health and reconnection logic
//!
//! This module contains pure functions for connection state transitions,
//! reconnection decisions and disconnect classification. The supervisor is
//! the only caller that applies their results.

use crate::transport::DisconnectCause;
use tracing::{error, info, warn};

/// Connection state owned by the [`ConnectionSupervisor`](super::supervisor::ConnectionSupervisor)
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// No connection and none in progress
    Disconnected,
    /// A connect attempt is in flight
    Connecting,
    /// Confirmed by ConnAck and ready for publishes
    Connected,
    /// Credentials rejected; terminal
    FatalError(String),
}

/// Reconnection configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Maximum number of consecutive attempts (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Backoff pattern in milliseconds, one entry per attempt
    pub backoff_pattern: Vec<u64>,
    /// Delay to use after the pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_pattern: vec![250, 500, 1000, 2000],
            sustained_delay: 5000,
        }
    }
}

impl ReconnectConfig {
    /// Backoff delay before the given 1-based attempt
    ///
    /// The first attempt after a disconnect goes out immediately.
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        if attempt <= 1 {
            return 0;
        }
        let index = (attempt - 2) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }
}

/// Events that drive [`ConnectionState`] transitions
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// A connect attempt started
    ConnectStarted,
    /// ConnAck accepted
    ConnAckReceived,
    /// The attempt failed for a retryable reason
    ConnectFailed(String),
    /// A live connection dropped
    ConnectionLost(String),
    /// The backend rejected our credentials
    CredentialsRejected(String),
    /// We closed the connection ourselves
    DisconnectRequested,
}

/// Decision result for reconnection attempts
#[derive(Debug, PartialEq)]
pub enum ReconnectionDecision {
    /// Proceed with reconnection attempt
    Proceed { attempt: u32, delay_ms: u64 },
    /// Abort reconnection - shutdown requested
    AbortShutdownRequested,
    /// Abort reconnection - max attempts exceeded
    AbortMaxAttemptsExceeded,
}

/// What a disconnect means for the event stream
#[derive(Debug, Clone, PartialEq)]
pub enum HealthTransition {
    /// Emit `Disconnect { reason }` and reconnect
    Retry { reason: String },
    /// End the stream with a login error
    Fatal { reason: String },
}

/// Pure health monitoring and reconnection decision logic
pub struct HealthMonitor;

impl HealthMonitor {
    /// Determine if reconnection should be attempted (pure function)
    pub fn should_attempt_reconnection(
        current_attempts: u32,
        config: &ReconnectConfig,
        shutdown_requested: bool,
    ) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }

        if let Some(max_attempts) = config.max_attempts {
            if current_attempts >= max_attempts {
                return ReconnectionDecision::AbortMaxAttemptsExceeded;
            }
        }

        let attempt = current_attempts + 1;
        ReconnectionDecision::Proceed {
            attempt,
            delay_ms: config.calculate_backoff_delay(attempt),
        }
    }

    /// Determine next state after a connection event (pure function)
    ///
    /// `FatalError` is terminal: no event leaves it.
    pub fn determine_next_state(
        current_state: &ConnectionState,
        event: ConnectionEvent,
    ) -> ConnectionState {
        if let ConnectionState::FatalError(_) = current_state {
            return current_state.clone();
        }

        match event {
            ConnectionEvent::ConnectStarted => ConnectionState::Connecting,
            ConnectionEvent::ConnAckReceived => ConnectionState::Connected,
            ConnectionEvent::ConnectFailed(reason) => {
                warn!("MQTT connect attempt failed: {}", reason);
                ConnectionState::Disconnected
            }
            ConnectionEvent::ConnectionLost(reason) => {
                warn!("MQTT connection lost: {}", reason);
                ConnectionState::Disconnected
            }
            ConnectionEvent::CredentialsRejected(reason) => {
                error!("MQTT credentials rejected: {}", reason);
                ConnectionState::FatalError(reason)
            }
            ConnectionEvent::DisconnectRequested => ConnectionState::Disconnected,
        }
    }

    /// Classify an unsolicited disconnect (pure function)
    pub fn classify_disconnect(cause: &DisconnectCause) -> HealthTransition {
        match cause {
            DisconnectCause::ConnectionLost => HealthTransition::Retry {
                reason: "Connection lost, retrying".to_string(),
            },
            // Usually a socket buffer error misreported by the stack
            DisconnectCause::ConnectionError(_) => HealthTransition::Retry {
                reason: "Connection error, retrying".to_string(),
            },
            DisconnectCause::NoConnection => HealthTransition::Retry {
                reason: "MQTT Error: no connection, retrying".to_string(),
            },
            DisconnectCause::Refused(_) => HealthTransition::Fatal {
                reason: "MQTT connection refused".to_string(),
            },
            DisconnectCause::Other(err) => {
                error!("MQTT Error: {}", err);
                HealthTransition::Retry {
                    reason: format!("MQTT Error: {err}, retrying"),
                }
            }
        }
    }

    /// Check if connection state allows publishing (pure function)
    pub fn can_publish(state: &ConnectionState) -> bool {
        matches!(state, ConnectionState::Connected)
    }

    /// Log connection state transition (pure logging function)
    pub fn log_state_transition(from: &ConnectionState, to: &ConnectionState) {
        match (from, to) {
            (ConnectionState::Connecting, ConnectionState::Connected) => {
                info!("MQTT connection established");
            }
            (ConnectionState::Connected, ConnectionState::Disconnected) => {
                warn!("MQTT connection dropped");
            }
            (_, ConnectionState::FatalError(reason)) => {
                error!("MQTT connection permanently failed: {}", reason);
            }
            _ => {
                info!("MQTT connection state: {:?} -> {:?}", from, to);
            }
        }
    }

    /// Validate reconnection configuration (pure function)
    pub fn validate_reconnect_config(config: &ReconnectConfig) -> Result<(), String> {
        if let Some(max_attempts) = config.max_attempts {
            if max_attempts == 0 {
                return Err("max_attempts must be greater than 0 or None for unlimited".to_string());
            }
        }

        if config.sustained_delay == 0 {
            return Err("sustained_delay must be greater than 0".to_string());
        }

        Ok(())
    }
}
