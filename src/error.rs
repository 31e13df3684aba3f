//! Error types for the Messenger listener
//!
//! Every failure the listener can observe maps onto one of four classes.
//! Only fatal ones reach the consumer as an `Err`; the rest are logged,
//! counted, and absorbed by the listener loop.

use crate::config::ConfigError;
use crate::events::FrameDecodeError;
use crate::transport::TransportError;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// How the listener reacts to a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Propagated to the consumer and never retried
    FatalAuth,
    /// Network hiccup or lost server queue; retried, may trigger a resync
    Transient,
    /// Malformed frame; skipped
    ParseFailure,
    /// Unexpected but harmless server signal; logged
    ProtocolWarning,
}

/// Main error type for listener operations
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Not logged in: {message}")]
    NotLoggedIn { message: String },

    #[error("Not connected: {message}")]
    NotConnected { message: String },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Frame decode error: {0}")]
    Decode(#[from] FrameDecodeError),

    #[error("Protocol warning: {message}")]
    Protocol { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ListenerError {
    /// Classify this error (pure function)
    pub fn class(&self) -> ErrorClass {
        match self {
            ListenerError::NotLoggedIn { .. } => ErrorClass::FatalAuth,
            ListenerError::Transport(e) if e.is_credential_rejection() => ErrorClass::FatalAuth,
            // Credentials that cannot be read are as fatal as rejected ones
            ListenerError::Config(_) => ErrorClass::FatalAuth,
            ListenerError::NotConnected { .. }
            | ListenerError::Transport(_)
            | ListenerError::Internal { .. } => ErrorClass::Transient,
            ListenerError::Decode(_) => ErrorClass::ParseFailure,
            ListenerError::Protocol { .. } => ErrorClass::ProtocolWarning,
        }
    }

    /// Whether this error ends the event sequence
    ///
    /// Exhausting an opt-in reconnect limit is terminal without being an
    /// authentication failure.
    pub fn is_terminal(&self) -> bool {
        self.class() == ErrorClass::FatalAuth || matches!(self, ListenerError::NotConnected { .. })
    }

    /// Create not-logged-in error
    pub fn not_logged_in<S: Into<String>>(message: S) -> Self {
        Self::NotLoggedIn {
            message: message.into(),
        }
    }

    /// Create not-connected error
    pub fn not_connected<S: Into<String>>(message: S) -> Self {
        Self::NotConnected {
            message: message.into(),
        }
    }

    /// Create protocol warning
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Error text with secrets removed, safe to log
    pub fn sanitized(&self) -> String {
        sanitize_error_message(&self.to_string())
    }
}

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(password|token|key|secret|sync_token|xs|c_user|datr|fr|sb)\s*[=:]\s*[^\s;,]+")
        .expect("secret pattern is valid")
});

static COOKIE_HEADER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(cookie)\s*:\s*[^\n]+").expect("cookie pattern is valid"));

/// Sanitize error messages to prevent credential leakage into logs
pub fn sanitize_error_message(message: &str) -> String {
    let sanitized = COOKIE_HEADER_PATTERN.replace_all(message, "${1}: ***");
    let mut sanitized = SECRET_PATTERN
        .replace_all(&sanitized, "${1}=***")
        .to_string();

    // Truncate very long messages - ensure total length is <= 500
    if sanitized.len() > 500 {
        let truncate_suffix = "...[truncated]";
        let mut cut = 500 - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], truncate_suffix);
    }

    sanitized
}

/// Result type for listener operations
pub type ListenerResult<T> = Result<T, ListenerError>;
