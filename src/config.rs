//! Configuration system for the Messenger listener
//!
//! Configuration is read from a TOML file. Only the user id is mandatory;
//! every other field has a default. Secrets never live in the file: the
//! cookie header is read from the environment variable named by
//! `session.cookie_env` each time a connection is attempted.

use crate::listener::health::{HealthMonitor, ReconnectConfig};
use crate::listener::ListenerSettings;
use crate::session::{generate_client_id, EnvCredentialSource};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Main listener configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListenerConfig {
    pub session: SessionSection,
    #[serde(default)]
    pub listener: ListenerSection,
    #[serde(default)]
    pub mqtt: MqttSection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
}

/// Session section: who we are and how to reach the edge
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSection {
    /// Numeric user id of the logged-in account
    pub user_id: String,
    /// Per-run client id; generated when absent
    pub client_id: Option<String>,
    /// Either "messenger.com" or "facebook.com"
    #[serde(default = "default_domain")]
    pub domain: String,
    /// Environment variable containing the cookie header
    #[serde(default = "default_cookie_env")]
    pub cookie_env: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_domain() -> String {
    "messenger.com".to_string()
}

fn default_cookie_env() -> String {
    "MESSENGER_COOKIE".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/120.0.0.0 Safari/537.36"
        .to_string()
}

/// Listener section: presence flags and loop timing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListenerSection {
    #[serde(default = "default_true")]
    pub chat_on: bool,
    #[serde(default = "default_true")]
    pub foreground: bool,
    /// Interval between loop ticks (default: 1000)
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Longest a single reactor step may wait for I/O (default: 50)
    #[serde(default = "default_poll_wait_ms")]
    pub poll_wait_ms: u64,
    /// Capacity of the event queue (default: 64)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// How long a full queue may block a producer before dropping (default: 50)
    #[serde(default = "default_enqueue_timeout_ms")]
    pub enqueue_timeout_ms: u64,
    /// Seed for the sequence id; without it the listener waits for one
    pub sequence_id: Option<u64>,
}

fn default_true() -> bool {
    true
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_poll_wait_ms() -> u64 {
    50
}

fn default_queue_capacity() -> usize {
    64
}

fn default_enqueue_timeout_ms() -> u64 {
    50
}

impl Default for ListenerSection {
    fn default() -> Self {
        Self {
            chat_on: true,
            foreground: true,
            tick_interval_ms: default_tick_interval_ms(),
            poll_wait_ms: default_poll_wait_ms(),
            queue_capacity: default_queue_capacity(),
            enqueue_timeout_ms: default_enqueue_timeout_ms(),
            sequence_id: None,
        }
    }
}

/// MQTT section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// Keep-alive interval in seconds (default: 10)
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// ConnAck timeout in seconds (default: 30)
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_keep_alive_secs() -> u64 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    30
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            keep_alive_secs: default_keep_alive_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Reconnect section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectSection {
    /// Give up after this many consecutive attempts (default: never)
    pub max_attempts: Option<u32>,
    #[serde(default = "default_backoff_pattern_ms")]
    pub backoff_pattern_ms: Vec<u64>,
    #[serde(default = "default_sustained_delay_ms")]
    pub sustained_delay_ms: u64,
}

fn default_backoff_pattern_ms() -> Vec<u64> {
    ReconnectConfig::default().backoff_pattern
}

fn default_sustained_delay_ms() -> u64 {
    ReconnectConfig::default().sustained_delay
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_pattern_ms: default_backoff_pattern_ms(),
            sustained_delay_ms: default_sustained_delay_ms(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid user ID: {0}")]
    InvalidUserId(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ListenerConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ListenerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check field values that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_user_id(&self.session.user_id)?;

        if self.session.domain.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "session.domain must not be empty".to_string(),
            ));
        }
        if self.session.cookie_env.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "session.cookie_env must name an environment variable".to_string(),
            ));
        }
        if self.listener.queue_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "listener.queue_capacity must be greater than 0".to_string(),
            ));
        }
        if self.listener.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "listener.tick_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.mqtt.keep_alive_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.keep_alive_secs must be greater than 0".to_string(),
            ));
        }
        if self.mqtt.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.connect_timeout_secs must be greater than 0".to_string(),
            ));
        }

        HealthMonitor::validate_reconnect_config(&self.reconnect_config())
            .map_err(|e| ConfigError::InvalidConfig(format!("reconnect: {e}")))
    }

    /// Reconnection policy for the supervisor
    pub fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig {
            max_attempts: self.reconnect.max_attempts,
            backoff_pattern: self.reconnect.backoff_pattern_ms.clone(),
            sustained_delay: self.reconnect.sustained_delay_ms,
        }
    }

    /// Runtime settings for [`Listener`](crate::listener::Listener)
    pub fn listener_settings(&self) -> ListenerSettings {
        ListenerSettings {
            chat_on: self.listener.chat_on,
            foreground: self.listener.foreground,
            tick_interval: Duration::from_millis(self.listener.tick_interval_ms),
            poll_wait: Duration::from_millis(self.listener.poll_wait_ms),
            queue_capacity: self.listener.queue_capacity,
            enqueue_timeout: Duration::from_millis(self.listener.enqueue_timeout_ms),
            sequence_id: self.listener.sequence_id,
            keep_alive: Duration::from_secs(self.mqtt.keep_alive_secs),
            connect_timeout: Duration::from_secs(self.mqtt.connect_timeout_secs),
            reconnect: self.reconnect_config(),
        }
    }

    /// Credential source that rereads the cookie variable on every connect
    pub fn credential_source(&self) -> EnvCredentialSource {
        EnvCredentialSource {
            user_id: self.session.user_id.clone(),
            client_id: self
                .session
                .client_id
                .clone()
                .unwrap_or_else(generate_client_id),
            domain: self.session.domain.clone(),
            cookie_env: self.session.cookie_env.clone(),
            user_agent: self.session.user_agent.clone(),
        }
    }

    /// Helper method to get environment variable with error propagation
    pub(crate) fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
        std::env::var(env_var_name)
            .map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[session]
user_id = "100012345678901"
client_id = "1a2b3c4d"
cookie_env = "TEST_MESSENGER_COOKIE"

[listener]
tick_interval_ms = 10
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

/// User ids are decimal account numbers
fn validate_user_id(user_id: &str) -> Result<(), ConfigError> {
    if user_id.is_empty() || !user_id.chars().all(|c| c.is_ascii_digit()) {
        return Err(ConfigError::InvalidUserId(format!(
            "User ID '{user_id}' must be a non-empty decimal number"
        )));
    }
    Ok(())
}
