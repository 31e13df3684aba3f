//! Session credentials consumed by the listener
//!
//! Logging in is out of scope: the listener is handed an already
//! authenticated cookie header and only reads it. A [`CredentialSource`] is
//! asked again before every connect attempt, so a refreshed cookie is picked
//! up on the next reconnect.

use crate::config::{ConfigError, ListenerConfig};
use std::fmt;

/// An authenticated web session
#[derive(Clone, PartialEq)]
pub struct Credentials {
    pub user_id: String,
    /// Random per-run id, sent as `d` in the auth blob
    pub client_id: String,
    pub domain: String,
    /// Full `Cookie` header value
    pub cookie_header: String,
    pub user_agent: String,
}

impl Credentials {
    /// Host of the push edge, e.g. `edge-chat.messenger.com`
    pub fn edge_host(&self) -> String {
        format!("edge-chat.{}", self.domain)
    }

    /// Origin header the web client would send
    pub fn origin(&self) -> String {
        format!("https://www.{}", self.domain)
    }
}

// Cookie values are never printed
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user_id", &self.user_id)
            .field("client_id", &self.client_id)
            .field("domain", &self.domain)
            .field("cookie_header", &"***")
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

/// Supplies credentials for each connect attempt
pub trait CredentialSource: Send + Sync {
    fn credentials(&self) -> Result<Credentials, ConfigError>;
}

impl CredentialSource for Credentials {
    fn credentials(&self) -> Result<Credentials, ConfigError> {
        Ok(self.clone())
    }
}

/// Reads the cookie header from an environment variable on every call
#[derive(Debug, Clone, PartialEq)]
pub struct EnvCredentialSource {
    pub user_id: String,
    pub client_id: String,
    pub domain: String,
    pub cookie_env: String,
    pub user_agent: String,
}

impl EnvCredentialSource {
    /// Whether the cookie variable is currently set to something non-empty
    pub fn cookie_available(&self) -> bool {
        self.credentials().is_ok()
    }
}

impl CredentialSource for EnvCredentialSource {
    fn credentials(&self) -> Result<Credentials, ConfigError> {
        let cookie_header = ListenerConfig::get_env_var_required(&self.cookie_env)?;
        if cookie_header.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(format!(
                "{} is set but empty",
                self.cookie_env
            )));
        }

        Ok(Credentials {
            user_id: self.user_id.clone(),
            client_id: self.client_id.clone(),
            domain: self.domain.clone(),
            cookie_header,
            user_agent: self.user_agent.clone(),
        })
    }
}

/// Random hexadecimal client id, one per run
pub fn generate_client_id() -> String {
    let id = uuid::Uuid::new_v4().as_u128() as u32 & 0x7fff_ffff;
    format!("{id:x}")
}
