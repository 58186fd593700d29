//! Immutable startup configuration for the synchronization engine.
//!
//! A [`SyncConfig`] is built once (from a TOML file, environment overrides
//! or code) and then handed to the engine by value.  Nothing reconfigures it
//! at runtime.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::SyncError;

/// Static username/password pair for the broker.  The password is wiped from
/// memory when the value is dropped.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field(
                "password",
                if self.password.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .finish()
    }
}

/// Reconnect backoff bounds, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_max_ms")]
    pub max_ms: u64,
    /// Upper bound of the uniformly distributed jitter added to every delay.
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

fn default_base_ms() -> u64 {
    500
}
fn default_max_ms() -> u64 {
    30_000
}
fn default_jitter_ms() -> u64 {
    250
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: default_base_ms(),
            max_ms: default_max_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

/// Everything the engine needs to know at startup.
#[derive(Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Broker host name or IP address.
    #[serde(default = "default_broker_host")]
    pub broker_host: String,

    /// Broker TCP port.
    #[serde(default = "default_broker_port")]
    pub broker_port: u16,

    /// MQTT client identifier presented to the broker.
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Optional username/password.  Anonymous sessions when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,

    /// MQTT keep-alive interval.
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Upper bound for a single connect + subscribe attempt.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Readings older than this are reported as stale.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,

    /// Capacity of each notification bus lane.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl std::fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncConfig")
            .field("broker_host", &self.broker_host)
            .field("broker_port", &self.broker_port)
            .field("client_id", &self.client_id)
            .field("credentials", &self.credentials)
            .field("keep_alive_secs", &self.keep_alive_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("backoff", &self.backoff)
            .field("stale_after_secs", &self.stale_after_secs)
            .field("event_capacity", &self.event_capacity)
            .finish()
    }
}

fn default_broker_host() -> String {
    "localhost".to_string()
}
fn default_broker_port() -> u16 {
    1883
}
fn default_client_id() -> String {
    "cultivo-dashboard".to_string()
}
fn default_keep_alive_secs() -> u64 {
    60
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_stale_after_secs() -> u64 {
    30
}
fn default_event_capacity() -> usize {
    256
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            broker_host: default_broker_host(),
            broker_port: default_broker_port(),
            client_id: default_client_id(),
            credentials: None,
            keep_alive_secs: default_keep_alive_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            backoff: BackoffConfig::default(),
            stale_after_secs: default_stale_after_secs(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl SyncConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Reject values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] describing the first offending field.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.broker_host.trim().is_empty() {
            return Err(SyncError::Config("broker_host must not be empty".into()));
        }
        if self.broker_port == 0 {
            return Err(SyncError::Config("broker_port must not be 0".into()));
        }
        if self.client_id.trim().is_empty() {
            return Err(SyncError::Config("client_id must not be empty".into()));
        }
        // rumqttc refuses keep-alive intervals below five seconds.
        if self.keep_alive_secs < 5 {
            return Err(SyncError::Config("keep_alive_secs must be at least 5".into()));
        }
        if self.connect_timeout_secs == 0 {
            return Err(SyncError::Config("connect_timeout_secs must not be 0".into()));
        }
        if self.backoff.base_ms == 0 || self.backoff.base_ms > self.backoff.max_ms {
            return Err(SyncError::Config(format!(
                "backoff bounds are inconsistent (base_ms = {}, max_ms = {})",
                self.backoff.base_ms, self.backoff.max_ms
            )));
        }
        if self.stale_after_secs == 0 {
            return Err(SyncError::Config("stale_after_secs must not be 0".into()));
        }
        if self.event_capacity == 0 {
            return Err(SyncError::Config("event_capacity must not be 0".into()));
        }
        Ok(())
    }
}
