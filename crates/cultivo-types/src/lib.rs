//! `cultivo-types` – shared vocabulary of the Cultivo synchronization engine.
//!
//! Every other crate in the workspace speaks in terms of these types:
//!
//! - [`Channel`] – one physical quantity or actuator, bound to a wire topic.
//! - [`Reading`] – the latest known value of an inbound channel plus its
//!   freshness metadata.
//! - [`Command`] – an operator request to change an outbound channel.
//! - [`ConnectionState`] – the broker session state machine.
//! - [`Event`] – notifications routed over the middleware event bus.
//! - [`SyncError`] – the error taxonomy shared by all components.
//! - [`config`] – the immutable startup configuration value.

pub mod config;

use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use config::{BackoffConfig, Credentials, SyncConfig};

/// Which way data flows on a channel, seen from this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Sensor data published by the rack and consumed here.
    Inbound,
    /// Actuator set-points published from here to the rack.
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => write!(f, "inbound"),
            Direction::Outbound => write!(f, "outbound"),
        }
    }
}

/// Shape of the values carried by a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValueKind {
    /// Finite decimal number.  Commands must fall inside `[min, max]`.
    Numeric { min: f64, max: f64 },
    /// On/off state.
    Boolean,
    /// Opaque UTF-8 string of at most `max_len` bytes.
    Text { max_len: usize },
}

/// A decoded channel value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Boolean(bool),
    Numeric(f64),
    Text(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Numeric(n) => write!(f, "{n}"),
            Value::Boolean(b) => write!(f, "{}", if *b { "on" } else { "off" }),
            Value::Text(s) => write!(f, "{s}"),
        }
    }
}

/// One physical quantity or actuator known to the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    /// Stable logical identifier, e.g. `"water_temp"`.
    pub name: String,
    /// MQTT topic the value travels on, e.g. `"rack0/sens/water/temperature"`.
    pub wire_topic: String,
    pub direction: Direction,
    pub kind: ValueKind,
}

impl Channel {
    pub fn new(
        name: impl Into<String>,
        wire_topic: impl Into<String>,
        direction: Direction,
        kind: ValueKind,
    ) -> Self {
        Self {
            name: name.into(),
            wire_topic: wire_topic.into(),
            direction,
            kind,
        }
    }

    pub fn is_inbound(&self) -> bool {
        self.direction == Direction::Inbound
    }
}

/// The stored record for one inbound channel.
///
/// A freshly created reading holds `value: None`, which is the explicit
/// "never seen" sentinel, and `sequence: 0`.  Arrival sequences handed to the
/// store therefore start at 1.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub value: Option<Value>,
    /// Highest arrival sequence applied so far.  Never decreases.
    pub sequence: u64,
    /// Monotonic timestamp of the last applied update.
    pub updated_at: Option<Instant>,
    /// Wall-clock timestamp of the last applied update, for display.
    pub received_at: Option<DateTime<Utc>>,
}

impl Reading {
    /// The "unknown" reading every inbound channel starts with.
    pub fn unknown() -> Self {
        Self {
            value: None,
            sequence: 0,
            updated_at: None,
            received_at: None,
        }
    }

    /// Age of the reading relative to `now`, or `None` if never updated.
    pub fn age_at(&self, now: Instant) -> Option<Duration> {
        self.updated_at
            .map(|at| now.saturating_duration_since(at))
    }
}

/// An accepted request to change an outbound channel's target value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: Uuid,
    pub channel: String,
    pub value: Value,
    pub issued_at: DateTime<Utc>,
}

impl Command {
    pub fn new(channel: impl Into<String>, value: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel: channel.into(),
            value,
            issued_at: Utc::now(),
        }
    }
}

/// Broker session state.  Only the connection manager changes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting to retry.  `attempt` is the 0-based retry index since the last
    /// stable session and doubles as the backoff exponent.
    Backoff { attempt: u32, next_retry_at: Instant },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Backoff {
                attempt,
                next_retry_at,
            } => {
                let wait = next_retry_at.saturating_duration_since(Instant::now());
                write!(
                    f,
                    "backoff (attempt {attempt}, retry in {:.1}s)",
                    wait.as_secs_f64()
                )
            }
        }
    }
}

/// Notification wrapper carried by the event bus.
#[derive(Debug, Clone)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. `"cultivo-middleware::connection"`
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// What happened.
#[derive(Debug, Clone)]
pub enum EventPayload {
    /// The connection manager moved to a new state.
    ConnectionChanged(ConnectionState),
    /// The store accepted a new value for an inbound channel.
    ReadingUpdated {
        channel: String,
        value: Value,
        sequence: u64,
    },
    /// A command was handed to the broker session.
    CommandSent(Command),
}

/// Error taxonomy shared by the registry, store, dispatcher and connection
/// manager.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncError {
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    #[error("Channel '{channel}' is {direction}")]
    WrongDirection { channel: String, direction: Direction },

    #[error("Invalid value for '{channel}': {reason}")]
    InvalidValue { channel: String, reason: String },

    #[error("Not connected to the broker")]
    NotConnected,

    #[error("Broker rejected credentials: {0}")]
    AuthRejected(String),

    #[error("Decode error on '{channel}': {reason}")]
    Decode { channel: String, reason: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection manager already started")]
    AlreadyStarted,

    #[error("Configuration error: {0}")]
    Config(String),
}
