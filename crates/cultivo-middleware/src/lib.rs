//! `cultivo-middleware` – The Nervous System
//!
//! Owns the single upstream broker session and routes notifications between
//! components without caring about the data's meaning.
//!
//! # Modules
//!
//! - [`bus`] – typed, topic-based notification bus built on Tokio broadcast
//!   channels (connection transitions, reading updates, sent commands).
//! - [`transport`] – the [`Transport`] trait every broker client implements.
//! - [`mqtt`] – [`MqttTransport`], the `rumqttc`-backed production transport.
//! - [`backoff`] – capped, jittered exponential reconnect delays.
//! - [`sim`] – [`SimTransport`], an in-memory broker stand-in for tests and
//!   offline runs.
//! - [`connection`] – [`ConnectionManager`]: connect, subscribe-on-connect,
//!   reconnect with backoff, publish gating and clean shutdown.

pub mod backoff;
pub mod bus;
pub mod connection;
pub mod mqtt;
pub mod sim;
pub mod transport;

pub use backoff::Backoff;
pub use bus::{EventBus, Topic, TopicReceiver};
pub use connection::{ConnectionManager, DeliveryHandler};
pub use mqtt::MqttTransport;
pub use sim::{SimBroker, SimTransport};
pub use transport::{InboundMessage, Publisher, Transport};
