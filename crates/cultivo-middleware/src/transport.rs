//! The broker transport seam.
//!
//! The [`ConnectionManager`][crate::connection::ConnectionManager] never
//! speaks MQTT directly.  It drives a [`Transport`] through one session at a
//! time:
//!
//! 1. [`Transport::connect`] – open the TCP session and authenticate.
//! 2. [`Transport::subscribe`] – subscribe the inbound topics and wait for
//!    the broker's acknowledgement.
//! 3. [`Transport::next_message`] – pull inbound publications until the
//!    session drops.
//! 4. [`Transport::disconnect`] – close the session.
//!
//! Outbound publications do not go through the transport itself (it is
//! owned by the supervisor task) but through the cloneable [`Publisher`]
//! handle returned after each successful connect.

use std::sync::Arc;

use async_trait::async_trait;
use cultivo_types::SyncError;

/// One inbound publication as received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    /// Arrival sequence stamped by the connection manager.  Strictly
    /// increasing over the lifetime of the manager, across sessions.
    pub sequence: u64,
}

/// Non-blocking send path of a live session.
pub trait Publisher: Send + Sync {
    /// Queue `payload` for `topic` at QoS 0.  Returns once the client has
    /// accepted the message locally; never waits for the broker.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Transport`] when the client refuses the message
    /// (e.g. its request queue is full or the session is gone).
    fn try_publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), SyncError>;
}

/// A broker client driven by the connection manager.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Open a new session.
    ///
    /// # Errors
    ///
    /// * [`SyncError::AuthRejected`] – the broker refused the credentials.
    ///   The manager treats this as terminal.
    /// * [`SyncError::Transport`] – anything else; retried with backoff.
    async fn connect(&mut self) -> Result<Arc<dyn Publisher>, SyncError>;

    /// Subscribe `topics`, in order, and return once every subscription has
    /// been acknowledged.
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), SyncError>;

    /// Wait for the next inbound publication.  The returned tuple is
    /// `(topic, payload)`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Transport`] when the session is lost.
    async fn next_message(&mut self) -> Result<(String, Vec<u8>), SyncError>;

    /// Close the current session, if any.  Must be safe to call repeatedly
    /// and when no session is open.
    async fn disconnect(&mut self);
}
