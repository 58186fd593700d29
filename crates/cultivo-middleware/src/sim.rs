//! In-process broker simulation for CI testing without a real MQTT broker.
//!
//! [`SimTransport`] implements [`Transport`] entirely in memory.  Its paired
//! [`SimBroker`] handle plays the broker's part: it injects publications,
//! drops the session, scripts connect outcomes and records everything the
//! client did.  This lets the full Cultivo stack run in headless tests and
//! in the CLI's `--sim` mode.
//!
//! ```rust
//! use cultivo_middleware::sim::SimTransport;
//!
//! let (transport, broker) = SimTransport::new();
//! broker.deliver("rack0/sens/water/temperature", "23.5");
//! # drop(transport);
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use cultivo_types::SyncError;
use tokio::sync::mpsc;

use crate::transport::{Publisher, Transport};

enum SimMessage {
    Publish(String, Vec<u8>),
    /// Ends the session with this number, if it is still the open one.
    DropSession(u64),
}

#[derive(Default)]
struct SimState {
    connect_script: VecDeque<Result<(), SyncError>>,
    connect_attempts: usize,
    disconnects: usize,
    subscriptions: Vec<Vec<String>>,
    published: Vec<(String, Vec<u8>)>,
    /// Incremented on every successful connect; publishers from an older
    /// session are refused.
    session: u64,
    online: bool,
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Client side of the simulated broker.
pub struct SimTransport {
    state: Arc<Mutex<SimState>>,
    inbox: mpsc::UnboundedReceiver<SimMessage>,
    connected: bool,
}

/// Broker side of the simulation.  Cheap to clone.
#[derive(Clone)]
pub struct SimBroker {
    state: Arc<Mutex<SimState>>,
    outbox: mpsc::UnboundedSender<SimMessage>,
}

impl SimTransport {
    pub fn new() -> (Self, SimBroker) {
        let state = Arc::new(Mutex::new(SimState::default()));
        let (outbox, inbox) = mpsc::unbounded_channel();
        (
            Self {
                state: Arc::clone(&state),
                inbox,
                connected: false,
            },
            SimBroker { state, outbox },
        )
    }
}

impl SimBroker {
    /// Publish `payload` on `topic` towards the client.  Publications sent
    /// while no session is open are delivered once one is.
    pub fn deliver(&self, topic: impl Into<String>, payload: impl Into<Vec<u8>>) {
        let _ = self
            .outbox
            .send(SimMessage::Publish(topic.into(), payload.into()));
    }

    /// Kill the current session as if the TCP connection had dropped.
    /// Does nothing while no session is open.
    pub fn drop_session(&self) {
        let session = {
            let state = lock(&self.state);
            if !state.online {
                return;
            }
            state.session
        };
        let _ = self.outbox.send(SimMessage::DropSession(session));
    }

    /// Queue the outcome of upcoming connect attempts, oldest first.
    /// Attempts beyond the script succeed.
    pub fn script_connects(&self, outcomes: impl IntoIterator<Item = Result<(), SyncError>>) {
        lock(&self.state).connect_script.extend(outcomes);
    }

    pub fn connect_attempts(&self) -> usize {
        lock(&self.state).connect_attempts
    }

    /// Number of sessions the client closed itself.
    pub fn disconnects(&self) -> usize {
        lock(&self.state).disconnects
    }

    /// Topic lists of every subscribe call, in call order.
    pub fn subscriptions(&self) -> Vec<Vec<String>> {
        lock(&self.state).subscriptions.clone()
    }

    /// Everything the client published, in order.
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        lock(&self.state).published.clone()
    }

    pub fn is_online(&self) -> bool {
        lock(&self.state).online
    }
}

#[async_trait]
impl Transport for SimTransport {
    async fn connect(&mut self) -> Result<Arc<dyn Publisher>, SyncError> {
        let mut state = lock(&self.state);
        state.connect_attempts += 1;
        state.connect_script.pop_front().unwrap_or(Ok(()))?;
        state.session += 1;
        state.online = true;
        self.connected = true;
        Ok(Arc::new(SimPublisher {
            state: Arc::clone(&self.state),
            session: state.session,
        }))
    }

    async fn subscribe(&mut self, topics: &[String]) -> Result<(), SyncError> {
        if !self.connected {
            return Err(SyncError::Transport("no open simulated session".to_string()));
        }
        lock(&self.state).subscriptions.push(topics.to_vec());
        Ok(())
    }

    async fn next_message(&mut self) -> Result<(String, Vec<u8>), SyncError> {
        if !self.connected {
            return Err(SyncError::Transport("no open simulated session".to_string()));
        }
        loop {
            match self.inbox.recv().await {
                Some(SimMessage::Publish(topic, payload)) => return Ok((topic, payload)),
                Some(SimMessage::DropSession(session)) => {
                    let mut state = lock(&self.state);
                    if session != state.session {
                        continue;
                    }
                    state.online = false;
                    self.connected = false;
                    return Err(SyncError::Transport("simulated session drop".to_string()));
                }
                // Every broker handle is gone; the session simply stays quiet.
                None => return std::future::pending().await,
            }
        }
    }

    async fn disconnect(&mut self) {
        if self.connected {
            self.connected = false;
            let mut state = lock(&self.state);
            state.online = false;
            state.disconnects += 1;
        }
    }
}

struct SimPublisher {
    state: Arc<Mutex<SimState>>,
    session: u64,
}

impl Publisher for SimPublisher {
    fn try_publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), SyncError> {
        let mut state = lock(&self.state);
        if !state.online || state.session != self.session {
            return Err(SyncError::Transport("simulated session is closed".to_string()));
        }
        state.published.push((topic.to_string(), payload));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_failures_come_first() {
        let (mut transport, broker) = SimTransport::new();
        broker.script_connects([Err(SyncError::Transport("refused".into()))]);

        assert!(transport.connect().await.is_err());
        assert!(transport.connect().await.is_ok());
        assert_eq!(broker.connect_attempts(), 2);
        assert!(broker.is_online());
    }

    #[tokio::test]
    async fn deliveries_reach_the_client() -> Result<(), Box<dyn std::error::Error>> {
        let (mut transport, broker) = SimTransport::new();
        transport.connect().await?;
        broker.deliver("rack0/sens/water/ph", "6.1");

        let (topic, payload) = transport.next_message().await?;
        assert_eq!(topic, "rack0/sens/water/ph");
        assert_eq!(payload, b"6.1");
        Ok(())
    }

    #[tokio::test]
    async fn stale_publisher_is_refused_after_drop() -> Result<(), Box<dyn std::error::Error>> {
        let (mut transport, broker) = SimTransport::new();
        let old = transport.connect().await?;
        broker.drop_session();
        assert!(transport.next_message().await.is_err());
        assert!(old.try_publish("rack0/actu/light/control", b"80".to_vec()).is_err());

        let fresh = transport.connect().await?;
        assert!(old.try_publish("rack0/actu/light/control", b"80".to_vec()).is_err());
        fresh.try_publish("rack0/actu/light/control", b"80".to_vec())?;
        assert_eq!(broker.published().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn drop_while_offline_is_ignored() -> Result<(), Box<dyn std::error::Error>> {
        let (mut transport, broker) = SimTransport::new();
        broker.drop_session();
        transport.connect().await?;
        broker.deliver("rack0/sens/water/ph", "6.3");

        let (topic, _) = transport.next_message().await?;
        assert_eq!(topic, "rack0/sens/water/ph");
        assert!(broker.is_online());
        Ok(())
    }

    #[tokio::test]
    async fn drop_aimed_at_a_closed_session_is_skipped() -> Result<(), Box<dyn std::error::Error>> {
        let (mut transport, broker) = SimTransport::new();
        transport.connect().await?;
        broker.drop_session();
        // The client closes the session before reading the drop.
        transport.disconnect().await;
        transport.connect().await?;
        broker.deliver("rack0/sens/water/ec", "1.8");

        let (topic, _) = transport.next_message().await?;
        assert_eq!(topic, "rack0/sens/water/ec");
        Ok(())
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() -> Result<(), Box<dyn std::error::Error>> {
        let (mut transport, broker) = SimTransport::new();
        transport.disconnect().await;
        transport.connect().await?;
        transport.disconnect().await;
        transport.disconnect().await;
        assert_eq!(broker.disconnects(), 1);
        assert!(!broker.is_online());
        Ok(())
    }
}
