//! Headless, typed, topic-based notification bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others, and in particular without ever blocking the delivery task that
//! publishes reading updates.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Connection`] | Connection manager state transitions |
//! | [`Topic::Readings`] | High-frequency sensor reading updates |
//! | [`Topic::Commands`] | Low-frequency actuator commands handed to the broker |

use cultivo_types::{Event, EventPayload};
use tokio::sync::broadcast;
use tracing::warn;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Routing lanes of the notification bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Connection,
    Readings,
    Commands,
}

impl Topic {
    /// The lane an event payload is routed to.
    pub fn of(payload: &EventPayload) -> Self {
        match payload {
            EventPayload::ConnectionChanged(_) => Topic::Connection,
            EventPayload::ReadingUpdated { .. } => Topic::Readings,
            EventPayload::CommandSent(_) => Topic::Commands,
        }
    }
}

/// Shared notification bus. Clone it cheaply – all clones share the same
/// underlying broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    connection: broadcast::Sender<Event>,
    readings: broadcast::Sender<Event>,
    commands: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus with the given per-lane capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0, as [`broadcast::channel`] does.
    pub fn new(capacity: usize) -> Self {
        let (connection, _) = broadcast::channel(capacity);
        let (readings, _) = broadcast::channel(capacity);
        let (commands, _) = broadcast::channel(capacity);
        Self {
            connection,
            readings,
            commands,
        }
    }

    /// Publish `event` on the lane matching its payload.
    ///
    /// Returns the number of subscribers that were handed the event.  Having
    /// no subscriber is a normal condition and yields `0`.
    pub fn publish(&self, event: Event) -> usize {
        let topic = Topic::of(&event.payload);
        self.sender(topic).send(event).unwrap_or(0)
    }

    /// Subscribe to one lane.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.sender(topic).subscribe(),
        }
    }

    /// Number of live subscribers on a lane.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.sender(topic).receiver_count()
    }

    fn sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Connection => &self.connection,
            Topic::Readings => &self.readings,
            Topic::Commands => &self.commands,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// An async receiver bound to a single [`Topic`] lane.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this lane.
    ///
    /// Returns:
    /// * `Ok(event)` – a successfully received event.
    /// * `Err(broadcast::error::RecvError::Lagged(n))` – the subscriber fell
    ///   behind and `n` messages were dropped.
    /// * `Err(broadcast::error::RecvError::Closed)` – the bus has shut down.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Wait for the next event, skipping over lag gaps.
    ///
    /// Returns `None` once the bus is closed.
    pub async fn next(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = ?self.topic, lagged_by = n, "bus subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking poll; `None` when nothing is buffered.
    pub fn try_next(&mut self) -> Option<Event> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}
