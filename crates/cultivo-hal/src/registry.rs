//! [`TopicRegistry`] – central channel table and topic resolver.
//!
//! The registry stores every [`Channel`] the process knows about, in
//! registration order.  Lookups go both ways:
//!
//! * by logical name, for the command path ([`TopicRegistry::resolve`]);
//! * by wire topic, for the ingress path ([`TopicRegistry::by_topic`]).
//!
//! A registry is immutable once built, so it is shared across threads behind
//! a plain `Arc` with no locking.

use std::collections::HashMap;

use cultivo_types::{Channel, Direction, SyncError, ValueKind};
use tracing::debug;

/// Immutable, ordered channel table.
#[derive(Debug, Clone, Default)]
pub struct TopicRegistry {
    channels: Vec<Channel>,
    by_name: HashMap<String, usize>,
    by_topic: HashMap<String, usize>,
}

impl TopicRegistry {
    /// Start building a registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Build a registry from an ordered list of channels.
    ///
    /// # Errors
    ///
    /// See [`RegistryBuilder::build`].
    pub fn from_channels(channels: Vec<Channel>) -> Result<Self, SyncError> {
        RegistryBuilder { channels }.build()
    }

    /// Look up a channel by its logical name.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UnknownChannel`] when no channel has that name.
    pub fn resolve(&self, name: &str) -> Result<&Channel, SyncError> {
        self.by_name
            .get(name)
            .map(|&idx| &self.channels[idx])
            .ok_or_else(|| SyncError::UnknownChannel(name.to_string()))
    }

    /// Reverse lookup from a wire topic.
    pub fn by_topic(&self, wire_topic: &str) -> Option<&Channel> {
        self.by_topic.get(wire_topic).map(|&idx| &self.channels[idx])
    }

    /// Every channel, in registration order.
    pub fn all(&self) -> &[Channel] {
        &self.channels
    }

    /// Inbound channels only, in registration order.
    pub fn inbound(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter().filter(|c| c.direction == Direction::Inbound)
    }

    /// Outbound channels only, in registration order.
    pub fn outbound(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter().filter(|c| c.direction == Direction::Outbound)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

/// Collects channels and checks them before freezing them into a
/// [`TopicRegistry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    channels: Vec<Channel>,
}

impl RegistryBuilder {
    /// Append an arbitrary channel.
    pub fn channel(mut self, channel: Channel) -> Self {
        self.channels.push(channel);
        self
    }

    /// Append an inbound (sensor) channel.
    pub fn sensor(self, name: &str, wire_topic: &str, kind: ValueKind) -> Self {
        self.channel(Channel::new(name, wire_topic, Direction::Inbound, kind))
    }

    /// Append an outbound (actuator) channel.
    pub fn actuator(self, name: &str, wire_topic: &str, kind: ValueKind) -> Self {
        self.channel(Channel::new(name, wire_topic, Direction::Outbound, kind))
    }

    /// Freeze the table.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] when a name or topic is empty or
    /// duplicated, a topic contains an MQTT wildcard, or a numeric range is
    /// inverted or not finite.
    pub fn build(self) -> Result<TopicRegistry, SyncError> {
        let mut by_name = HashMap::with_capacity(self.channels.len());
        let mut by_topic = HashMap::with_capacity(self.channels.len());

        for (idx, channel) in self.channels.iter().enumerate() {
            if channel.name.trim().is_empty() {
                return Err(SyncError::Config(format!("channel #{idx} has an empty name")));
            }
            if channel.wire_topic.trim().is_empty() {
                return Err(SyncError::Config(format!(
                    "channel '{}' has an empty wire topic",
                    channel.name
                )));
            }
            // Wildcards would make the reverse lookup ambiguous.
            if channel.wire_topic.contains(['+', '#']) {
                return Err(SyncError::Config(format!(
                    "channel '{}' uses a wildcard topic '{}'",
                    channel.name, channel.wire_topic
                )));
            }
            if let ValueKind::Numeric { min, max } = channel.kind
                && !(min.is_finite() && max.is_finite() && min <= max)
            {
                return Err(SyncError::Config(format!(
                    "channel '{}' has an invalid range {min}..={max}",
                    channel.name
                )));
            }
            if by_name.insert(channel.name.clone(), idx).is_some() {
                return Err(SyncError::Config(format!(
                    "channel name '{}' registered twice",
                    channel.name
                )));
            }
            if by_topic.insert(channel.wire_topic.clone(), idx).is_some() {
                return Err(SyncError::Config(format!(
                    "wire topic '{}' registered twice",
                    channel.wire_topic
                )));
            }
        }

        debug!(
            channels = self.channels.len(),
            inbound = self.channels.iter().filter(|c| c.is_inbound()).count(),
            "topic registry built"
        );
        Ok(TopicRegistry {
            channels: self.channels,
            by_name,
            by_topic,
        })
    }
}
