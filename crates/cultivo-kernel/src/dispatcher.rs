//! [`CommandDispatcher`] – single interception point between operator input
//! and the broker.
//!
//! Before an actuator command reaches the [`CommandSink`], it must pass
//! through [`CommandDispatcher::submit`], which enforces, in order:
//!
//! 1. **Channel check** – the channel must be registered
//!    ([`SyncError::UnknownChannel`]).
//! 2. **Direction check** – the channel must be outbound
//!    ([`SyncError::WrongDirection`]).  Sensors are never written to.
//! 3. **Value check** – the value must match the channel's kind and range
//!    ([`SyncError::InvalidValue`]).
//!
//! Only then is the value encoded and handed to the sink.  A sink that is not
//! connected answers [`SyncError::NotConnected`], which is returned to the
//! caller unchanged: commands are never queued for later.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use cultivo_hal::TopicRegistry;
//! use cultivo_kernel::dispatcher::{CommandDispatcher, CommandSink};
//! use cultivo_middleware::EventBus;
//! use cultivo_types::{SyncError, Value, ValueKind};
//!
//! struct Offline;
//! impl CommandSink for Offline {
//!     fn publish(&self, _: &str, _: Vec<u8>) -> Result<(), SyncError> {
//!         Err(SyncError::NotConnected)
//!     }
//! }
//!
//! let registry = TopicRegistry::builder()
//!     .actuator("fan0", "rack0/actu/fan/control0",
//!               ValueKind::Numeric { min: 0.0, max: 100.0 })
//!     .build()
//!     .unwrap();
//! let dispatcher =
//!     CommandDispatcher::new(Arc::new(registry), Arc::new(Offline), EventBus::default());
//!
//! assert!(matches!(
//!     dispatcher.submit("fan0", Value::Numeric(150.0)),
//!     Err(SyncError::InvalidValue { .. })
//! ));
//! assert_eq!(
//!     dispatcher.submit("fan0", Value::Numeric(40.0)),
//!     Err(SyncError::NotConnected)
//! );
//! ```

use std::sync::Arc;

use cultivo_hal::{TopicRegistry, codec};
use cultivo_middleware::{ConnectionManager, EventBus};
use cultivo_types::{Channel, Command, Event, EventPayload, SyncError, Value};
use tracing::{debug, info};

const SOURCE: &str = "cultivo-kernel::dispatcher";

/// Where accepted commands are published.
pub trait CommandSink: Send + Sync {
    /// Hand `payload` to the broker for `wire_topic` without waiting for
    /// delivery.
    fn publish(&self, wire_topic: &str, payload: Vec<u8>) -> Result<(), SyncError>;
}

impl CommandSink for ConnectionManager {
    fn publish(&self, wire_topic: &str, payload: Vec<u8>) -> Result<(), SyncError> {
        ConnectionManager::publish(self, wire_topic, payload)
    }
}

/// Validates operator commands and hands them to a [`CommandSink`].
pub struct CommandDispatcher {
    registry: Arc<TopicRegistry>,
    sink: Arc<dyn CommandSink>,
    bus: EventBus,
}

impl CommandDispatcher {
    pub fn new(registry: Arc<TopicRegistry>, sink: Arc<dyn CommandSink>, bus: EventBus) -> Self {
        Self {
            registry,
            sink,
            bus,
        }
    }

    /// Validate `value` for `channel` and publish it.
    ///
    /// # Errors
    ///
    /// - [`SyncError::UnknownChannel`] – `channel` is not registered.
    /// - [`SyncError::WrongDirection`] – `channel` is a sensor.
    /// - [`SyncError::InvalidValue`] – wrong kind, out of range or too long.
    /// - [`SyncError::NotConnected`] / [`SyncError::Transport`] – from the
    ///   sink, unchanged.
    pub fn submit(&self, channel: &str, value: Value) -> Result<Command, SyncError> {
        let descriptor = self.outbound(channel)?;
        codec::validate(&descriptor.kind, &value).map_err(|e| SyncError::InvalidValue {
            channel: channel.to_string(),
            reason: e.to_string(),
        })?;

        let payload = codec::encode(&value);
        if let Err(e) = self.sink.publish(&descriptor.wire_topic, payload) {
            debug!(channel, error = %e, "command not published");
            return Err(e);
        }

        let command = Command::new(descriptor.name.clone(), value);
        info!(channel, value = %command.value, id = %command.id, "command sent");
        self.bus
            .publish(Event::new(SOURCE, EventPayload::CommandSent(command.clone())));
        Ok(command)
    }

    /// Parse operator text according to the channel's kind, then
    /// [`submit`](Self::submit) it.
    ///
    /// Booleans accept `on/off`, `true/false` and `1/0`.
    pub fn submit_text(&self, channel: &str, text: &str) -> Result<Command, SyncError> {
        let descriptor = self.outbound(channel)?;
        let value = codec::parse(&descriptor.kind, text).map_err(|e| SyncError::InvalidValue {
            channel: channel.to_string(),
            reason: e.to_string(),
        })?;
        self.submit(channel, value)
    }

    fn outbound(&self, channel: &str) -> Result<&Channel, SyncError> {
        let descriptor = self.registry.resolve(channel)?;
        if descriptor.is_inbound() {
            return Err(SyncError::WrongDirection {
                channel: channel.to_string(),
                direction: descriptor.direction,
            });
        }
        Ok(descriptor)
    }
}
