//! [`IngressPipeline`] – the per-delivery path from the broker into the
//! [`StateStore`].
//!
//! Runs inline on the connection manager's delivery context, once per
//! inbound publication:
//!
//! 1. reverse-resolve the wire topic against the [`TopicRegistry`]; unknown
//!    topics are counted and dropped,
//! 2. refuse payloads larger than [`MAX_PAYLOAD_BYTES`],
//! 3. [`StateStore::update`] with the delivery's arrival sequence,
//! 4. announce applied readings on the [`EventBus`].
//!
//! Nothing here blocks, and no error leaves [`IngressPipeline::handle`]: a
//! malformed message is logged, counted and forgotten.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use cultivo_hal::TopicRegistry;
use cultivo_middleware::{ConnectionManager, EventBus, InboundMessage};
use cultivo_types::{Event, EventPayload, SyncError};
use serde::Serialize;
use tracing::{debug, warn};

use crate::store::{StateStore, UpdateOutcome};

const SOURCE: &str = "cultivo-kernel::ingress";

/// Largest payload accepted from the broker.  The rack publishes short
/// decimal strings; anything bigger is garbage.
pub const MAX_PAYLOAD_BYTES: usize = 1024;

/// What happened to one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngressOutcome {
    Applied,
    Duplicate,
    UnknownTopic,
    Rejected,
}

/// Counters kept since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngressStats {
    pub delivered: u64,
    pub applied: u64,
    pub duplicates: u64,
    pub unknown_topics: u64,
    pub decode_errors: u64,
}

/// Decode → apply path for inbound publications.
pub struct IngressPipeline {
    registry: Arc<TopicRegistry>,
    store: Arc<StateStore>,
    bus: EventBus,
    delivered: AtomicU64,
    applied: AtomicU64,
    duplicates: AtomicU64,
    unknown_topics: AtomicU64,
    decode_errors: AtomicU64,
}

impl IngressPipeline {
    pub fn new(registry: Arc<TopicRegistry>, store: Arc<StateStore>, bus: EventBus) -> Self {
        Self {
            registry,
            store,
            bus,
            delivered: AtomicU64::new(0),
            applied: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            unknown_topics: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
        }
    }

    /// Register this pipeline as the manager's delivery handler.
    pub fn attach(self: &Arc<Self>, manager: &ConnectionManager) {
        let pipeline = Arc::clone(self);
        manager.on_delivery(move |message| {
            pipeline.handle(message);
        });
    }

    /// Process one delivery.
    pub fn handle(&self, message: InboundMessage) -> IngressOutcome {
        self.delivered.fetch_add(1, Ordering::Relaxed);

        let Some(channel) = self.registry.by_topic(&message.topic) else {
            self.unknown_topics.fetch_add(1, Ordering::Relaxed);
            debug!(topic = %message.topic, "publication on unregistered topic dropped");
            return IngressOutcome::UnknownTopic;
        };

        if message.payload.len() > MAX_PAYLOAD_BYTES {
            self.decode_errors.fetch_add(1, Ordering::Relaxed);
            warn!(
                channel = %channel.name,
                len = message.payload.len(),
                max = MAX_PAYLOAD_BYTES,
                "oversized payload dropped"
            );
            return IngressOutcome::Rejected;
        }

        match self
            .store
            .update(&channel.name, &message.payload, message.sequence)
        {
            Ok(UpdateOutcome::Applied { value }) => {
                self.applied.fetch_add(1, Ordering::Relaxed);
                self.bus.publish(Event::new(
                    SOURCE,
                    EventPayload::ReadingUpdated {
                        channel: channel.name.clone(),
                        value,
                        sequence: message.sequence,
                    },
                ));
                IngressOutcome::Applied
            }
            Ok(UpdateOutcome::Duplicate) => {
                self.duplicates.fetch_add(1, Ordering::Relaxed);
                IngressOutcome::Duplicate
            }
            Err(SyncError::Decode { .. }) => {
                // Already logged by the store.
                self.decode_errors.fetch_add(1, Ordering::Relaxed);
                IngressOutcome::Rejected
            }
            Err(e) => {
                // An outbound topic echoed back by the broker.
                debug!(topic = %message.topic, error = %e, "delivery not applicable to the store");
                IngressOutcome::Rejected
            }
        }
    }

    pub fn stats(&self) -> IngressStats {
        IngressStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            unknown_topics: self.unknown_topics.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
        }
    }
}
