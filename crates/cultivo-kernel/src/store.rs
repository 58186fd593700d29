//! [`StateStore`] – latest known value of every inbound channel.
//!
//! The table of [`Reading`]s lives behind an [`ArcSwap`].  An update clones
//! the table, changes one slot and swaps the whole table in; a snapshot just
//! loads the current `Arc`.  Readers therefore never wait on the writer and
//! never observe a half-applied update.
//!
//! Each reading also tracks *when* it was last applied.  Much like a
//! heartbeat deadline, a reading that has not been refreshed within
//! `stale_after` is reported with `stale: true` instead of being presented
//! as current.  A channel that never reported is *unknown*, not stale.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use cultivo_hal::{TopicRegistry, codec};
use cultivo_types::{Channel, Reading, SyncError, Value};
use serde::Serialize;
use tracing::{trace, warn};

// ────────────────────────────────────────────────────────────────────────────
// Public types
// ────────────────────────────────────────────────────────────────────────────

/// Result of a successful [`StateStore::update`].
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// The reading was replaced by `value`.
    Applied { value: Value },
    /// The arrival sequence was not newer than the stored one; nothing
    /// changed.
    Duplicate,
}

/// One inbound channel in a [`Snapshot`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotEntry {
    pub channel: Channel,
    /// `None` until the channel first reports.
    pub value: Option<Value>,
    pub sequence: u64,
    #[serde(skip)]
    pub updated_at: Option<Instant>,
    pub received_at: Option<DateTime<Utc>>,
    /// Seconds since the last applied update.
    pub age_secs: Option<f64>,
    pub stale: bool,
}

impl SnapshotEntry {
    pub fn name(&self) -> &str {
        &self.channel.name
    }

    /// Reported at least once.
    pub fn is_known(&self) -> bool {
        self.value.is_some()
    }
}

/// Point-in-time copy of every inbound channel, in registration order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    pub entries: Vec<SnapshotEntry>,
}

impl Snapshot {
    pub fn get(&self, name: &str) -> Option<&SnapshotEntry> {
        self.entries.iter().find(|entry| entry.channel.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SnapshotEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Counters kept by the store since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub applied: u64,
    pub duplicates: u64,
    pub decode_errors: u64,
}

// ────────────────────────────────────────────────────────────────────────────
// StateStore
// ────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
struct Table {
    /// Indexed like `StateStore::channels`.
    readings: Vec<Reading>,
}

/// Copy-on-write table of the latest reading per inbound channel.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use cultivo_hal::TopicRegistry;
/// use cultivo_kernel::store::StateStore;
/// use cultivo_types::{Value, ValueKind};
///
/// let registry = TopicRegistry::builder()
///     .sensor("water_temp", "rack0/sens/water/temperature",
///             ValueKind::Numeric { min: -10.0, max: 60.0 })
///     .build()
///     .unwrap();
/// let store = StateStore::new(Arc::new(registry), Duration::from_secs(30));
///
/// store.update("water_temp", b"23.5", 1).unwrap();
/// let entry = store.snapshot().get("water_temp").cloned().unwrap();
/// assert_eq!(entry.value, Some(Value::Numeric(23.5)));
/// assert!(!entry.stale);
/// ```
pub struct StateStore {
    registry: Arc<TopicRegistry>,
    /// Inbound channels in registration order.
    channels: Vec<Channel>,
    slots: HashMap<String, usize>,
    stale_after: Duration,
    table: ArcSwap<Table>,
    applied: AtomicU64,
    duplicates: AtomicU64,
    decode_errors: AtomicU64,
}

impl StateStore {
    /// Create a store with an *unknown* reading for every inbound channel of
    /// `registry`.
    pub fn new(registry: Arc<TopicRegistry>, stale_after: Duration) -> Self {
        let channels: Vec<Channel> = registry.inbound().cloned().collect();
        let slots = channels
            .iter()
            .enumerate()
            .map(|(index, channel)| (channel.name.clone(), index))
            .collect();
        let table = Table {
            readings: vec![Reading::unknown(); channels.len()],
        };
        Self {
            registry,
            channels,
            slots,
            stale_after,
            table: ArcSwap::from_pointee(table),
            applied: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
        }
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Decode `raw` for `channel` and store it if `arrival_sequence` is newer
    /// than the stored reading's.
    ///
    /// Sequences start at 1; a sequence not strictly greater than the stored
    /// one is a [`UpdateOutcome::Duplicate`] no-op.
    ///
    /// # Errors
    ///
    /// * [`SyncError::UnknownChannel`] – `channel` is not registered.
    /// * [`SyncError::WrongDirection`] – `channel` is outbound; outbound
    ///   channels hold no reading.
    /// * [`SyncError::Decode`] – `raw` does not decode for the channel's
    ///   kind.  The stored reading is left untouched.
    pub fn update(
        &self,
        channel: &str,
        raw: &[u8],
        arrival_sequence: u64,
    ) -> Result<UpdateOutcome, SyncError> {
        let descriptor = self.registry.resolve(channel)?;
        let Some(&slot) = self.slots.get(channel) else {
            return Err(SyncError::WrongDirection {
                channel: channel.to_string(),
                direction: descriptor.direction,
            });
        };

        // Old news is a duplicate whatever its payload looks like.
        if arrival_sequence <= self.table.load().readings[slot].sequence {
            self.duplicates.fetch_add(1, Ordering::Relaxed);
            trace!(channel, sequence = arrival_sequence, "duplicate or out-of-order delivery ignored");
            return Ok(UpdateOutcome::Duplicate);
        }

        let value = match codec::decode(&descriptor.kind, raw) {
            Ok(value) => value,
            Err(e) => {
                self.decode_errors.fetch_add(1, Ordering::Relaxed);
                warn!(channel, sequence = arrival_sequence, error = %e, "undecodable payload dropped");
                return Err(SyncError::Decode {
                    channel: channel.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        let updated_at = Instant::now();
        let received_at = Utc::now();
        let mut applied = false;
        self.table.rcu(|current| {
            if arrival_sequence <= current.readings[slot].sequence {
                applied = false;
                return Arc::clone(current);
            }
            applied = true;
            let mut next = Table::clone(current);
            next.readings[slot] = Reading {
                value: Some(value.clone()),
                sequence: arrival_sequence,
                updated_at: Some(updated_at),
                received_at: Some(received_at),
            };
            Arc::new(next)
        });

        if applied {
            self.applied.fetch_add(1, Ordering::Relaxed);
            trace!(channel, sequence = arrival_sequence, %value, "reading applied");
            Ok(UpdateOutcome::Applied { value })
        } else {
            self.duplicates.fetch_add(1, Ordering::Relaxed);
            trace!(channel, sequence = arrival_sequence, "duplicate or out-of-order delivery ignored");
            Ok(UpdateOutcome::Duplicate)
        }
    }

    /// Consistent copy of every inbound channel, staleness judged against
    /// the current instant.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot_at(Instant::now())
    }

    /// Consistent copy of every inbound channel, staleness judged against
    /// `now`.
    pub fn snapshot_at(&self, now: Instant) -> Snapshot {
        let table = self.table.load_full();
        let entries = self
            .channels
            .iter()
            .zip(table.readings.iter())
            .map(|(channel, reading)| {
                let age = reading.age_at(now);
                SnapshotEntry {
                    channel: channel.clone(),
                    value: reading.value.clone(),
                    sequence: reading.sequence,
                    updated_at: reading.updated_at,
                    received_at: reading.received_at,
                    age_secs: age.map(|d| d.as_secs_f64()),
                    stale: age.is_some_and(|d| d > self.stale_after),
                }
            })
            .collect();
        Snapshot {
            taken_at: Utc::now(),
            entries,
        }
    }

    /// Names of the channels whose reading is currently stale, in
    /// registration order.
    pub fn stale_channels(&self) -> Vec<String> {
        self.snapshot()
            .entries
            .into_iter()
            .filter(|entry| entry.stale)
            .map(|entry| entry.channel.name)
            .collect()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            applied: self.applied.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
