//! `cultivo-kernel` – State & Orchestration
//!
//! The part of Cultivo that knows what the data means.  It keeps the live
//! view of the rack consistent with the inbound stream and gates every
//! outbound command.
//!
//! # Modules
//!
//! - [`store`] – [`StateStore`][store::StateStore]: the copy-on-write table of
//!   latest readings, with duplicate suppression and staleness reporting.
//! - [`ingress`] – [`IngressPipeline`][ingress::IngressPipeline]: the
//!   per-delivery decode → apply path, run on the connection manager's
//!   delivery context.
//! - [`dispatcher`] – [`CommandDispatcher`][dispatcher::CommandDispatcher]:
//!   the single interception point between operator input and the broker.
//!   Checks channel, direction and value before anything is published.

pub mod dispatcher;
pub mod ingress;
pub mod store;

pub use dispatcher::{CommandDispatcher, CommandSink};
pub use ingress::{IngressOutcome, IngressPipeline, IngressStats, MAX_PAYLOAD_BYTES};
pub use store::{Snapshot, SnapshotEntry, StateStore, StoreStats, UpdateOutcome};
