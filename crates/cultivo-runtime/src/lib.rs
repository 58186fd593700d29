//! `cultivo-runtime` – The Engine
//!
//! Wires the registry, connection manager, state store, ingress pipeline and
//! command dispatcher into one [`SyncEngine`][engine::SyncEngine] that a
//! rendering collaborator (the bundled CLI, a web UI, a test) can drive.
//!
//! # Modules
//!
//! - [`engine`] – [`SyncEngine`][engine::SyncEngine]: construction from an
//!   immutable [`SyncConfig`][cultivo_types::SyncConfig], start/shutdown,
//!   dashboard snapshots, push notifications and command submission.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter.  Set `OTEL_EXPORTER_OTLP_ENDPOINT` to export the connection
//!   manager's spans to any OTLP-compatible collector.

pub mod engine;
pub mod telemetry;

pub use engine::{Dashboard, EngineStats, SyncEngine};
pub use telemetry::{TelemetryGuard, init_tracing};
