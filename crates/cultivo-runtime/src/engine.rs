//! [`SyncEngine`] – the assembled synchronization engine.
//!
//! ```text
//!  broker ──▶ ConnectionManager ──deliver──▶ IngressPipeline ──▶ StateStore
//!                 ▲                               │                  │
//!                 │ publish                       ▼                  ▼
//!          CommandDispatcher ◀── submit ──  (EventBus) ──▶  dashboard()/events
//! ```
//!
//! The engine owns one of each component and exposes only what a rendering
//! collaborator needs: the connection state, snapshots, push notifications
//! and command submission.  The broker session itself is never exposed.

use std::sync::Arc;

use cultivo_hal::TopicRegistry;
use cultivo_kernel::{
    CommandDispatcher, IngressPipeline, IngressStats, Snapshot, StateStore, StoreStats,
};
use cultivo_middleware::mqtt::DEFAULT_REQUEST_CAPACITY;
use cultivo_middleware::{
    ConnectionManager, EventBus, MqttTransport, Topic, TopicReceiver, Transport,
};
use cultivo_types::{Command, ConnectionState, SyncConfig, SyncError, Value};
use serde::{Serialize, Serializer};
use tokio::sync::watch;
use tracing::info;

/// What a dashboard shows: the connection state and every inbound channel.
#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    #[serde(serialize_with = "display")]
    pub connection: ConnectionState,
    pub snapshot: Snapshot,
}

fn display<S: Serializer>(state: &ConnectionState, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(state)
}

/// Counters across the inbound path.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct EngineStats {
    pub ingress: IngressStats,
    pub store: StoreStats,
    /// Last arrival sequence stamped by the connection manager.
    pub last_sequence: u64,
}

/// The live device-state synchronization engine.
pub struct SyncEngine {
    config: SyncConfig,
    registry: Arc<TopicRegistry>,
    bus: EventBus,
    store: Arc<StateStore>,
    manager: Arc<ConnectionManager>,
    ingress: Arc<IngressPipeline>,
    dispatcher: CommandDispatcher,
}

impl SyncEngine {
    /// Assemble the engine.  Nothing touches the network until
    /// [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// [`SyncError::Config`] when `config` does not validate.
    pub fn new(config: SyncConfig, registry: TopicRegistry) -> Result<Self, SyncError> {
        config.validate()?;
        let registry = Arc::new(registry);
        let bus = EventBus::new(config.event_capacity);
        let store = Arc::new(StateStore::new(Arc::clone(&registry), config.stale_after()));
        let manager = Arc::new(ConnectionManager::new(
            Arc::clone(&registry),
            &config,
            bus.clone(),
        ));
        let ingress = Arc::new(IngressPipeline::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            bus.clone(),
        ));
        ingress.attach(&manager);
        let dispatcher = CommandDispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&manager) as Arc<dyn cultivo_kernel::CommandSink>,
            bus.clone(),
        );

        info!(
            channels = registry.len(),
            inbound = registry.inbound().count(),
            broker = %format!("{}:{}", config.broker_host, config.broker_port),
            "sync engine assembled"
        );
        Ok(Self {
            config,
            registry,
            bus,
            store,
            manager,
            ingress,
            dispatcher,
        })
    }

    /// Begin connecting through `transport`.  Returns immediately.
    pub fn start<T: Transport>(&self, transport: T) -> Result<(), SyncError> {
        self.manager.start(transport)
    }

    /// Begin connecting to the configured MQTT broker.  Returns immediately.
    pub fn start_mqtt(&self) -> Result<(), SyncError> {
        let capacity = DEFAULT_REQUEST_CAPACITY.max(self.registry.len() * 2);
        self.start(MqttTransport::from_config(&self.config).with_request_capacity(capacity))
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn registry(&self) -> &TopicRegistry {
        &self.registry
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.manager.subscribe_state()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.store.snapshot()
    }

    pub fn dashboard(&self) -> Dashboard {
        Dashboard {
            connection: self.manager.state(),
            snapshot: self.store.snapshot(),
        }
    }

    /// Names of inbound channels whose reading went stale.
    pub fn stale_channels(&self) -> Vec<String> {
        self.store.stale_channels()
    }

    /// Push notifications for one lane of the bus.
    pub fn subscribe_events(&self, topic: Topic) -> TopicReceiver {
        self.bus.subscribe_to(topic)
    }

    pub fn submit(&self, channel: &str, value: Value) -> Result<Command, SyncError> {
        self.dispatcher.submit(channel, value)
    }

    pub fn submit_text(&self, channel: &str, text: &str) -> Result<Command, SyncError> {
        self.dispatcher.submit_text(channel, text)
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            ingress: self.ingress.stats(),
            store: self.store.stats(),
            last_sequence: self.manager.last_sequence(),
        }
    }

    /// Resolves when the connection manager stops on its own, i.e. with
    /// [`SyncError::AuthRejected`].
    pub async fn join(&self) -> Result<(), SyncError> {
        self.manager.join().await
    }

    /// Resolves with the connection manager's result once it has stopped,
    /// without consuming it: [`shutdown`](Self::shutdown) still waits for
    /// the session to close.
    pub async fn stopped(&self) -> Result<(), SyncError> {
        self.manager.stopped().await
    }

    /// Close the broker session and cancel any pending retry.
    pub async fn shutdown(&self) -> Result<(), SyncError> {
        self.manager.shutdown().await
    }
}
