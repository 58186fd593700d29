//! Connection Manager – the single owner of the upstream broker session.
//!
//! [`ConnectionManager::start`] spawns one supervisor task that owns the
//! [`Transport`] and runs an explicit state machine:
//!
//! ```text
//!   Disconnected ──start──▶ Connecting ──connect+SubAck──▶ Connected
//!                              ▲   │                          │
//!                 sleep(delay) │   │ transient error          │ session lost
//!                              │   ▼                          ▼
//!                        Backoff{attempt} ◀──────────── Disconnected
//! ```
//!
//! The retry counter only starts over after a session that stayed
//! `Connected` for at least the backoff ceiling; shorter sessions count as
//! failed attempts.
//!
//! Retries are scheduled with a `tokio::time::sleep` inside the supervisor
//! loop, so a broker that stays unreachable for days costs one sleeping task
//! and nothing else.  An authentication rejection ends the supervisor with
//! [`SyncError::AuthRejected`]; nothing is retried after that.
//!
//! The supervisor is also the delivery context: every inbound publication is
//! stamped with an arrival sequence and handed to the registered
//! [`DeliveryHandler`] inline, in arrival order.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use cultivo_hal::TopicRegistry;
use cultivo_types::{ConnectionState, Event, EventPayload, SyncConfig, SyncError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::backoff::Backoff;
use crate::bus::EventBus;
use crate::transport::{InboundMessage, Publisher, Transport};

const SOURCE: &str = "cultivo-middleware::connection";

/// The single consumer of inbound publications.
pub type DeliveryHandler = Arc<dyn Fn(InboundMessage) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the manager handle and its supervisor task.
struct Shared {
    registry: Arc<TopicRegistry>,
    backoff: Backoff,
    connect_timeout: Duration,
    bus: EventBus,
    state: watch::Sender<ConnectionState>,
    /// Present exactly while the state is `Connected`.
    publisher: Mutex<Option<Arc<dyn Publisher>>>,
    handler: RwLock<Option<DeliveryHandler>>,
    /// Last arrival sequence handed out.  Never reset.
    sequence: AtomicU64,
    /// How the supervisor ended; `None` while it runs.
    outcome: watch::Sender<Option<Result<(), SyncError>>>,
}

impl Shared {
    fn transition(&self, next: ConnectionState) {
        self.state.send_replace(next);
        debug!(state = %next, "connection state changed");
        self.bus
            .publish(Event::new(SOURCE, EventPayload::ConnectionChanged(next)));
    }

    fn set_publisher(&self, publisher: Option<Arc<dyn Publisher>>) {
        *lock(&self.publisher) = publisher;
    }

    fn deliver(&self, topic: String, payload: Vec<u8>) {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let handler = self
            .handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match handler {
            Some(handler) => handler(InboundMessage {
                topic,
                payload,
                sequence,
            }),
            None => trace!(%topic, sequence, "no delivery handler registered, message dropped"),
        }
    }
}

/// How one connect-subscribe-receive cycle ended.
enum SessionEnd {
    /// Never reached `Connected`.
    Failed(SyncError),
    /// Was `Connected` for `uptime`, then the session dropped.
    Lost { error: SyncError, uptime: Duration },
}

/// Owns the broker session and exposes its state.
///
/// Dropping the manager cancels the supervisor; call
/// [`shutdown`](Self::shutdown) to also wait for the session to close.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    started: AtomicBool,
    task: Mutex<Option<JoinHandle<Result<(), SyncError>>>>,
}

impl ConnectionManager {
    pub fn new(registry: Arc<TopicRegistry>, config: &SyncConfig, bus: EventBus) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                registry,
                backoff: Backoff::from(&config.backoff),
                connect_timeout: config.connect_timeout(),
                bus,
                state,
                publisher: Mutex::new(None),
                handler: RwLock::new(None),
                sequence: AtomicU64::new(0),
                outcome: watch::Sender::new(None),
            }),
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    /// Spawn the supervisor on the current Tokio runtime and return
    /// immediately.  A manager can be started once.
    ///
    /// # Errors
    ///
    /// * [`SyncError::AlreadyStarted`] on a second call.
    /// * [`SyncError::Transport`] when called outside a Tokio runtime.
    pub fn start<T: Transport>(&self, transport: T) -> Result<(), SyncError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SyncError::AlreadyStarted);
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            self.started.store(false, Ordering::SeqCst);
            SyncError::Transport(format!("no Tokio runtime: {e}"))
        })?;
        let handle = runtime.spawn(supervise(
            Arc::clone(&self.shared),
            transport,
            self.cancel.clone(),
        ));
        *lock(&self.task) = Some(handle);
        info!(
            inbound = self.shared.registry.inbound().count(),
            "connection manager started"
        );
        Ok(())
    }

    /// Hand `payload` to the live session for `topic` (QoS 0).
    ///
    /// Returns as soon as the client accepted the message locally.
    ///
    /// # Errors
    ///
    /// * [`SyncError::NotConnected`] unless the state is `Connected`.
    /// * [`SyncError::Transport`] when the client refused the message.
    pub fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), SyncError> {
        if !self.state().is_connected() {
            return Err(SyncError::NotConnected);
        }
        let publisher = lock(&self.shared.publisher)
            .clone()
            .ok_or(SyncError::NotConnected)?;
        publisher.try_publish(topic, payload)
    }

    /// Register the consumer of inbound publications, replacing any
    /// previous one.
    pub fn on_delivery<F>(&self, handler: F)
    where
        F: Fn(InboundMessage) + Send + Sync + 'static,
    {
        let previous = self
            .shared
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Arc::new(handler));
        if previous.is_some() {
            debug!("delivery handler replaced");
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Watch every state transition.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Last arrival sequence handed to the delivery handler (0 before the
    /// first delivery).
    pub fn last_sequence(&self) -> u64 {
        self.shared.sequence.load(Ordering::Relaxed)
    }

    /// Wait for the supervisor to finish.
    ///
    /// Resolves with `Err(AuthRejected)` when the broker refused the
    /// credentials, and `Ok(())` after a shutdown.  Returns immediately when
    /// the manager was never started or has already been joined.
    pub async fn join(&self) -> Result<(), SyncError> {
        let Some(handle) = lock(&self.task).take() else {
            return Ok(());
        };
        match handle.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                error!("connection supervisor panicked");
                let err = SyncError::Transport("connection supervisor panicked".to_string());
                self.shared.set_publisher(None);
                self.shared.transition(ConnectionState::Disconnected);
                self.shared.outcome.send_replace(Some(Err(err.clone())));
                Err(err)
            }
            Err(_) => Ok(()),
        }
    }

    /// Resolve with the supervisor's result once it has ended, without
    /// taking it away from [`join`](Self::join) or [`shutdown`](Self::shutdown).
    /// Any number of callers may wait.
    pub async fn stopped(&self) -> Result<(), SyncError> {
        let mut rx = self.shared.outcome.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).clone().unwrap_or(Ok(())),
            Err(_) => Ok(()),
        }
    }

    /// Cancel the supervisor (including any pending backoff sleep), wait for
    /// it to close the session and leave the state `Disconnected`.
    ///
    /// # Errors
    ///
    /// Surfaces the supervisor's terminal error if nobody joined it yet.
    pub async fn shutdown(&self) -> Result<(), SyncError> {
        self.cancel.cancel();
        let result = self.join().await;
        self.shared.set_publisher(None);
        if self.state() != ConnectionState::Disconnected {
            self.shared.transition(ConnectionState::Disconnected);
        }
        info!("connection manager shut down");
        result
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[instrument(name = "connection_supervisor", skip_all)]
async fn supervise<T: Transport>(
    shared: Arc<Shared>,
    mut transport: T,
    cancel: CancellationToken,
) -> Result<(), SyncError> {
    let topics: Vec<String> = shared
        .registry
        .inbound()
        .map(|channel| channel.wire_topic.clone())
        .collect();
    let mut attempt: u32 = 0;

    let outcome = loop {
        shared.transition(ConnectionState::Connecting);
        let end = tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            end = run_session(&shared, &mut transport, &topics) => end,
        };
        shared.set_publisher(None);

        match end {
            SessionEnd::Failed(SyncError::AuthRejected(reason)) => {
                error!(%reason, "broker rejected the credentials, not retrying");
                break Err(SyncError::AuthRejected(reason));
            }
            SessionEnd::Failed(e) => {
                warn!(attempt, error = %e, "connection attempt failed");
            }
            SessionEnd::Lost { error, uptime } => {
                // A broker that accepts and then kicks us straight away must
                // not be retried at the base delay forever.
                if uptime >= shared.backoff.max() {
                    attempt = 0;
                }
                warn!(error = %error, ?uptime, attempt, "broker session lost");
                shared.transition(ConnectionState::Disconnected);
            }
        }
        transport.disconnect().await;

        let delay = shared.backoff.delay(attempt);
        shared.transition(ConnectionState::Backoff {
            attempt,
            next_retry_at: Instant::now() + delay,
        });
        debug!(attempt, ?delay, "retry scheduled");
        tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt = attempt.saturating_add(1);
    };

    transport.disconnect().await;
    shared.set_publisher(None);
    shared.transition(ConnectionState::Disconnected);
    shared.outcome.send_replace(Some(outcome.clone()));
    outcome
}

async fn run_session<T: Transport>(
    shared: &Shared,
    transport: &mut T,
    topics: &[String],
) -> SessionEnd {
    let handshake = async {
        let publisher = transport.connect().await?;
        transport.subscribe(topics).await?;
        Ok::<_, SyncError>(publisher)
    };
    let publisher = match tokio::time::timeout(shared.connect_timeout, handshake).await {
        Ok(Ok(publisher)) => publisher,
        Ok(Err(e)) => return SessionEnd::Failed(e),
        Err(_) => {
            return SessionEnd::Failed(SyncError::Transport(format!(
                "connect and subscribe did not finish within {:?}",
                shared.connect_timeout
            )));
        }
    };

    shared.set_publisher(Some(publisher));
    shared.transition(ConnectionState::Connected);
    let connected_at = tokio::time::Instant::now();
    info!(topics = topics.len(), "connected and subscribed");

    loop {
        match transport.next_message().await {
            Ok((topic, payload)) => shared.deliver(topic, payload),
            Err(error) => {
                return SessionEnd::Lost {
                    error,
                    uptime: connected_at.elapsed(),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Topic;
    use crate::sim::{SimBroker, SimTransport};
    use cultivo_types::{BackoffConfig, ValueKind};

    fn registry() -> Arc<TopicRegistry> {
        let registry = TopicRegistry::builder()
            .sensor("water_temp", "rack0/sens/water/temperature", ValueKind::Numeric {
                min: -10.0,
                max: 60.0,
            })
            .actuator("fan0", "rack0/actu/fan/control0", ValueKind::Numeric {
                min: 0.0,
                max: 100.0,
            })
            .sensor("water_ph", "rack0/sens/water/ph", ValueKind::Numeric { min: 0.0, max: 14.0 })
            .build()
            .unwrap();
        Arc::new(registry)
    }

    fn config() -> SyncConfig {
        SyncConfig {
            backoff: BackoffConfig {
                base_ms: 100,
                max_ms: 1_000,
                jitter_ms: 0,
            },
            ..SyncConfig::default()
        }
    }

    fn manager() -> (ConnectionManager, EventBus) {
        let bus = EventBus::default();
        (ConnectionManager::new(registry(), &config(), bus.clone()), bus)
    }

    async fn wait_connected(manager: &ConnectionManager) {
        let mut rx = manager.subscribe_state();
        rx.wait_for(|s| s.is_connected()).await.unwrap();
    }

    fn drain_states(rx: &mut crate::bus::TopicReceiver) -> Vec<ConnectionState> {
        let mut states = Vec::new();
        while let Some(event) = rx.try_next() {
            if let EventPayload::ConnectionChanged(state) = event.payload {
                states.push(state);
            }
        }
        states
    }

    fn started(manager: &ConnectionManager) -> SimBroker {
        let (transport, broker) = SimTransport::new();
        manager.start(transport).unwrap();
        broker
    }

    #[tokio::test(start_paused = true)]
    async fn connects_and_subscribes_inbound_topics_once_in_order() {
        let (manager, bus) = manager();
        let mut events = bus.subscribe_to(Topic::Connection);
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        let broker = started(&manager);
        wait_connected(&manager).await;

        assert_eq!(
            broker.subscriptions(),
            vec![vec![
                "rack0/sens/water/temperature".to_string(),
                "rack0/sens/water/ph".to_string()
            ]]
        );
        assert_eq!(
            drain_states(&mut events),
            vec![ConnectionState::Connecting, ConnectionState::Connected]
        );
        manager.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_refused() {
        let (manager, _bus) = manager();
        let _broker = started(&manager);
        let (again, _) = SimTransport::new();
        assert_eq!(manager.start(again), Err(SyncError::AlreadyStarted));
        manager.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_back_off_then_connect() {
        let (manager, bus) = manager();
        let mut events = bus.subscribe_to(Topic::Connection);
        let (transport, broker) = SimTransport::new();
        broker.script_connects([
            Err(SyncError::Transport("refused".into())),
            Err(SyncError::Transport("refused".into())),
        ]);
        manager.start(transport).unwrap();
        wait_connected(&manager).await;

        assert_eq!(broker.connect_attempts(), 3);
        let attempts: Vec<u32> = drain_states(&mut events)
            .into_iter()
            .filter_map(|s| match s {
                ConnectionState::Backoff { attempt, .. } => Some(attempt),
                _ => None,
            })
            .collect();
        assert_eq!(attempts, vec![0, 1]);
        // One subscription, for the session that succeeded.
        assert_eq!(broker.subscriptions().len(), 1);
        manager.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_waits_the_computed_delay() {
        let (manager, _bus) = manager();
        let (transport, broker) = SimTransport::new();
        broker.script_connects([Err(SyncError::Transport("refused".into()))]);
        let begin = tokio::time::Instant::now();
        manager.start(transport).unwrap();
        wait_connected(&manager).await;
        // base 100 ms * 2^0, no jitter.
        let waited = begin.elapsed();
        assert!(waited >= Duration::from_millis(100), "retried after {waited:?}");
        assert!(waited < Duration::from_millis(200), "retried after {waited:?}");
        manager.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn auth_rejection_is_terminal() {
        let (manager, _bus) = manager();
        let (transport, broker) = SimTransport::new();
        broker.script_connects([Err(SyncError::AuthRejected("BadUserNamePassword".into()))]);
        manager.start(transport).unwrap();

        let result = manager.join().await;
        assert!(matches!(result, Err(SyncError::AuthRejected(_))));
        assert_eq!(broker.connect_attempts(), 1);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_reports_auth_rejection_and_leaves_join_intact() {
        let (manager, _bus) = manager();
        let (transport, broker) = SimTransport::new();
        broker.script_connects([Err(SyncError::AuthRejected("NotAuthorized".into()))]);
        manager.start(transport).unwrap();

        let (first, second) = tokio::join!(manager.stopped(), manager.stopped());
        assert!(matches!(first, Err(SyncError::AuthRejected(_))));
        assert_eq!(first, second);
        assert!(matches!(manager.join().await, Err(SyncError::AuthRejected(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_is_ok_after_shutdown() {
        let (manager, _bus) = manager();
        let broker = started(&manager);
        wait_connected(&manager).await;

        let (stopped, shutdown) = tokio::join!(manager.stopped(), manager.shutdown());
        assert_eq!(stopped, Ok(()));
        assert_eq!(shutdown, Ok(()));
        // shutdown still waited for the session to close.
        assert_eq!(broker.disconnects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn publish_requires_a_live_session() {
        let (manager, _bus) = manager();
        assert_eq!(
            manager.publish("rack0/actu/fan/control0", b"40".to_vec()),
            Err(SyncError::NotConnected)
        );

        let broker = started(&manager);
        wait_connected(&manager).await;
        manager
            .publish("rack0/actu/fan/control0", b"40".to_vec())
            .unwrap();
        assert_eq!(
            broker.published(),
            vec![("rack0/actu/fan/control0".to_string(), b"40".to_vec())]
        );
        manager.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn lost_session_reconnects_and_resubscribes() {
        let (manager, bus) = manager();
        let mut events = bus.subscribe_to(Topic::Connection);
        let broker = started(&manager);
        wait_connected(&manager).await;
        // Stay up past the 1 s ceiling so the retry counter starts over.
        tokio::time::sleep(Duration::from_secs(2)).await;

        broker.drop_session();
        let mut rx = manager.subscribe_state();
        rx.wait_for(|s| matches!(s, ConnectionState::Backoff { .. }))
            .await
            .unwrap();
        assert_eq!(
            manager.publish("rack0/actu/fan/control0", b"1".to_vec()),
            Err(SyncError::NotConnected)
        );
        wait_connected(&manager).await;

        let states = drain_states(&mut events);
        assert!(states.contains(&ConnectionState::Disconnected));
        assert!(states.iter().any(|s| matches!(s, ConnectionState::Backoff { attempt: 0, .. })));
        assert_eq!(broker.subscriptions().len(), 2);
        manager.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn flapping_sessions_keep_growing_the_backoff() {
        let (manager, bus) = manager();
        let mut events = bus.subscribe_to(Topic::Connection);
        let broker = started(&manager);
        let mut rx = manager.subscribe_state();

        for _ in 0..5 {
            rx.wait_for(|s| s.is_connected()).await.unwrap();
            broker.drop_session();
            rx.wait_for(|s| matches!(s, ConnectionState::Backoff { .. }))
                .await
                .unwrap();
        }

        let attempts: Vec<u32> = drain_states(&mut events)
            .into_iter()
            .filter_map(|s| match s {
                ConnectionState::Backoff { attempt, .. } => Some(attempt),
                _ => None,
            })
            .collect();
        assert_eq!(attempts, vec![0, 1, 2, 3, 4]);
        assert_eq!(manager.shared.backoff.ceiling(4), Duration::from_secs(1));
        manager.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stable_session_resets_the_backoff() {
        let (manager, bus) = manager();
        let mut events = bus.subscribe_to(Topic::Connection);
        let (transport, broker) = SimTransport::new();
        broker.script_connects([
            Err(SyncError::Transport("refused".into())),
            Err(SyncError::Transport("refused".into())),
        ]);
        manager.start(transport).unwrap();
        wait_connected(&manager).await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        broker.drop_session();
        let mut rx = manager.subscribe_state();
        rx.wait_for(|s| matches!(s, ConnectionState::Backoff { .. }))
            .await
            .unwrap();

        let attempts: Vec<u32> = drain_states(&mut events)
            .into_iter()
            .filter_map(|s| match s {
                ConnectionState::Backoff { attempt, .. } => Some(attempt),
                _ => None,
            })
            .collect();
        assert_eq!(attempts, vec![0, 1, 0]);
        manager.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn offline_drop_does_not_kill_the_next_session() {
        let (manager, _bus) = manager();
        let (transport, broker) = SimTransport::new();
        broker.script_connects([Err(SyncError::Transport("refused".into()))]);
        broker.drop_session();
        manager.start(transport).unwrap();
        wait_connected(&manager).await;

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(manager.state().is_connected());
        assert_eq!(broker.connect_attempts(), 2);
        assert_eq!(broker.subscriptions().len(), 1);
        manager.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_pending_backoff() {
        let (manager, _bus) = manager();
        let (transport, broker) = SimTransport::new();
        broker.script_connects(
            std::iter::repeat_with(|| Err(SyncError::Transport("down".into()))).take(50),
        );
        manager.start(transport).unwrap();
        let mut rx = manager.subscribe_state();
        rx.wait_for(|s| matches!(s, ConnectionState::Backoff { .. }))
            .await
            .unwrap();

        manager.shutdown().await.unwrap();
        let attempts = broker.connect_attempts();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(broker.connect_attempts(), attempts);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_closes_the_session() {
        let (manager, _bus) = manager();
        let broker = started(&manager);
        wait_connected(&manager).await;

        manager.shutdown().await.unwrap();
        assert_eq!(broker.disconnects(), 1);
        assert!(!broker.is_online());
        assert_eq!(
            manager.publish("rack0/actu/fan/control0", b"1".to_vec()),
            Err(SyncError::NotConnected)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn deliveries_are_sequenced_across_sessions() {
        let (manager, _bus) = manager();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        manager.on_delivery(move |message| {
            let _ = tx.send(message);
        });
        let broker = started(&manager);
        wait_connected(&manager).await;

        broker.deliver("rack0/sens/water/temperature", "23.5");
        broker.deliver("rack0/sens/water/ph", "6.2");
        assert_eq!(rx.recv().await.unwrap().sequence, 1);
        assert_eq!(rx.recv().await.unwrap().sequence, 2);

        broker.drop_session();
        broker.deliver("rack0/sens/water/temperature", "23.7");
        let third = rx.recv().await.unwrap();
        assert_eq!(third.sequence, 3);
        assert_eq!(third.payload, b"23.7");
        assert_eq!(manager.last_sequence(), 3);
        manager.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn second_handler_replaces_the_first() {
        let (manager, _bus) = manager();
        let (first_tx, mut first_rx) = tokio::sync::mpsc::unbounded_channel::<InboundMessage>();
        let (second_tx, mut second_rx) = tokio::sync::mpsc::unbounded_channel();
        manager.on_delivery(move |m| {
            let _ = first_tx.send(m);
        });
        manager.on_delivery(move |m| {
            let _ = second_tx.send(m);
        });
        let broker = started(&manager);
        wait_connected(&manager).await;

        broker.deliver("rack0/sens/water/ph", "6.0");
        assert_eq!(second_rx.recv().await.unwrap().topic, "rack0/sens/water/ph");
        // The first handler was dropped along with its sender.
        assert!(first_rx.recv().await.is_none());
        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_without_start_is_a_no_op() {
        let (manager, _bus) = manager();
        manager.shutdown().await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }
}
