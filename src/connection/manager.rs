//! Connection manager and reconnection supervisor
//!
//! `connect()` spawns a single supervisor task that owns the handshake, the
//! inbound event loop and the backoff timer. The supervisor and
//! `disconnect()` are the only writers of the connection state, which lives
//! in a `watch` channel so any number of observers can follow transitions.
//!
//! A `disconnect()` in flight holds the supervisor slot until the transport
//! is closed; a `connect()` racing with it starts a supervisor that waits for
//! the close before its first handshake.

use super::health_monitor::{ConnectionEvent, HealthMetrics, HealthMonitor, ReconnectionDecision};
use super::state::{ConnectionState, ReconnectConfig};
use crate::error::{ClientError, ClientResult};
use crate::events::{lock_unpoisoned, LifecycleListeners};
use crate::protocol::Credentials;
use crate::routing::TopicRouter;
use crate::transport::{Transport, TransportError, TransportEvent};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn, Instrument};

/// How long `disconnect()` waits for the supervisor before aborting it
const SUPERVISOR_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Owns the transport and the connection lifecycle of one device
pub struct ConnectionManager<T: Transport> {
    shared: Arc<Shared<T>>,
    supervisor: Mutex<SupervisorSlot>,
}

enum SupervisorSlot {
    Idle,
    Running(SupervisorHandle),
    /// `disconnect()` is closing the transport; flips to true once done
    Stopping(Arc<watch::Sender<bool>>),
}

struct SupervisorHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SupervisorHandle {
    fn stop_now(self) {
        let _ = self.shutdown_tx.send(true);
        self.task.abort();
    }
}

/// Releases the slot held by a `disconnect()`, even if it was cancelled
struct StoppingGuard<'a> {
    slot: &'a Mutex<SupervisorSlot>,
    done: Arc<watch::Sender<bool>>,
}

impl Drop for StoppingGuard<'_> {
    fn drop(&mut self) {
        let mut slot = lock_unpoisoned(self.slot);
        if matches!(&*slot, SupervisorSlot::Stopping(done) if Arc::ptr_eq(done, &self.done)) {
            *slot = SupervisorSlot::Idle;
        }
        self.done.send_replace(true);
    }
}

/// State shared between the manager and its supervisor task
struct Shared<T> {
    transport: Arc<T>,
    credentials: Credentials,
    reconnect: ReconnectConfig,
    router: Arc<TopicRouter>,
    lifecycle: Arc<LifecycleListeners>,
    state_tx: watch::Sender<ConnectionState>,
    health: Mutex<HealthTracker>,
}

#[derive(Debug, Default)]
struct HealthTracker {
    connect_time: Option<Instant>,
    last_message_time: Option<Instant>,
    reconnect_count: u32,
    /// A Connected session dropped and has not been re-established yet
    session_lost: bool,
}

/// Why a live session ended
enum SessionEnd {
    Shutdown,
    Lost(String),
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(
        transport: Arc<T>,
        credentials: Credentials,
        reconnect: ReconnectConfig,
        router: Arc<TopicRouter>,
        lifecycle: Arc<LifecycleListeners>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            shared: Arc::new(Shared {
                transport,
                credentials,
                reconnect,
                router,
                lifecycle,
                state_tx,
                health: Mutex::new(HealthTracker::default()),
            }),
            supervisor: Mutex::new(SupervisorSlot::Idle),
        }
    }

    /// Start connecting in the background and return immediately
    ///
    /// A no-op while a supervisor is already working on a connection. After
    /// `Failed` or `disconnect()` a fresh supervisor is started.
    pub fn connect(&self) -> ClientResult<()> {
        let runtime = Handle::try_current().map_err(|_| ClientError::NoRuntime)?;

        let mut supervisor = lock_unpoisoned(&self.supervisor);
        let previous = std::mem::replace(&mut *supervisor, SupervisorSlot::Idle);
        let pending_close = match previous {
            SupervisorSlot::Running(existing) => {
                let failed = matches!(self.state(), ConnectionState::Failed { .. });
                if !existing.task.is_finished() && !failed {
                    debug!("connect() called while a connection is active, ignoring");
                    *supervisor = SupervisorSlot::Running(existing);
                    return Ok(());
                }
                // Leftover from a failed run
                existing.stop_now();
                None
            }
            SupervisorSlot::Stopping(done) => {
                debug!("connect() called during disconnect, deferring handshake");
                Some(done.subscribe())
            }
            SupervisorSlot::Idle => None,
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        if pending_close.is_none() {
            self.shared
                .apply(ConnectionEvent::HandshakeStarted { attempt: 0 });
        }

        let span = crate::connection_span!(device_id = %self.shared.credentials.client_id);
        let task = runtime.spawn(
            Arc::clone(&self.shared)
                .run(shutdown_rx, pending_close)
                .instrument(span),
        );

        *supervisor = SupervisorSlot::Running(SupervisorHandle { shutdown_tx, task });
        Ok(())
    }

    /// Stop the supervisor, cancel any pending backoff and close the transport
    pub async fn disconnect(&self) {
        let (done, _) = watch::channel(false);
        let guard = StoppingGuard {
            slot: &self.supervisor,
            done: Arc::new(done),
        };

        let previous = std::mem::replace(
            &mut *lock_unpoisoned(&self.supervisor),
            SupervisorSlot::Stopping(Arc::clone(&guard.done)),
        );

        match previous {
            SupervisorSlot::Running(SupervisorHandle {
                shutdown_tx,
                mut task,
            }) => {
                let _ = shutdown_tx.send(true);
                info!("Sent shutdown signal to connection supervisor");

                match tokio::time::timeout(SUPERVISOR_SHUTDOWN_TIMEOUT, &mut task).await {
                    Ok(Ok(())) => debug!("Connection supervisor stopped"),
                    Ok(Err(e)) if !e.is_cancelled() => {
                        warn!("Connection supervisor ended with error: {}", e)
                    }
                    Err(_) => {
                        warn!("Connection supervisor did not stop in time, aborting");
                        task.abort();
                    }
                    _ => {}
                }
            }
            SupervisorSlot::Stopping(other) => {
                // Another disconnect() is closing; let it finish first
                transport_closed(&mut other.subscribe()).await;
            }
            SupervisorSlot::Idle => {}
        }

        if let Err(e) = self.shared.transport.close().await {
            debug!("Transport close failed: {}", e);
        }

        self.shared.apply(ConnectionEvent::Shutdown);
        drop(guard);
    }

    /// True iff the state is `Connected`
    pub fn is_connected(&self) -> bool {
        self.shared.state_tx.borrow().is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state_tx.borrow().clone()
    }

    /// Observe state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Resolve once connected; fails on credential rejection or timeout
    pub async fn wait_until_connected(&self, timeout: Duration) -> ClientResult<()> {
        let mut state_rx = self.subscribe_state();

        let outcome = tokio::time::timeout(timeout, async {
            state_rx
                .wait_for(|state| {
                    matches!(
                        state,
                        ConnectionState::Connected | ConnectionState::Failed { .. }
                    )
                })
                .await
                .map(|state| (*state).clone())
        })
        .await;

        match outcome {
            Ok(Ok(ConnectionState::Failed { reason })) => Err(ClientError::auth(reason)),
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(ClientError::Transport(TransportError::NotOpen)),
            Err(_) => Err(ClientError::Timeout(timeout)),
        }
    }

    pub fn health(&self) -> HealthMetrics {
        let health = lock_unpoisoned(&self.shared.health);
        HealthMonitor::calculate_health_metrics(
            health.connect_time,
            health.last_message_time,
            health.reconnect_count,
        )
    }

    /// Publish on the live session; refuses with `NotOpen` unless connected
    pub async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if !HealthMonitor::can_publish(&self.state()) {
            return Err(TransportError::NotOpen);
        }
        self.shared.transport.publish(topic, payload).await
    }

    /// Subscribe the live session to `pattern`; does nothing while offline
    ///
    /// Offline registrations are picked up on the next handshake.
    pub async fn subscribe_if_connected(&self, pattern: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Ok(());
        }
        self.shared.transport.subscribe(pattern).await
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.shared.transport
    }
}

impl<T: Transport> Drop for ConnectionManager<T> {
    fn drop(&mut self) {
        let slot = std::mem::replace(&mut *lock_unpoisoned(&self.supervisor), SupervisorSlot::Idle);
        if let SupervisorSlot::Running(handle) = slot {
            handle.stop_now();
        }
    }
}

impl<T: Transport> Shared<T> {
    /// Supervisor loop: handshake, run the session, back off, repeat
    async fn run(
        self: Arc<Self>,
        mut shutdown_rx: watch::Receiver<bool>,
        pending_close: Option<watch::Receiver<bool>>,
    ) {
        if let Some(mut closed) = pending_close {
            tokio::select! {
                biased;
                _ = shutdown_signalled(&mut shutdown_rx) => return,
                _ = transport_closed(&mut closed) => {}
            }
        }

        info!("Starting connection supervisor");
        let mut attempts = 0u32;

        loop {
            self.apply(ConnectionEvent::HandshakeStarted { attempt: attempts });

            let handshake = tokio::select! {
                biased;
                _ = shutdown_signalled(&mut shutdown_rx) => break,
                result = self.transport.open(&self.credentials) => result,
            };

            let failure = match handshake {
                Ok(()) => {
                    self.apply(ConnectionEvent::HandshakeAccepted);
                    attempts = 0;

                    match self.run_session(&mut shutdown_rx).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Lost(reason) => TransportError::ConnectionLost(reason),
                    }
                }
                Err(e) => e,
            };

            let decision = HealthMonitor::should_attempt_reconnection(
                &failure,
                attempts,
                &self.reconnect,
                *shutdown_rx.borrow(),
            );

            match decision {
                ReconnectionDecision::Proceed { attempt, delay } => {
                    attempts = attempt;
                    self.apply(ConnectionEvent::RetryScheduled {
                        attempt,
                        reason: failure.to_string(),
                    });
                    debug!(attempt, delay_ms = delay.as_millis() as u64, "Backing off");

                    if !interruptible_sleep(&mut shutdown_rx, delay).await {
                        break;
                    }
                }
                ReconnectionDecision::AbortAuthRejected { reason } => {
                    self.apply(ConnectionEvent::AuthRejected(reason.clone()));
                    self.lifecycle.error.emit(&ClientError::auth(reason));
                    break;
                }
                ReconnectionDecision::AbortShutdownRequested => break,
            }
        }

        info!("Connection supervisor stopped");
    }

    /// Pump inbound events into the router until the session ends
    ///
    /// Resubscription runs alongside the event pump: requests queued on the
    /// transport only drain while its events are being polled.
    async fn run_session(&self, shutdown_rx: &mut watch::Receiver<bool>) -> SessionEnd {
        let resubscribe = self.resubscribe();
        tokio::pin!(resubscribe);
        let mut resubscribed = false;

        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown_signalled(shutdown_rx) => return SessionEnd::Shutdown,
                () = &mut resubscribe, if !resubscribed => {
                    resubscribed = true;
                    continue;
                }
                event = self.transport.next_event() => event,
            };

            match event {
                TransportEvent::Message { topic, payload } => {
                    lock_unpoisoned(&self.health).last_message_time = Some(Instant::now());
                    let handled = self.router.dispatch_inbound(&topic, &payload);
                    trace!(topic = %topic, handled, "Inbound message processed");
                }
                TransportEvent::Disconnected { reason } => return SessionEnd::Lost(reason),
            }
        }
    }

    /// Subscribe the fresh session to every distinct registered pattern
    async fn resubscribe(&self) {
        let patterns = self.router.patterns();
        match self.transport.subscribe_many(&patterns).await {
            Ok(()) => debug!(count = patterns.len(), "Subscriptions re-established"),
            Err(e) => {
                warn!("Failed to re-establish subscriptions: {}", e);
                self.lifecycle.error.emit(&ClientError::Transport(e));
            }
        }
    }

    /// Apply a transition, log it and notify lifecycle listeners
    fn apply(&self, event: ConnectionEvent) {
        let next = HealthMonitor::determine_next_state(&event);
        let previous = self.state_tx.send_replace(next.clone());
        if previous == next {
            return;
        }

        HealthMonitor::log_state_transition(&previous, &next, event.detail());

        if next.is_connected() {
            {
                let mut health = lock_unpoisoned(&self.health);
                health.connect_time = Some(Instant::now());
                if std::mem::take(&mut health.session_lost) {
                    health.reconnect_count += 1;
                }
            }
            self.lifecycle.connect.emit(&());
        } else if previous.is_connected() {
            {
                let mut health = lock_unpoisoned(&self.health);
                health.connect_time = None;
                health.session_lost = matches!(next, ConnectionState::Reconnecting { .. });
            }
            self.lifecycle.disconnect.emit(event.detail());
        } else if next.is_terminal() {
            lock_unpoisoned(&self.health).session_lost = false;
        }
    }
}

/// Resolves once shutdown is requested or the manager is gone
async fn shutdown_signalled(shutdown_rx: &mut watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
}

/// Resolves once a pending `disconnect()` has closed the transport
async fn transport_closed(closed: &mut watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}

/// Sleep for `delay` unless shutdown is requested first
/// Returns true if the sleep completed
async fn interruptible_sleep(shutdown_rx: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = shutdown_signalled(shutdown_rx) => {
            info!("Shutdown signal received during reconnection delay, stopping");
            false
        }
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockTransport, OpenBehavior};

    fn credentials() -> Credentials {
        Credentials {
            client_id: "dev-1".to_string(),
            username: "key".to_string(),
            password: "secret".to_string(),
        }
    }

    fn fast_reconnect() -> ReconnectConfig {
        ReconnectConfig {
            initial_delay_ms: 5,
            max_delay_ms: 20,
            multiplier: 2,
        }
    }

    fn manager(transport: &MockTransport) -> ConnectionManager<MockTransport> {
        manager_with_router(transport, Arc::new(TopicRouter::new()))
    }

    fn manager_with_router(
        transport: &MockTransport,
        router: Arc<TopicRouter>,
    ) -> ConnectionManager<MockTransport> {
        ConnectionManager::new(
            Arc::new(transport.clone()),
            credentials(),
            fast_reconnect(),
            router,
            Arc::new(LifecycleListeners::new()),
        )
    }

    async fn eventually(what: &str, condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    #[test]
    fn test_connect_outside_runtime_fails() {
        let manager = manager(&MockTransport::new());
        assert!(matches!(manager.connect(), Err(ClientError::NoRuntime)));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_reaches_connected() {
        let transport = MockTransport::new();
        let manager = manager(&transport);

        manager.connect().unwrap();
        manager
            .wait_until_connected(Duration::from_secs(2))
            .await
            .unwrap();

        assert!(manager.is_connected());
        assert_eq!(transport.open_attempts(), 1);
        assert_eq!(transport.opened_with(), vec![credentials()]);
    }

    #[tokio::test]
    async fn test_connect_twice_is_noop() {
        let transport = MockTransport::new();
        let manager = manager(&transport);

        manager.connect().unwrap();
        manager.connect().unwrap();
        manager
            .wait_until_connected(Duration::from_secs(2))
            .await
            .unwrap();
        manager.connect().unwrap();

        assert_eq!(transport.open_attempts(), 1);
    }

    #[tokio::test]
    async fn test_publish_refused_while_disconnected() {
        let transport = MockTransport::new();
        let manager = manager(&transport);

        let result = manager.publish("dev-1/state", b"{}".to_vec()).await;
        assert_eq!(result, Err(TransportError::NotOpen));
        assert!(transport.published().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_closes_transport() {
        let transport = MockTransport::new();
        let manager = manager(&transport);

        manager.connect().unwrap();
        manager
            .wait_until_connected(Duration::from_secs(2))
            .await
            .unwrap();
        manager.disconnect().await;

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(transport.close_count() >= 1);
    }

    #[tokio::test]
    async fn test_wait_until_connected_times_out() {
        let manager = manager(&MockTransport::new());

        let result = manager.wait_until_connected(Duration::from_millis(20)).await;
        assert!(matches!(result, Err(ClientError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_health_tracks_uptime() {
        let transport = MockTransport::new();
        let manager = manager(&transport);
        assert!(!manager.health().is_healthy);

        manager.connect().unwrap();
        manager
            .wait_until_connected(Duration::from_secs(2))
            .await
            .unwrap();

        let health = manager.health();
        assert!(health.is_healthy);
        assert!(health.uptime.is_some());
        assert_eq!(health.reconnect_count, 0);
    }

    #[tokio::test]
    async fn test_retried_first_connect_is_not_a_reconnect() {
        let transport = MockTransport::with_open_script([
            OpenBehavior::Fail("connection refused".to_string()),
            OpenBehavior::Fail("connection refused".to_string()),
        ]);
        let manager = manager(&transport);

        manager.connect().unwrap();
        manager
            .wait_until_connected(Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(transport.open_attempts(), 3);
        assert_eq!(manager.health().reconnect_count, 0);

        transport.inject_disconnect("network down");
        eventually("second session", || {
            transport.open_attempts() == 4 && manager.is_connected()
        })
        .await;
        assert_eq!(manager.health().reconnect_count, 1);
    }

    #[tokio::test]
    async fn test_every_pattern_resubscribed_on_handshake() {
        let router = Arc::new(TopicRouter::new());
        let patterns: Vec<String> = (0..12).map(|n| format!("sensors/{n}/+")).collect();
        for pattern in &patterns {
            router.subscribe(pattern, |_: &str, _: &[u8]| {}).unwrap();
        }

        let transport = MockTransport::new();
        let manager = manager_with_router(&transport, router);
        manager.connect().unwrap();
        manager
            .wait_until_connected(Duration::from_secs(2))
            .await
            .unwrap();

        eventually("all subscriptions", || transport.subscriptions().len() == 12).await;
        assert_eq!(transport.subscriptions(), patterns);
    }

    #[tokio::test]
    async fn test_connect_during_disconnect_waits_for_close() {
        let transport = MockTransport::new();
        let manager = manager(&transport);

        manager.connect().unwrap();
        manager
            .wait_until_connected(Duration::from_secs(2))
            .await
            .unwrap();

        transport.set_close_delay(Some(Duration::from_millis(50)));
        let reconnect = async {
            // Lands while disconnect() is still closing the transport
            tokio::time::sleep(Duration::from_millis(10)).await;
            manager.connect()
        };
        let ((), reconnected) = tokio::join!(manager.disconnect(), reconnect);
        reconnected.unwrap();

        manager
            .wait_until_connected(Duration::from_secs(2))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(manager.state(), ConnectionState::Connected);
        assert!(transport.is_open());
        assert_eq!(transport.open_attempts(), 2);
        assert_eq!(transport.close_count(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_then_connect_opens_a_fresh_session() {
        let transport = MockTransport::new();
        let manager = manager(&transport);

        manager.connect().unwrap();
        manager
            .wait_until_connected(Duration::from_secs(2))
            .await
            .unwrap();
        manager.disconnect().await;

        manager.connect().unwrap();
        manager
            .wait_until_connected(Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(transport.open_attempts(), 2);
        assert_eq!(manager.health().reconnect_count, 0);
    }
}
