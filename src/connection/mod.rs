//! Connection lifecycle management.
//!
//! [`ConnectionManager`] owns the single broker connection. It asks the
//! [`SessionArbiter`] for admission, sequences the post-connect work
//! (presence, delayed subscriptions, stabilization, heartbeat) and cleans
//! up retained state and the session lease when the connection goes away.
//!
//! All inputs arrive as calls from the dashboard event loop: transport
//! events via [`ConnectionManager::handle_transport`], fired timers via
//! [`ConnectionManager::on_timer`]. Nothing here blocks or spawns.
//!
//! ```text
//!  connect() ──▶ try_claim ──✗──▶ SessionConflict
//!                    │✓
//!                    ▼
//!               Connecting ──Connected──▶ ConnectedUnstable ──3s──▶ ConnectedStable
//!                                            │ publish "online"
//!                                            │ heartbeat every 10s
//!                                            └ subscribe after 1s
//!
//!  Closed ──▶ clear retained, publish "offline", release lease ──▶ Disconnected(Closed)
//! ```

mod event;
mod recording;
mod timer;
mod transport;

pub use event::{
    DashboardEvent, FaultKind, Generation, TimerId, TimerKind, TransportEvent, TransportFault,
};
pub use recording::{RecordingConnector, TransportOp};
pub use timer::{Scheduler, TokioScheduler, VirtualScheduler};
pub use transport::{
    Connector, Credentials, LastWill, Transport, TransportOptions, DEFAULT_CLIENT_ID,
};

use std::collections::BTreeMap;
use std::time::Duration;

use auralink_types::{ConnectionState, DisconnectReason};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::ConnectionError;
use crate::session::SessionArbiter;

/// Payload published on the presence topic while connected.
pub const PRESENCE_ONLINE: &str = "online";

/// Payload published on the presence topic when leaving.
pub const PRESENCE_OFFLINE: &str = "offline";

/// Payload sent on the control topic to request fresh readings.
pub const REFRESH_COMMAND: &str = "refresh";

/// Topics and timings the manager works with.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Topics subscribed after connecting.
    pub subscribe_topics: Vec<String>,
    /// Retained `online`/`offline` presence topic.
    pub presence_topic: String,
    /// Topic for commands to the device.
    pub control_topic: String,
    /// Delay between the broker ack and the subscription burst.
    pub subscribe_delay: Duration,
    /// Delay between the broker ack and declaring the connection stable.
    pub stabilize_delay: Duration,
    /// Session lease refresh cadence.
    pub heartbeat_interval: Duration,
}

impl ManagerConfig {
    /// Topics whose retained state is purged on teardown.
    pub fn retained_topics(&self) -> Vec<String> {
        std::iter::once(self.presence_topic.clone())
            .chain(self.subscribe_topics.iter().cloned())
            .collect()
    }
}

/// Per-topic subscription outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Requested, no answer yet.
    Pending,
    Active,
    /// The stream for this topic will stay stale.
    Failed(String),
}

/// An inbound publish to hand to the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: String,
}

#[derive(Debug, Default)]
struct Timers {
    stabilize: Option<TimerId>,
    subscribe: Option<TimerId>,
    heartbeat: Option<TimerId>,
}

/// State machine owning the broker connection.
pub struct ConnectionManager {
    config: ManagerConfig,
    options: TransportOptions,
    arbiter: SessionArbiter,
    connector: Box<dyn Connector>,
    scheduler: Box<dyn Scheduler>,

    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,

    transport: Option<Box<dyn Transport>>,
    generation: Generation,
    attempt_in_flight: bool,
    timers: Timers,
    subscriptions: BTreeMap<String, SubscriptionStatus>,
}

impl ConnectionManager {
    pub fn new(
        config: ManagerConfig,
        options: TransportOptions,
        arbiter: SessionArbiter,
        connector: Box<dyn Connector>,
        scheduler: Box<dyn Scheduler>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::default());
        Self {
            config,
            options,
            arbiter,
            connector,
            scheduler,
            state: ConnectionState::default(),
            state_tx,
            transport: None,
            generation: 0,
            attempt_in_flight: false,
            timers: Timers::default(),
            subscriptions: BTreeMap::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Observe state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Generation of the current (or most recent) transport.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn has_transport(&self) -> bool {
        self.transport.is_some()
    }

    /// Whether the heartbeat loop is running.
    pub fn heartbeat_running(&self) -> bool {
        self.timers.heartbeat.is_some()
    }

    pub fn subscriptions(&self) -> &BTreeMap<String, SubscriptionStatus> {
        &self.subscriptions
    }

    pub fn arbiter(&self) -> &SessionArbiter {
        &self.arbiter
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Start a connection.
    ///
    /// No-op while an attempt is in flight or a transport exists. Otherwise
    /// claims the session and opens a transport; a live foreign lease ends
    /// in [`ConnectionState::SessionConflict`] without touching the network.
    pub fn connect(&mut self) {
        if self.attempt_in_flight || self.transport.is_some() {
            debug!("Connection already in progress or active");
            return;
        }

        match self.arbiter.try_claim() {
            Ok(true) => {}
            Ok(false) => {
                warn!("{}", ConnectionError::SessionConflict);
                self.set_state(ConnectionState::SessionConflict);
                return;
            }
            Err(e) => {
                error!("Failed to claim session: {}", e);
                self.arbiter.release();
                self.set_state(ConnectionState::InitError);
                return;
            }
        }

        self.generation += 1;
        info!(
            broker = %self.options.broker_url,
            generation = self.generation,
            "Initiating broker connection"
        );

        match self.connector.open(&self.options, self.generation) {
            Ok(transport) => {
                self.transport = Some(transport);
                self.attempt_in_flight = true;
                self.subscriptions.clear();
                self.set_state(ConnectionState::Connecting);
            }
            Err(e) => {
                error!("{}", e);
                self.arbiter.release();
                self.set_state(ConnectionState::InitError);
            }
        }
    }

    /// Apply a transport event. Inbound publishes are returned for routing.
    pub fn handle_transport(
        &mut self,
        generation: Generation,
        event: TransportEvent,
    ) -> Option<InboundMessage> {
        if generation != self.generation || self.transport.is_none() {
            debug!(generation, current = self.generation, "Ignoring event from stale transport");
            return None;
        }

        match event {
            TransportEvent::Connected => self.on_connected(),
            TransportEvent::Message { topic, payload } => {
                debug!(topic = %topic, payload = %payload, "Received message");
                return Some(InboundMessage { topic, payload });
            }
            TransportEvent::SubscribeAck { topic, result } => self.on_subscribe_ack(topic, result),
            TransportEvent::Error(fault) => self.on_error(fault),
            TransportEvent::Offline => {
                info!("Broker client offline");
                self.cancel_timer(TimerKind::Stabilize);
                self.set_state(ConnectionState::Disconnected(DisconnectReason::Offline));
            }
            TransportEvent::Reconnecting => {
                info!("Broker client reconnecting");
                self.cancel_timer(TimerKind::Stabilize);
                self.set_state(ConnectionState::Reconnecting);
            }
            TransportEvent::Closed => {
                info!("Broker connection closed");
                self.teardown(true);
                self.set_state(ConnectionState::Disconnected(DisconnectReason::Closed));
            }
        }
        None
    }

    /// Apply a fired timer. Timers that were cancelled or replaced are ignored.
    pub fn on_timer(&mut self, id: TimerId, kind: TimerKind) {
        let slot = match kind {
            TimerKind::Stabilize => &mut self.timers.stabilize,
            TimerKind::Subscribe => &mut self.timers.subscribe,
            TimerKind::Heartbeat => &mut self.timers.heartbeat,
        };
        if *slot != Some(id) {
            debug!(?kind, ?id, "Ignoring superseded timer");
            return;
        }
        *slot = None;

        match kind {
            TimerKind::Stabilize => {
                if self.state == ConnectionState::ConnectedUnstable {
                    info!("Connection stable");
                    self.set_state(ConnectionState::ConnectedStable);
                }
            }
            TimerKind::Subscribe => self.subscribe_all(),
            TimerKind::Heartbeat => self.on_heartbeat(),
        }
    }

    /// Ask the device for fresh readings.
    pub fn request_refresh(&mut self) -> Result<(), ConnectionError> {
        if !self.state.is_connected() {
            return Err(ConnectionError::NotConnected);
        }
        let transport = self.transport.as_mut().ok_or(ConnectionError::NotConnected)?;
        transport.publish(&self.config.control_topic, REFRESH_COMMAND, false)?;
        info!("Published refresh command");
        Ok(())
    }

    /// Tear down for good: cancel timers, purge retained state, announce
    /// offline, disconnect and release the lease.
    ///
    /// Always completes, whatever state the transport is in.
    pub fn shutdown(&mut self) {
        info!("Shutting down broker connection");
        self.teardown(true);
        self.set_state(ConnectionState::Disconnected(DisconnectReason::Closed));
    }

    fn on_connected(&mut self) {
        info!("Connected to broker");
        self.attempt_in_flight = false;
        self.set_state(ConnectionState::ConnectedUnstable);

        if let Some(transport) = self.transport.as_mut() {
            if let Err(e) = transport.publish(&self.config.presence_topic, PRESENCE_ONLINE, true) {
                warn!("Failed to publish online presence: {}", e);
            }
        }

        if self.timers.heartbeat.is_none() {
            self.timers.heartbeat = Some(
                self.scheduler
                    .schedule(self.config.heartbeat_interval, TimerKind::Heartbeat),
            );
        }

        // Subscriptions wait for the transport to settle
        self.cancel_timer(TimerKind::Stabilize);
        self.cancel_timer(TimerKind::Subscribe);
        self.timers.stabilize = Some(
            self.scheduler
                .schedule(self.config.stabilize_delay, TimerKind::Stabilize),
        );
        self.timers.subscribe = Some(
            self.scheduler
                .schedule(self.config.subscribe_delay, TimerKind::Subscribe),
        );
    }

    fn subscribe_all(&mut self) {
        let Some(transport) = self.transport.as_mut().filter(|_| self.state.is_connected()) else {
            warn!("Client disconnected before subscriptions could be made");
            return;
        };

        for topic in &self.config.subscribe_topics {
            let status = match transport.subscribe(topic) {
                Ok(()) => SubscriptionStatus::Pending,
                Err(e) => {
                    error!("Failed to subscribe to {}: {}", topic, e);
                    SubscriptionStatus::Failed(e.to_string())
                }
            };
            self.subscriptions.insert(topic.clone(), status);
        }
    }

    fn on_subscribe_ack(&mut self, topic: String, result: Result<(), String>) {
        let status = match result {
            Ok(()) => {
                info!("Subscribed to {}", topic);
                SubscriptionStatus::Active
            }
            Err(reason) => {
                let err = ConnectionError::Subscription {
                    topic: topic.clone(),
                    reason: reason.clone(),
                };
                error!("{}", err);
                SubscriptionStatus::Failed(reason)
            }
        };
        self.subscriptions.insert(topic, status);

        let settled = self
            .subscriptions
            .values()
            .all(|s| *s != SubscriptionStatus::Pending);
        if settled && self.subscriptions.len() == self.config.subscribe_topics.len() {
            info!("All subscriptions completed");
        }
    }

    fn on_error(&mut self, fault: TransportFault) {
        self.attempt_in_flight = false;
        match fault.kind {
            FaultKind::Auth => {
                error!("{} - check username/password", ConnectionError::Auth(fault.message));
                self.teardown(false);
                self.set_state(ConnectionState::AuthError);
            }
            FaultKind::ResourceExhausted => {
                warn!("{}, waiting for transport retry", ConnectionError::ServerBusy(fault.message));
                self.cancel_timer(TimerKind::Stabilize);
                self.set_state(ConnectionState::ServerBusy);
            }
            FaultKind::Other => {
                warn!("{}", ConnectionError::Transport(fault.message));
                self.cancel_timer(TimerKind::Stabilize);
                self.set_state(ConnectionState::Disconnected(DisconnectReason::TransportError));
            }
        }
    }

    fn on_heartbeat(&mut self) {
        if self.transport.is_none() {
            return;
        }
        match self.arbiter.heartbeat() {
            Ok(true) => debug!("Session heartbeat"),
            Ok(false) => warn!("Session lease no longer held by this instance"),
            Err(e) => warn!("Failed to write session heartbeat: {}", e),
        }
        self.timers.heartbeat = Some(
            self.scheduler
                .schedule(self.config.heartbeat_interval, TimerKind::Heartbeat),
        );
    }

    /// Common teardown. Each step is independent; none can stop the lease release.
    fn teardown(&mut self, announce: bool) {
        self.cancel_timer(TimerKind::Stabilize);
        self.cancel_timer(TimerKind::Subscribe);
        self.cancel_timer(TimerKind::Heartbeat);

        if let Some(mut transport) = self.transport.take() {
            if announce {
                self.clear_retained(transport.as_mut());
                if let Err(e) =
                    transport.publish(&self.config.presence_topic, PRESENCE_OFFLINE, true)
                {
                    warn!("Failed to publish offline presence: {}", e);
                }
            }
            if let Err(e) = transport.disconnect() {
                warn!("Failed to disconnect cleanly: {}", e);
            }
        }

        self.arbiter.release();
        self.attempt_in_flight = false;
        self.subscriptions.clear();
    }

    fn clear_retained(&self, transport: &mut dyn Transport) {
        debug!("Clearing retained messages");
        for topic in self.config.retained_topics() {
            if let Err(e) = transport.publish(&topic, "", true) {
                warn!("Failed to clear retained message for {}: {}", topic, e);
            }
        }
    }

    fn cancel_timer(&mut self, kind: TimerKind) {
        let slot = match kind {
            TimerKind::Stabilize => &mut self.timers.stabilize,
            TimerKind::Subscribe => &mut self.timers.subscribe,
            TimerKind::Heartbeat => &mut self.timers.heartbeat,
        };
        if let Some(id) = slot.take() {
            self.scheduler.cancel(id);
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            info!(from = %self.state, to = %state, "Connection state changed");
            self.state = state;
            self.state_tx.send_replace(state);
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state)
            .field("generation", &self.generation)
            .field("has_transport", &self.transport.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::config::Settings;
    use crate::session::{KvStore, MemoryStore, HEARTBEAT_KEY, SESSION_KEY};
    use std::sync::Arc;

    const T0: u64 = 1_704_103_200_000;
    const STALE: Duration = Duration::from_secs(15);

    struct Harness {
        manager: ConnectionManager,
        connector: RecordingConnector,
        timers: VirtualScheduler,
        store: MemoryStore,
        clock: ManualClock,
    }

    impl Harness {
        fn new() -> Self {
            let store = MemoryStore::new();
            let clock = ManualClock::new(T0);
            Self::with_store(store, clock)
        }

        fn with_store(store: MemoryStore, clock: ManualClock) -> Self {
            let settings = Settings::default();
            let connector = RecordingConnector::new();
            let timers = VirtualScheduler::with_clock(clock.clone());
            let arbiter = SessionArbiter::new(
                Arc::new(store.clone()),
                Arc::new(clock.clone()),
                "dash-a",
                STALE,
            );
            let manager = ConnectionManager::new(
                settings.manager_config(),
                settings.transport_options(),
                arbiter,
                Box::new(connector.clone()),
                Box::new(timers.clone()),
            );
            Self {
                manager,
                connector,
                timers,
                store,
                clock,
            }
        }

        fn event(&mut self, event: TransportEvent) -> Option<InboundMessage> {
            let generation = self.manager.generation();
            self.manager.handle_transport(generation, event)
        }

        fn connect_and_ack(&mut self) {
            self.manager.connect();
            self.event(TransportEvent::Connected);
        }

        /// Advance in small steps so rescheduled timers fire on time.
        fn advance(&mut self, by: Duration) {
            let step = Duration::from_millis(100);
            let mut left = by;
            while !left.is_zero() {
                let tick = left.min(step);
                left -= tick;
                for (id, kind) in self.timers.advance(tick) {
                    self.manager.on_timer(id, kind);
                }
            }
        }

        fn lease_present(&self) -> bool {
            self.store.get(SESSION_KEY).unwrap().is_some()
        }
    }

    #[test]
    fn connect_claims_session_and_opens_transport() {
        let mut h = Harness::new();
        assert_eq!(
            h.manager.state(),
            ConnectionState::Disconnected(DisconnectReason::Idle)
        );

        h.manager.connect();
        assert_eq!(h.manager.state(), ConnectionState::Connecting);
        assert_eq!(h.connector.opened(), vec![1]);
        assert!(h.manager.arbiter().holds_lease().unwrap());
    }

    #[test]
    fn live_foreign_lease_blocks_connect() {
        let store = MemoryStore::new();
        let clock = ManualClock::new(T0);
        let other =
            SessionArbiter::new(Arc::new(store.clone()), Arc::new(clock.clone()), "dash-b", STALE);
        assert!(other.try_claim().unwrap());

        let mut h = Harness::with_store(store, clock);
        h.manager.connect();
        assert_eq!(h.manager.state(), ConnectionState::SessionConflict);
        assert!(h.connector.opened().is_empty());
        assert!(!h.manager.has_transport());
        // The other instance keeps its lease
        assert!(other.holds_lease().unwrap());
    }

    #[test]
    fn transport_init_failure_releases_lease() {
        let mut h = Harness::new();
        h.connector.fail_next_open("bad options");
        h.manager.connect();
        assert_eq!(h.manager.state(), ConnectionState::InitError);
        assert!(!h.lease_present());
        assert!(h.manager.state().is_fatal());

        // Fatal states leave only through an explicit connect
        h.manager.connect();
        assert_eq!(h.manager.state(), ConnectionState::Connecting);
    }

    #[test]
    fn connect_is_noop_while_attempt_in_flight() {
        let mut h = Harness::new();
        h.manager.connect();
        h.manager.connect();
        assert_eq!(h.connector.opened(), vec![1]);

        h.event(TransportEvent::Connected);
        h.manager.connect();
        assert_eq!(h.connector.opened(), vec![1]);
    }

    #[test]
    fn connected_publishes_retained_online() {
        let mut h = Harness::new();
        h.connect_and_ack();
        assert_eq!(h.manager.state(), ConnectionState::ConnectedUnstable);
        assert_eq!(
            h.connector.published(),
            vec![(
                "auralink/dashboard/status".to_string(),
                "online".to_string(),
                true
            )]
        );
        assert!(h.manager.heartbeat_running());
    }

    #[test]
    fn subscriptions_wait_one_second() {
        let mut h = Harness::new();
        h.connect_and_ack();

        h.advance(Duration::from_millis(900));
        assert!(h.connector.subscribed().is_empty());

        h.advance(Duration::from_millis(100));
        assert_eq!(h.connector.subscribed(), h.manager.config().subscribe_topics);
        assert_eq!(h.manager.subscriptions().len(), 6);
        assert!(h
            .manager
            .subscriptions()
            .values()
            .all(|s| *s == SubscriptionStatus::Pending));
    }

    #[test]
    fn stable_after_three_seconds() {
        let mut h = Harness::new();
        h.connect_and_ack();
        h.advance(Duration::from_millis(2_900));
        assert_eq!(h.manager.state(), ConnectionState::ConnectedUnstable);
        h.advance(Duration::from_millis(100));
        assert_eq!(h.manager.state(), ConnectionState::ConnectedStable);
    }

    #[test]
    fn subscription_skipped_when_dropped_before_timer() {
        let mut h = Harness::new();
        h.connect_and_ack();
        h.event(TransportEvent::Offline);
        h.advance(Duration::from_secs(5));

        assert!(h.connector.subscribed().is_empty());
        // Offline cancels stabilization
        assert_eq!(
            h.manager.state(),
            ConnectionState::Disconnected(DisconnectReason::Offline)
        );
    }

    #[test]
    fn subscription_outcomes_are_tracked_per_topic() {
        let mut h = Harness::new();
        h.connector.fail_subscribe("esp32/display");
        h.connect_and_ack();
        h.advance(Duration::from_secs(1));

        assert_eq!(
            h.manager.subscriptions()["esp32/display"],
            SubscriptionStatus::Failed(
                "failed to subscribe to esp32/display: request queue full".to_string()
            )
        );

        h.event(TransportEvent::SubscribeAck {
            topic: "esp32/sensors/temperature".into(),
            result: Ok(()),
        });
        h.event(TransportEvent::SubscribeAck {
            topic: "esp32/sensors/humidity".into(),
            result: Err("not allowed".into()),
        });
        let subs = h.manager.subscriptions();
        assert_eq!(subs["esp32/sensors/temperature"], SubscriptionStatus::Active);
        assert_eq!(
            subs["esp32/sensors/humidity"],
            SubscriptionStatus::Failed("not allowed".into())
        );
        // A failed subscription is never fatal
        assert!(h.manager.state().is_connected());
    }

    #[test]
    fn heartbeat_refreshes_lease_every_interval() {
        let mut h = Harness::new();
        h.connect_and_ack();

        h.advance(Duration::from_secs(10));
        let beat = h.store.get(HEARTBEAT_KEY).unwrap().unwrap();
        assert_eq!(beat, (T0 + 10_000).to_string());

        h.advance(Duration::from_secs(10));
        let beat = h.store.get(HEARTBEAT_KEY).unwrap().unwrap();
        assert_eq!(beat, h.clock.now_ms().to_string());

        // Kept alive well past the stale threshold
        assert!(h.manager.arbiter().live_lease().unwrap().is_some());
    }

    #[test]
    fn auth_error_is_fatal_and_releases_session() {
        let mut h = Harness::new();
        h.connect_and_ack();
        h.connector.clear();

        h.event(TransportEvent::Error(TransportFault::new(
            FaultKind::Auth,
            "not authorized",
        )));
        assert_eq!(h.manager.state(), ConnectionState::AuthError);
        assert!(!h.manager.heartbeat_running());
        assert!(!h.manager.has_transport());
        assert!(!h.lease_present());
        // Torn down without announcing
        assert_eq!(h.connector.ops(), vec![TransportOp::Disconnect]);

        h.advance(Duration::from_secs(60));
        assert_eq!(h.manager.state(), ConnectionState::AuthError);
        assert_eq!(h.connector.opened(), vec![1]);
        assert_eq!(h.timers.pending_count(), 0);
    }

    #[test]
    fn server_busy_keeps_transport_and_lease() {
        let mut h = Harness::new();
        h.connect_and_ack();
        h.event(TransportEvent::Error(TransportFault::new(
            FaultKind::ResourceExhausted,
            "insufficient resources",
        )));
        assert_eq!(h.manager.state(), ConnectionState::ServerBusy);
        assert!(h.manager.has_transport());
        assert!(h.lease_present());
        // Never promoted while busy
        h.advance(Duration::from_secs(5));
        assert_eq!(h.manager.state(), ConnectionState::ServerBusy);
    }

    #[test]
    fn transport_retry_cycle_preserves_session() {
        let mut h = Harness::new();
        h.connect_and_ack();
        h.advance(Duration::from_secs(4));

        h.event(TransportEvent::Error(TransportFault::new(
            FaultKind::Other,
            "connection reset",
        )));
        assert_eq!(
            h.manager.state(),
            ConnectionState::Disconnected(DisconnectReason::TransportError)
        );
        h.event(TransportEvent::Reconnecting);
        assert_eq!(h.manager.state(), ConnectionState::Reconnecting);
        assert!(h.lease_present());

        h.connector.clear();
        h.event(TransportEvent::Connected);
        assert_eq!(h.manager.state(), ConnectionState::ConnectedUnstable);
        // Same transport, no re-arbitration
        assert_eq!(h.connector.opened(), vec![1]);
        assert_eq!(h.connector.published().len(), 1);

        h.advance(Duration::from_secs(3));
        assert_eq!(h.manager.state(), ConnectionState::ConnectedStable);
        assert!(h.timers.is_pending(TimerKind::Heartbeat));
    }

    #[test]
    fn close_clears_retained_then_announces_offline() {
        let mut h = Harness::new();
        h.connect_and_ack();
        h.advance(Duration::from_secs(3));
        h.connector.clear();

        h.event(TransportEvent::Closed);
        assert_eq!(
            h.manager.state(),
            ConnectionState::Disconnected(DisconnectReason::Closed)
        );

        let mut expected: Vec<TransportOp> = h
            .manager
            .config()
            .retained_topics()
            .into_iter()
            .map(|topic| TransportOp::Publish {
                topic,
                payload: String::new(),
                retain: true,
            })
            .collect();
        expected.push(TransportOp::Publish {
            topic: "auralink/dashboard/status".into(),
            payload: "offline".into(),
            retain: true,
        });
        expected.push(TransportOp::Disconnect);
        assert_eq!(h.connector.ops(), expected);

        assert!(!h.lease_present());
        assert!(!h.manager.heartbeat_running());
        assert_eq!(h.timers.pending_count(), 0);
    }

    #[test]
    fn cleanup_failures_never_block_release() {
        let mut h = Harness::new();
        h.connect_and_ack();
        h.connector.fail_publishes(true);

        h.manager.shutdown();
        assert!(!h.lease_present());
        assert!(h.connector.ops().contains(&TransportOp::Disconnect));
    }

    #[test]
    fn shutdown_without_transport_still_releases() {
        let mut h = Harness::new();
        h.manager.arbiter().try_claim().unwrap();
        h.manager.shutdown();
        assert!(!h.lease_present());
        assert!(h.connector.ops().is_empty());
        // Idempotent
        h.manager.shutdown();
        assert!(!h.lease_present());
    }

    #[test]
    fn events_from_old_generation_are_ignored() {
        let mut h = Harness::new();
        h.connect_and_ack();
        h.event(TransportEvent::Closed);
        h.manager.connect();
        assert_eq!(h.manager.generation(), 2);

        let late = h.manager.handle_transport(
            1,
            TransportEvent::Message {
                topic: "esp32/display".into(),
                payload: "stale".into(),
            },
        );
        assert!(late.is_none());
        h.manager.handle_transport(1, TransportEvent::Connected);
        assert_eq!(h.manager.state(), ConnectionState::Connecting);
    }

    #[test]
    fn inbound_messages_are_returned() {
        let mut h = Harness::new();
        h.connect_and_ack();
        let msg = h.event(TransportEvent::Message {
            topic: "esp32/sensors/temperature".into(),
            payload: "21.5".into(),
        });
        assert_eq!(
            msg,
            Some(InboundMessage {
                topic: "esp32/sensors/temperature".into(),
                payload: "21.5".into(),
            })
        );
    }

    #[test]
    fn refresh_requires_connection() {
        let mut h = Harness::new();
        assert!(matches!(
            h.manager.request_refresh(),
            Err(ConnectionError::NotConnected)
        ));

        h.manager.connect();
        assert!(h.manager.request_refresh().is_err());

        h.event(TransportEvent::Connected);
        h.connector.clear();
        h.manager.request_refresh().unwrap();
        assert_eq!(
            h.connector.published(),
            vec![("esp32/control".to_string(), "refresh".to_string(), false)]
        );
    }

    #[test]
    fn state_changes_are_observable() {
        let mut h = Harness::new();
        let rx = h.manager.watch_state();
        h.connect_and_ack();
        assert_eq!(*rx.borrow(), ConnectionState::ConnectedUnstable);
    }
}
