//! The dashboard event loop.
//!
//! [`Dashboard`] owns the connection manager and the message router and
//! drains a single queue of [`DashboardEvent`]s. Every state transition
//! and window mutation happens on that one task; after each event a fresh
//! [`DashboardSnapshot`] is published on a watch channel for whatever
//! presentation layer is attached.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::Settings;
use crate::connection::{ConnectionManager, DashboardEvent, TokioScheduler};
use crate::data::{DashboardSnapshot, TimeSeriesWindow};
use crate::error::ConnectionError;
use crate::mqtt::MqttConnector;
use crate::router::{MessageRouter, RouteOutcome};
use crate::session::{KvStore, SessionArbiter};

/// Main application state.
pub struct Dashboard {
    manager: ConnectionManager,
    router: MessageRouter,
    snapshot_tx: watch::Sender<DashboardSnapshot>,
    startup_delay: Duration,
    shutdown_grace: Duration,
}

impl Dashboard {
    /// Create a dashboard from its parts. No delays by default.
    pub fn new(manager: ConnectionManager, router: MessageRouter) -> Self {
        let (snapshot_tx, _) = watch::channel(DashboardSnapshot::default());
        let mut dashboard = Self {
            manager,
            router,
            snapshot_tx,
            startup_delay: Duration::ZERO,
            shutdown_grace: Duration::ZERO,
        };
        dashboard.publish_snapshot();
        dashboard
    }

    /// Build the production dashboard: MQTT transport, tokio timers.
    ///
    /// `events` is the sending half of the queue later passed to
    /// [`Dashboard::run`]. Must be called from within a tokio runtime.
    pub fn from_settings(
        settings: &Settings,
        store: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        events: mpsc::UnboundedSender<DashboardEvent>,
    ) -> Self {
        let arbiter =
            SessionArbiter::with_generated_token(store, clock.clone(), settings.stale_threshold());
        let connector = MqttConnector::new(events.clone(), settings.shutdown_grace());
        let scheduler = TokioScheduler::new(events);

        let manager = ConnectionManager::new(
            settings.manager_config(),
            settings.transport_options(),
            arbiter,
            Box::new(connector),
            Box::new(scheduler),
        );
        let router = MessageRouter::new(
            settings.topic_map(),
            TimeSeriesWindow::new(settings.window_size),
            clock,
        );

        Self::new(manager, router)
            .with_delays(settings.startup_delay(), settings.shutdown_grace())
    }

    /// Set the delay before the first connect and the shutdown grace period.
    pub fn with_delays(mut self, startup: Duration, shutdown_grace: Duration) -> Self {
        self.startup_delay = startup;
        self.shutdown_grace = shutdown_grace;
        self
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> DashboardSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    /// Observe snapshots as they are published.
    pub fn watch_snapshot(&self) -> watch::Receiver<DashboardSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Start (or retry) the broker connection.
    pub fn connect(&mut self) {
        self.manager.connect();
        self.publish_snapshot();
    }

    /// Ask the device to publish fresh readings.
    pub fn request_refresh(&mut self) -> Result<(), ConnectionError> {
        self.manager.request_refresh()
    }

    /// Apply one event. Returns `false` once the dashboard has shut down.
    pub fn handle_event(&mut self, event: DashboardEvent) -> bool {
        let running = match event {
            DashboardEvent::Transport { generation, event } => {
                if let Some(msg) = self.manager.handle_transport(generation, event) {
                    if let RouteOutcome::Recorded { key, value } =
                        self.router.route(&msg.topic, &msg.payload)
                    {
                        debug!(sensor = key.as_str(), value, "Recorded reading");
                    }
                }
                true
            }
            DashboardEvent::Timer { id, kind } => {
                self.manager.on_timer(id, kind);
                true
            }
            DashboardEvent::Connect => {
                self.manager.connect();
                true
            }
            DashboardEvent::RefreshRequested => {
                if let Err(e) = self.manager.request_refresh() {
                    warn!("Cannot request refresh: {}", e);
                }
                true
            }
            DashboardEvent::Shutdown => {
                self.manager.shutdown();
                false
            }
        };
        self.publish_snapshot();
        running
    }

    /// Tear down the connection and give the transport time to flush.
    pub async fn shutdown(&mut self) {
        self.manager.shutdown();
        self.publish_snapshot();
        tokio::time::sleep(self.shutdown_grace).await;
    }

    /// Run until a [`DashboardEvent::Shutdown`], the queue closing, or
    /// `shutdown` resolving. Connects after the startup delay.
    ///
    /// ```
    /// use std::sync::Arc;
    /// use auralink_dashboard::{
    ///     ConnectionManager, Dashboard, DashboardEvent, ManualClock, MemoryStore,
    ///     MessageRouter, RecordingConnector, SessionArbiter, Settings, TimeSeriesWindow,
    ///     VirtualScheduler,
    /// };
    /// use tokio::sync::mpsc;
    ///
    /// # tokio_test::block_on(async {
    /// let settings = Settings::default();
    /// let clock = Arc::new(ManualClock::new(0));
    /// let arbiter = SessionArbiter::new(
    ///     Arc::new(MemoryStore::new()),
    ///     clock.clone(),
    ///     "instance-a",
    ///     settings.stale_threshold(),
    /// );
    /// let manager = ConnectionManager::new(
    ///     settings.manager_config(),
    ///     settings.transport_options(),
    ///     arbiter,
    ///     Box::new(RecordingConnector::new()),
    ///     Box::new(VirtualScheduler::new()),
    /// );
    /// let router = MessageRouter::new(settings.topic_map(), TimeSeriesWindow::default(), clock);
    /// let mut dashboard = Dashboard::new(manager, router);
    ///
    /// let (tx, mut rx) = mpsc::unbounded_channel();
    /// tx.send(DashboardEvent::Shutdown).unwrap();
    /// dashboard.run(&mut rx, std::future::pending()).await;
    /// assert!(!dashboard.manager().has_transport());
    /// # });
    /// ```
    pub async fn run<F>(&mut self, events: &mut mpsc::UnboundedReceiver<DashboardEvent>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        tokio::select! {
            _ = tokio::time::sleep(self.startup_delay) => self.connect(),
            _ = &mut shutdown => {
                info!("Shutdown requested before connecting");
                self.shutdown().await;
                return;
            }
        }

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        if !self.handle_event(event) {
                            // Already torn down; only the grace period is left
                            tokio::time::sleep(self.shutdown_grace).await;
                            return;
                        }
                    }
                    None => {
                        debug!("Event queue closed");
                        break;
                    }
                },
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }

        self.shutdown().await;
    }

    fn publish_snapshot(&mut self) {
        let snapshot = DashboardSnapshot::capture(
            self.manager.state(),
            self.router.window(),
            self.router.readings(),
            self.router.auxiliary(),
            self.manager.subscriptions(),
        );
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

impl std::fmt::Debug for Dashboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dashboard")
            .field("manager", &self.manager)
            .field("window_len", &self.router.window().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::connection::{RecordingConnector, TransportEvent, VirtualScheduler};
    use crate::router::TopicMap;
    use crate::session::MemoryStore;
    use auralink_types::{ConnectionState, DisconnectReason, SensorKey};

    const T0: u64 = 1_704_103_200_000;

    fn dashboard() -> (Dashboard, RecordingConnector, MemoryStore) {
        let settings = Settings::default();
        let store = MemoryStore::new();
        let clock = ManualClock::new(T0);
        let connector = RecordingConnector::new();
        let arbiter = SessionArbiter::new(
            Arc::new(store.clone()),
            Arc::new(clock.clone()),
            "dash-a",
            settings.stale_threshold(),
        );
        let manager = ConnectionManager::new(
            settings.manager_config(),
            settings.transport_options(),
            arbiter,
            Box::new(connector.clone()),
            Box::new(VirtualScheduler::with_clock(clock.clone())),
        );
        let router = MessageRouter::new(TopicMap::default(), TimeSeriesWindow::default(), Arc::new(clock));
        (Dashboard::new(manager, router), connector, store)
    }

    fn transport(event: TransportEvent) -> DashboardEvent {
        DashboardEvent::Transport {
            generation: 1,
            event,
        }
    }

    #[test]
    fn refresh_allowed_before_connection_settles() {
        let (mut dash, connector, _) = dashboard();
        dash.handle_event(DashboardEvent::Connect);
        dash.handle_event(transport(TransportEvent::Connected));

        let snap = dash.snapshot();
        assert!(!snap.stable);
        assert!(snap.state.is_connected());
        dash.request_refresh().unwrap();
        assert!(connector
            .published()
            .iter()
            .any(|(topic, payload, _)| topic == "esp32/control" && payload == "refresh"));
    }

    #[test]
    fn messages_flow_into_snapshot() {
        let (mut dash, _, _) = dashboard();
        dash.handle_event(DashboardEvent::Connect);
        dash.handle_event(transport(TransportEvent::Connected));
        dash.handle_event(transport(TransportEvent::Message {
            topic: "esp32/sensors/temperature".into(),
            payload: "21.5".into(),
        }));
        dash.handle_event(transport(TransportEvent::Message {
            topic: "esp32/display".into(),
            payload: "Hello".into(),
        }));

        let snap = dash.snapshot();
        assert_eq!(snap.state, ConnectionState::ConnectedUnstable);
        assert_eq!(snap.labels, vec!["10:00:00"]);
        assert_eq!(snap.series[&SensorKey::Temperature], vec![Some(21.5)]);
        assert_eq!(snap.auxiliary[&auralink_types::AuxChannel::Display], "Hello");
    }

    #[test]
    fn messages_before_connect_are_dropped() {
        let (mut dash, _, _) = dashboard();
        dash.handle_event(transport(TransportEvent::Message {
            topic: "esp32/sensors/temperature".into(),
            payload: "21.5".into(),
        }));
        assert!(dash.router().window().is_empty());
    }

    #[test]
    fn shutdown_event_stops_and_releases() {
        let (mut dash, connector, store) = dashboard();
        dash.handle_event(DashboardEvent::Connect);
        dash.handle_event(transport(TransportEvent::Connected));

        assert!(!dash.handle_event(DashboardEvent::Shutdown));
        assert!(store.is_empty());
        assert_eq!(
            dash.snapshot().state,
            ConnectionState::Disconnected(DisconnectReason::Closed)
        );
        assert!(connector
            .published()
            .contains(&("auralink/dashboard/status".into(), "offline".into(), true)));
    }

    #[test]
    fn refresh_event_when_disconnected_is_harmless() {
        let (mut dash, connector, _) = dashboard();
        assert!(dash.handle_event(DashboardEvent::RefreshRequested));
        assert!(connector.ops().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_connects_after_startup_delay_and_stops_on_shutdown() {
        let (dash, connector, store) = dashboard();
        let mut dash = dash.with_delays(Duration::from_millis(500), Duration::from_millis(100));
        let (tx, mut rx) = mpsc::unbounded_channel();

        tx.send(transport(TransportEvent::Connected)).unwrap();
        tx.send(DashboardEvent::Shutdown).unwrap();
        dash.run(&mut rx, std::future::pending()).await;

        assert_eq!(connector.opened(), vec![1]);
        assert!(store.is_empty());
        assert!(!dash.manager().has_transport());
    }

    #[tokio::test(start_paused = true)]
    async fn run_honours_external_shutdown() {
        let (mut dash, connector, _) = dashboard();
        let (_tx, mut rx) = mpsc::unbounded_channel();

        dash.run(&mut rx, tokio::time::sleep(Duration::from_secs(1)))
            .await;
        assert_eq!(connector.opened(), vec![1]);
        assert_eq!(
            dash.manager().state(),
            ConnectionState::Disconnected(DisconnectReason::Closed)
        );
    }
}
