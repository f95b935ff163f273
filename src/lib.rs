//! # auralink-dashboard
//!
//! Client core of a live telemetry dashboard for a sensor device that
//! publishes over MQTT.
//!
//! The crate keeps exactly one broker session alive across however many
//! dashboard processes a user starts, and turns asynchronously arriving
//! sensor readings into a single time-aligned series ready for charting.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Dashboard                           │
//! │                                                              │
//! │  DashboardEvent queue ──▶ ConnectionManager ──▶ SessionArbiter│
//! │        ▲      ▲                 │                    │       │
//! │        │      │                 │ InboundMessage     ▼       │
//! │   MqttConnector  TokioScheduler │                 KvStore    │
//! │   (pump task)    (timers)       ▼                            │
//! │                            MessageRouter                     │
//! │                         ┌───────┴────────┐                   │
//! │                         ▼                ▼                   │
//! │                 TimeSeriesWindow   AuxiliaryLatest           │
//! │                                                              │
//! │              watch::Sender<DashboardSnapshot> ──▶ (presentation)
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! - **[`connection`]**: the connection state machine, transport and
//!   timer boundaries, and the closed set of events it consumes
//! - **[`session`]**: advisory cross-instance lease over a shared [`KvStore`]
//! - **[`router`]**: topic dispatch into the window and latest-value slots
//! - **[`data`]**: [`TimeSeriesWindow`], latest-value slots and snapshots
//! - **[`mqtt`]**: the `rumqttc` transport
//! - **[`app`]**: the [`Dashboard`] event loop tying it together
//!
//! ## Usage
//!
//! ### Headless against a broker
//!
//! ```bash
//! auralink --broker wss://broker.example.com:8884/mqtt --username dash --password secret
//! ```
//!
//! ### Charting readings directly
//!
//! ```
//! use auralink_dashboard::{SensorKey, TimeSeriesWindow};
//!
//! let mut window = TimeSeriesWindow::new(20);
//! window.append(SensorKey::Temperature, 21.5, "10:00:00");
//! window.append(SensorKey::Humidity, 60.0, "10:00:01");
//!
//! assert_eq!(window.labels(), vec!["10:00:00", "10:00:01"]);
//! // Temperature is carried forward into the second slot
//! assert_eq!(window.series(SensorKey::Temperature), vec![Some(21.5), Some(21.5)]);
//! ```
//!
//! ### Driving the connection manager without a broker
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use auralink_dashboard::{
//!     ConnectionManager, ConnectionState, ManualClock, MemoryStore, RecordingConnector,
//!     SessionArbiter, Settings, TransportEvent, VirtualScheduler,
//! };
//!
//! let settings = Settings::default();
//! let clock = ManualClock::new(0);
//! let timers = VirtualScheduler::with_clock(clock.clone());
//! let arbiter = SessionArbiter::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(clock),
//!     "instance-a",
//!     settings.stale_threshold(),
//! );
//! let mut manager = ConnectionManager::new(
//!     settings.manager_config(),
//!     settings.transport_options(),
//!     arbiter,
//!     Box::new(RecordingConnector::new()),
//!     Box::new(timers.clone()),
//! );
//!
//! manager.connect();
//! manager.handle_transport(manager.generation(), TransportEvent::Connected);
//! for (id, kind) in timers.advance(Duration::from_secs(3)) {
//!     manager.on_timer(id, kind);
//! }
//! assert_eq!(manager.state(), ConnectionState::ConnectedStable);
//! ```

pub mod app;
pub mod clock;
pub mod config;
pub mod connection;
pub mod data;
pub mod error;
pub mod mqtt;
pub mod router;
pub mod session;

// Re-export main types for convenience
pub use app::Dashboard;
pub use auralink_types::{
    AuxChannel, ConnectionState, DisconnectReason, SensorKey, SessionLease,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Settings;
pub use connection::{
    ConnectionManager, Connector, DashboardEvent, ManagerConfig, RecordingConnector, Scheduler,
    SubscriptionStatus, TokioScheduler, Transport, TransportEvent, TransportOptions,
    VirtualScheduler,
};
pub use data::{AuxiliaryLatest, DashboardSnapshot, SensorReadings, TimeSeriesWindow, TimeSlot};
pub use error::{ConfigError, ConnectionError, StoreError};
pub use mqtt::MqttConnector;
pub use router::{MessageRouter, RouteOutcome, TopicMap};
pub use session::{FileStore, KvStore, MemoryStore, SessionArbiter};
