//! Runtime configuration.
//!
//! Settings are layered: built-in defaults, then an optional TOML file,
//! then `AURALINK__*` environment variables (e.g.
//! `AURALINK__BROKER__URL=wss://host:8884/mqtt`), then CLI overrides
//! applied by the binary.
//!
//! ```toml
//! window_size = 20
//!
//! [broker]
//! url = "wss://broker.example.com:8884/mqtt"
//! username = "dashboard"
//! password = "secret"
//!
//! [topics]
//! temperature = "esp32/sensors/temperature"
//! presence = "auralink/dashboard/status"
//!
//! [session]
//! dir = "/tmp/auralink"
//! stale_threshold_ms = 15000
//! heartbeat_interval_ms = 10000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use auralink_types::{AuxChannel, SensorKey, DEFAULT_HEARTBEAT_INTERVAL_MS, DEFAULT_STALE_THRESHOLD_MS};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::connection::{Credentials, ManagerConfig, TransportOptions, DEFAULT_CLIENT_ID};
use crate::data::DEFAULT_WINDOW_SIZE;
use crate::error::ConfigError;
use crate::router::TopicMap;

/// Broker endpoint and transport timings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    pub url: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    pub connect_timeout_secs: u64,
    pub reconnect_period_secs: u64,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            url: "mqtt://localhost:1883".to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            username: None,
            password: None,
            keep_alive_secs: 30,
            connect_timeout_secs: 10,
            reconnect_period_secs: 10,
        }
    }
}

/// Topic names, one per channel.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TopicSettings {
    pub temperature: String,
    pub humidity: String,
    pub air_quality: String,
    pub led: String,
    pub display: String,
    pub email_summary: String,
    pub presence: String,
    pub control: String,
}

impl Default for TopicSettings {
    fn default() -> Self {
        Self {
            temperature: "esp32/sensors/temperature".to_string(),
            humidity: "esp32/sensors/humidity".to_string(),
            air_quality: "esp32/sensors/mq135".to_string(),
            led: "esp32/sensors/led".to_string(),
            display: "esp32/display".to_string(),
            email_summary: "esp32/email_summary".to_string(),
            presence: "auralink/dashboard/status".to_string(),
            control: "esp32/control".to_string(),
        }
    }
}

/// Session lease storage and timing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Directory shared by every dashboard process on this host.
    pub dir: PathBuf,
    pub stale_threshold_ms: u64,
    pub heartbeat_interval_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            dir: std::env::temp_dir().join("auralink"),
            stale_threshold_ms: DEFAULT_STALE_THRESHOLD_MS,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
        }
    }
}

/// Delays in the connection sequence.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    /// Wait before the first connect.
    pub startup_delay_ms: u64,
    pub subscribe_delay_ms: u64,
    pub stabilize_delay_ms: u64,
    /// Time given to the transport to flush cleanup publishes on shutdown.
    pub shutdown_grace_ms: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            startup_delay_ms: 500,
            subscribe_delay_ms: 1_000,
            stabilize_delay_ms: 3_000,
            shutdown_grace_ms: 100,
        }
    }
}

/// Complete dashboard configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub topics: TopicSettings,
    pub session: SessionSettings,
    pub timing: TimingSettings,
    /// Number of time slots kept for charting.
    pub window_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            broker: BrokerSettings::default(),
            topics: TopicSettings::default(),
            session: SessionSettings::default(),
            timing: TimingSettings::default(),
            window_size: DEFAULT_WINDOW_SIZE,
        }
    }
}

impl Settings {
    /// Load from an optional file plus the environment, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_from(path, Self::environment())
    }

    /// `AURALINK__SECTION__KEY` variables, e.g. `AURALINK__BROKER__URL`.
    fn environment() -> Environment {
        Environment::with_prefix("AURALINK")
            .prefix_separator("__")
            .separator("__")
    }

    fn load_from(path: Option<&Path>, env: Environment) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let settings: Settings = builder.add_source(env).build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.heartbeat_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "session.heartbeat_interval_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        // A heartbeat at or beyond the threshold lets our own lease go stale
        if self.session.heartbeat_interval_ms >= self.session.stale_threshold_ms {
            return Err(ConfigError::Invalid {
                key: "session.heartbeat_interval_ms",
                reason: format!(
                    "{}ms must be less than the stale threshold of {}ms",
                    self.session.heartbeat_interval_ms, self.session.stale_threshold_ms
                ),
            });
        }
        if self.window_size == 0 {
            return Err(ConfigError::Invalid {
                key: "window_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.broker.url.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "broker.url",
                reason: "must not be empty".to_string(),
            });
        }
        if self.broker.password.is_some() && self.broker.username.is_none() {
            return Err(ConfigError::Invalid {
                key: "broker.password",
                reason: "set without a username".to_string(),
            });
        }
        Ok(())
    }

    /// Topic routing table.
    pub fn topic_map(&self) -> TopicMap {
        let t = &self.topics;
        TopicMap::new()
            .sensor(&t.temperature, SensorKey::Temperature)
            .sensor(&t.humidity, SensorKey::Humidity)
            .sensor(&t.air_quality, SensorKey::AirQuality)
            .aux(&t.led, AuxChannel::Led)
            .aux(&t.display, AuxChannel::Display)
            .aux(&t.email_summary, AuxChannel::EmailSummary)
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            subscribe_topics: self.topic_map().topics(),
            presence_topic: self.topics.presence.clone(),
            control_topic: self.topics.control.clone(),
            subscribe_delay: Duration::from_millis(self.timing.subscribe_delay_ms),
            stabilize_delay: Duration::from_millis(self.timing.stabilize_delay_ms),
            heartbeat_interval: Duration::from_millis(self.session.heartbeat_interval_ms),
        }
    }

    pub fn transport_options(&self) -> TransportOptions {
        let mut options = TransportOptions::new(&self.broker.url, &self.topics.presence);
        options.client_id = self.broker.client_id.clone();
        options.keep_alive = Duration::from_secs(self.broker.keep_alive_secs);
        options.connect_timeout = Duration::from_secs(self.broker.connect_timeout_secs);
        options.reconnect_period = Duration::from_secs(self.broker.reconnect_period_secs);
        options.credentials = self.broker.username.as_ref().map(|username| Credentials {
            username: username.clone(),
            password: self.broker.password.clone().unwrap_or_default(),
        });
        options
    }

    pub fn stale_threshold(&self) -> Duration {
        Duration::from_millis(self.session.stale_threshold_ms)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.timing.startup_delay_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.timing.shutdown_grace_ms)
    }
}
