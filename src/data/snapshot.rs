//! Point-in-time view of everything the presentation layer shows.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use auralink_types::{AuxChannel, ConnectionState, SensorKey};
use serde::Serialize;

use super::{AuxiliaryLatest, SensorReadings, TimeSeriesWindow};
use crate::connection::SubscriptionStatus;

/// Immutable copy of the dashboard state, published after every event.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardSnapshot {
    pub state: ConnectionState,
    /// Human readable status, e.g. "Connected" or "Another Instance Active".
    pub status: String,
    /// Connection has settled. Refresh requests only need a connection,
    /// stable or not; see [`ConnectionState::is_connected`].
    pub stable: bool,
    /// Chart x-axis labels, oldest first.
    pub labels: Vec<String>,
    /// One series per sensor, aligned with `labels`.
    pub series: BTreeMap<SensorKey, Vec<Option<f64>>>,
    /// Raw last payload per sensor.
    pub readings: BTreeMap<SensorKey, String>,
    /// Every auxiliary channel, placeholders where nothing arrived yet.
    pub auxiliary: BTreeMap<AuxChannel, String>,
    pub subscriptions: BTreeMap<String, SubscriptionStatus>,
}

impl DashboardSnapshot {
    pub fn capture(
        state: ConnectionState,
        window: &TimeSeriesWindow,
        readings: &SensorReadings,
        auxiliary: &AuxiliaryLatest,
        subscriptions: &BTreeMap<String, SubscriptionStatus>,
    ) -> Self {
        Self {
            state,
            status: state.label().to_string(),
            stable: state.is_stable(),
            labels: window.labels(),
            series: SensorKey::ALL
                .iter()
                .map(|&key| (key, window.series(key)))
                .collect(),
            readings: readings.to_map(),
            auxiliary: AuxChannel::ALL
                .iter()
                .map(|&ch| (ch, auxiliary.get_or_placeholder(ch).to_string()))
                .collect(),
            subscriptions: subscriptions.clone(),
        }
    }

    /// Number of subscriptions the broker confirmed.
    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions
            .values()
            .filter(|s| **s == SubscriptionStatus::Active)
            .count()
    }

    /// Write the snapshot as pretty JSON.
    pub fn export(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = std::fs::File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
