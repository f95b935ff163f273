//! Routing of inbound broker messages.
//!
//! Sensor topics feed the [`TimeSeriesWindow`]; free-text topics
//! overwrite [`AuxiliaryLatest`]. Messages are applied strictly in the
//! order the transport delivered them.

use std::sync::Arc;

use auralink_types::{AuxChannel, SensorKey};
use tracing::debug;

use crate::clock::Clock;
use crate::data::{AuxiliaryLatest, SensorReadings, TimeSeriesWindow};

/// Where a topic's messages go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicTarget {
    Sensor(SensorKey),
    Aux(AuxChannel),
}

/// Ordered mapping from broker topics to targets.
///
/// Order is the subscription order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMap {
    entries: Vec<(String, TopicTarget)>,
}

impl Default for TopicMap {
    fn default() -> Self {
        Self::new()
            .sensor("esp32/sensors/temperature", SensorKey::Temperature)
            .sensor("esp32/sensors/humidity", SensorKey::Humidity)
            .sensor("esp32/sensors/mq135", SensorKey::AirQuality)
            .aux("esp32/sensors/led", AuxChannel::Led)
            .aux("esp32/display", AuxChannel::Display)
            .aux("esp32/email_summary", AuxChannel::EmailSummary)
    }
}

impl TopicMap {
    /// An empty map.
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Map a topic to a sensor series. Re-mapping a topic replaces it.
    pub fn sensor(self, topic: impl Into<String>, key: SensorKey) -> Self {
        self.with(topic.into(), TopicTarget::Sensor(key))
    }

    /// Map a topic to an auxiliary channel. Re-mapping a topic replaces it.
    pub fn aux(self, topic: impl Into<String>, channel: AuxChannel) -> Self {
        self.with(topic.into(), TopicTarget::Aux(channel))
    }

    fn with(mut self, topic: String, target: TopicTarget) -> Self {
        match self.entries.iter_mut().find(|(t, _)| *t == topic) {
            Some(entry) => entry.1 = target,
            None => self.entries.push((topic, target)),
        }
        self
    }

    /// Look up a topic.
    pub fn resolve(&self, topic: &str) -> Option<TopicTarget> {
        self.entries
            .iter()
            .find(|(t, _)| t == topic)
            .map(|(_, target)| *target)
    }

    /// Every mapped topic, in subscription order.
    pub fn topics(&self) -> Vec<String> {
        self.entries.iter().map(|(t, _)| t.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What happened to a routed message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RouteOutcome {
    /// A numeric reading went into the window.
    Recorded { key: SensorKey, value: f64 },
    /// A sensor payload that is not a number; the window is unchanged.
    Unparsable { key: SensorKey },
    /// An auxiliary channel was overwritten.
    Auxiliary(AuxChannel),
    /// No mapping for the topic.
    Ignored,
}

/// Parse a sensor payload. Non-numbers and non-finite values are rejected.
pub fn parse_reading(key: SensorKey, payload: &str) -> Option<f64> {
    let value = payload.trim().parse::<f64>().ok().filter(|v| v.is_finite())?;
    Some(if key.is_integral() { value.trunc() } else { value })
}

/// Dispatches inbound messages to the window and latest-value slots.
#[derive(Debug)]
pub struct MessageRouter {
    topics: TopicMap,
    clock: Arc<dyn Clock>,
    window: TimeSeriesWindow,
    readings: SensorReadings,
    auxiliary: AuxiliaryLatest,
}

impl MessageRouter {
    pub fn new(topics: TopicMap, window: TimeSeriesWindow, clock: Arc<dyn Clock>) -> Self {
        Self {
            topics,
            clock,
            window,
            readings: SensorReadings::new(),
            auxiliary: AuxiliaryLatest::new(),
        }
    }

    /// Apply one message.
    pub fn route(&mut self, topic: &str, payload: &str) -> RouteOutcome {
        match self.topics.resolve(topic) {
            Some(TopicTarget::Sensor(key)) => {
                self.readings.set(key, payload);
                match parse_reading(key, payload) {
                    Some(value) => {
                        let label = self.clock.time_label();
                        self.window.append(key, value, &label);
                        RouteOutcome::Recorded { key, value }
                    }
                    None => {
                        debug!(topic, payload, "Skipping non-numeric reading");
                        RouteOutcome::Unparsable { key }
                    }
                }
            }
            Some(TopicTarget::Aux(channel)) => {
                self.auxiliary.set(channel, payload);
                RouteOutcome::Auxiliary(channel)
            }
            None => {
                debug!(topic, "Ignoring message on unknown topic");
                RouteOutcome::Ignored
            }
        }
    }

    pub fn topics(&self) -> &TopicMap {
        &self.topics
    }

    pub fn window(&self) -> &TimeSeriesWindow {
        &self.window
    }

    pub fn readings(&self) -> &SensorReadings {
        &self.readings
    }

    pub fn auxiliary(&self) -> &AuxiliaryLatest {
        &self.auxiliary
    }
}
