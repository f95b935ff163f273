//! Latest-value slots: no history, every message overwrites.

use std::collections::BTreeMap;

use auralink_types::{AuxChannel, SensorKey};

/// Last raw payload received on each free-text channel.
///
/// Empty payloads are stored as-is; retained-message cleanup publishes
/// them to clear a channel.
#[derive(Debug, Clone, Default)]
pub struct AuxiliaryLatest {
    values: BTreeMap<AuxChannel, String>,
}

impl AuxiliaryLatest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a channel's value verbatim.
    pub fn set(&mut self, channel: AuxChannel, payload: &str) {
        self.values.insert(channel, payload.to_string());
    }

    /// Value received on a channel, if any.
    pub fn get(&self, channel: AuxChannel) -> Option<&str> {
        self.values.get(&channel).map(String::as_str)
    }

    /// Value received on a channel, or its placeholder text.
    pub fn get_or_placeholder(&self, channel: AuxChannel) -> &str {
        self.get(channel).unwrap_or(channel.placeholder())
    }

    /// All received values keyed by channel.
    pub fn to_map(&self) -> BTreeMap<AuxChannel, String> {
        self.values.clone()
    }
}

/// Last raw payload received per sensor, including unparsable ones.
///
/// This is what a status card shows; the time-series window only ever
/// sees payloads that parsed as numbers.
#[derive(Debug, Clone, Default)]
pub struct SensorReadings {
    raw: BTreeMap<SensorKey, String>,
}

impl SensorReadings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: SensorKey, payload: &str) {
        self.raw.insert(key, payload.to_string());
    }

    pub fn get(&self, key: SensorKey) -> Option<&str> {
        self.raw.get(&key).map(String::as_str)
    }

    pub fn to_map(&self) -> BTreeMap<SensorKey, String> {
        self.raw.clone()
    }
}
