//! Identifiers for the streams the dashboard tracks.

use core::fmt;

/// A numeric sensor stream kept in the time-series window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SensorKey {
    /// Ambient temperature in degrees Celsius.
    Temperature,
    /// Relative humidity in percent.
    Humidity,
    /// Air quality reading from the MQ135 gas sensor.
    AirQuality,
}

impl SensorKey {
    /// Every tracked sensor, in display order.
    pub const ALL: [SensorKey; 3] = [
        SensorKey::Temperature,
        SensorKey::Humidity,
        SensorKey::AirQuality,
    ];

    /// Stable lowercase name, used in config keys and exports.
    pub const fn as_str(&self) -> &'static str {
        match self {
            SensorKey::Temperature => "temperature",
            SensorKey::Humidity => "humidity",
            SensorKey::AirQuality => "air_quality",
        }
    }

    /// Whether readings are whole numbers.
    ///
    /// The MQ135 firmware reports integral ppm; fractional payloads are
    /// truncated.
    pub const fn is_integral(&self) -> bool {
        matches!(self, SensorKey::AirQuality)
    }
}

impl fmt::Display for SensorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A free-text channel whose latest payload is kept without history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum AuxChannel {
    /// Message currently shown on the device display.
    Display,
    /// Summary text of the most recent email digest.
    EmailSummary,
    /// LED / indicator color as reported by the device.
    Led,
}

impl AuxChannel {
    /// Every auxiliary channel.
    pub const ALL: [AuxChannel; 3] = [AuxChannel::Display, AuxChannel::EmailSummary, AuxChannel::Led];

    /// Stable lowercase name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            AuxChannel::Display => "display",
            AuxChannel::EmailSummary => "email_summary",
            AuxChannel::Led => "led",
        }
    }

    /// Value to show before anything has been received on this channel.
    pub const fn placeholder(&self) -> &'static str {
        match self {
            AuxChannel::Display => "Waiting for display message...",
            AuxChannel::EmailSummary => "No email summary received yet.",
            AuxChannel::Led => "#000000",
        }
    }
}

impl fmt::Display for AuxChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
