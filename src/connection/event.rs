//! Events consumed by the dashboard's single event queue.

use std::fmt;

/// Identifies one transport instance. Bumped on every fresh connect so
/// late events from a torn-down transport can be told apart.
pub type Generation = u64;

/// Coarse classification of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// Credentials rejected. Fatal.
    Auth,
    /// The broker is out of resources.
    ResourceExhausted,
    /// Anything else; the transport retries on its own.
    Other,
}

/// A transport failure as reported to the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFault {
    pub kind: FaultKind,
    pub message: String,
}

impl TransportFault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classify a broker error by its message text.
    ///
    /// Used when the transport only gives us a string, as brokers phrase
    /// CONNACK refusals in a handful of well-known ways.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_ascii_lowercase();
        let kind = if lower.contains("not authorized")
            || lower.contains("bad user name or password")
            || lower.contains("bad username or password")
        {
            FaultKind::Auth
        } else if lower.contains("insufficient resources") || lower.contains("server unavailable")
        {
            FaultKind::ResourceExhausted
        } else {
            FaultKind::Other
        };
        Self { kind, message }
    }
}

impl fmt::Display for TransportFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Everything a transport can tell the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The broker acknowledged the connection.
    Connected,
    /// An inbound publish.
    Message { topic: String, payload: String },
    /// The broker answered a subscribe request.
    SubscribeAck {
        topic: String,
        result: Result<(), String>,
    },
    Error(TransportFault),
    /// Network lost; the transport will retry.
    Offline,
    /// The transport is about to retry.
    Reconnecting,
    /// The connection is gone for good.
    Closed,
}

/// Handle for a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub u64);

/// What a timer is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Promote an unstable connection to stable.
    Stabilize,
    /// Issue the delayed subscription burst.
    Subscribe,
    /// Refresh the session lease.
    Heartbeat,
}

/// An entry on the dashboard event queue.
#[derive(Debug, Clone, PartialEq)]
pub enum DashboardEvent {
    Transport {
        generation: Generation,
        event: TransportEvent,
    },
    Timer {
        id: TimerId,
        kind: TimerKind,
    },
    /// Start a connection (re-arbitrating the session).
    Connect,
    /// Ask the device to publish fresh readings.
    RefreshRequested,
    /// Tear everything down and stop the loop.
    Shutdown,
}
