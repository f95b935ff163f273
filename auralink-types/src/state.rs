//! Connection state of the single dashboard session.
//!
//! ```text
//!   Disconnected(Idle) --connect--> Connecting --ack--> ConnectedUnstable
//!          ^    |                                            | 3s
//!          |    +--lease live--> SessionConflict             v
//!          |                                          ConnectedStable
//!          +----------------close--------------------------+
//!
//!   any connected state --auth error--> AuthError  (fatal)
//!                       --busy-------> ServerBusy
//!                       --error------> Disconnected(TransportError)
//!                       --offline----> Disconnected(Offline)
//!                       --retrying---> Reconnecting
//! ```

use core::fmt;

/// Why the session is currently disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum DisconnectReason {
    /// No connection has been attempted yet.
    #[default]
    Idle,
    /// The transport lost the network; it retries on its own schedule.
    Offline,
    /// A generic transport failure; the transport retries on its own.
    TransportError,
    /// The connection was closed and torn down.
    Closed,
}

/// State of the connection manager. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "state", content = "reason", rename_all = "snake_case"))]
pub enum ConnectionState {
    Disconnected(DisconnectReason),
    Connecting,
    /// Connected, subscriptions may still be settling.
    ConnectedUnstable,
    ConnectedStable,
    Reconnecting,
    /// Credentials were rejected. Fatal until an explicit reconnect.
    AuthError,
    /// The broker is out of resources; the transport keeps retrying.
    ServerBusy,
    /// The transport could not be constructed. Fatal until an explicit reconnect.
    InitError,
    /// Another dashboard instance holds a live session lease.
    SessionConflict,
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Disconnected(DisconnectReason::Idle)
    }
}

impl ConnectionState {
    /// Whether the broker has acknowledged the current connection.
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            ConnectionState::ConnectedUnstable | ConnectionState::ConnectedStable
        )
    }

    /// Whether subscriptions have had time to settle.
    pub fn is_stable(&self) -> bool {
        matches!(self, ConnectionState::ConnectedStable)
    }

    /// Fatal states need an explicit `connect()` to leave.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ConnectionState::AuthError | ConnectionState::InitError)
    }

    /// Human readable label for status bars.
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected(DisconnectReason::Offline) => "Offline",
            ConnectionState::Disconnected(DisconnectReason::TransportError) => "Error",
            ConnectionState::Disconnected(_) => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::ConnectedUnstable | ConnectionState::ConnectedStable => "Connected",
            ConnectionState::Reconnecting => "Reconnecting...",
            ConnectionState::AuthError => "Auth Error",
            ConnectionState::ServerBusy => "Server Busy",
            ConnectionState::InitError => "Init Error",
            ConnectionState::SessionConflict => "Another Instance Active",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_idle_disconnected() {
        assert_eq!(
            ConnectionState::default(),
            ConnectionState::Disconnected(DisconnectReason::Idle)
        );
    }

    #[test]
    fn only_auth_and_init_are_fatal() {
        assert!(ConnectionState::AuthError.is_fatal());
        assert!(ConnectionState::InitError.is_fatal());
        assert!(!ConnectionState::ServerBusy.is_fatal());
        assert!(!ConnectionState::SessionConflict.is_fatal());
    }

    #[test]
    fn unstable_is_connected_but_not_stable() {
        let state = ConnectionState::ConnectedUnstable;
        assert!(state.is_connected());
        assert!(!state.is_stable());
        assert!(ConnectionState::ConnectedStable.is_stable());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn state_serializes_with_reason() {
        let json =
            serde_json::to_string(&ConnectionState::Disconnected(DisconnectReason::Offline)).unwrap();
        assert_eq!(json, r#"{"state":"disconnected","reason":"offline"}"#);
    }
}
