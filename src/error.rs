//! Error types for the dashboard client.

use thiserror::Error;

/// Errors surfaced by the connection layer.
///
/// Most of these never cross the connection boundary: the manager absorbs
/// transport failures into [`ConnectionState`](auralink_types::ConnectionState)
/// and only returns errors from explicit operations such as
/// [`ConnectionManager::request_refresh`](crate::connection::ConnectionManager::request_refresh).
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Another instance holds a live session lease.
    #[error("another dashboard instance holds the session")]
    SessionConflict,

    /// The broker rejected our credentials.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The broker is out of resources.
    #[error("server busy: {0}")]
    ServerBusy(String),

    /// Generic connectivity failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The transport could not be constructed.
    #[error("failed to initialize transport: {0}")]
    Init(String),

    /// A single subscription failed.
    #[error("failed to subscribe to {topic}: {reason}")]
    Subscription { topic: String, reason: String },

    /// The operation needs an acknowledged connection.
    #[error("not connected")]
    NotConnected,
}

/// Errors from the shared session store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the backing storage failed.
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// A stored value could not be decoded.
    #[error("corrupt value for key {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Errors while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),

    /// A setting is out of its valid range.
    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}
