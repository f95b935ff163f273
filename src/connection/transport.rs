//! The boundary between the connection manager and a broker client.
//!
//! A [`Connector`] builds a [`Transport`] and arranges for its events to
//! reach the dashboard event queue tagged with the generation it was
//! opened with. All operations are best-effort, at-most-once.

use std::fmt;
use std::time::Duration;

use super::event::Generation;
use crate::error::ConnectionError;

/// Fixed client id, so the broker keeps one persistent session.
pub const DEFAULT_CLIENT_ID: &str = "auralink_dashboard_single";

/// Broker username and password.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Message the broker publishes for us if we vanish uncleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

/// Connection parameters handed to a [`Connector`].
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// `mqtt://`, `mqtts://`, `ws://` or `wss://` URL.
    pub broker_url: String,
    pub client_id: String,
    pub credentials: Option<Credentials>,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    /// Fixed delay between the transport's own reconnect attempts.
    pub reconnect_period: Duration,
    /// Always false: the broker keeps our session between connections.
    pub clean_session: bool,
    pub last_will: LastWill,
}

impl TransportOptions {
    /// Options with the dashboard's standard timings and last will.
    pub fn new(broker_url: impl Into<String>, presence_topic: impl Into<String>) -> Self {
        Self {
            broker_url: broker_url.into(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            credentials: None,
            keep_alive: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            reconnect_period: Duration::from_secs(10),
            clean_session: false,
            last_will: LastWill {
                topic: presence_topic.into(),
                payload: "offline".to_string(),
                retain: true,
            },
        }
    }
}

/// A live broker client.
pub trait Transport: Send {
    /// Publish a payload at the lowest delivery assurance level.
    fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> Result<(), ConnectionError>;

    /// Request a subscription. The outcome arrives later as a
    /// [`TransportEvent::SubscribeAck`](super::TransportEvent::SubscribeAck).
    fn subscribe(&mut self, topic: &str) -> Result<(), ConnectionError>;

    /// Ask the client to disconnect after flushing queued publishes.
    fn disconnect(&mut self) -> Result<(), ConnectionError>;
}

/// Builds transports.
pub trait Connector: Send {
    /// Construct a transport and start it connecting.
    ///
    /// Errors here mean nothing reached the network.
    fn open(
        &mut self,
        options: &TransportOptions,
        generation: Generation,
    ) -> Result<Box<dyn Transport>, ConnectionError>;
}
