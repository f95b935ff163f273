//! MQTT transport built on `rumqttc`.
//!
//! [`MqttConnector::open`] builds an [`AsyncClient`] and spawns a pump
//! task that drives its event loop, translating broker activity into
//! [`TransportEvent`]s on the dashboard queue. The pump reconnects on its
//! own fixed period; it never re-subscribes.
//!
//! ```text
//!   ConnectionManager ──publish/subscribe──▶ MqttTransport ──▶ AsyncClient
//!                                                                  │
//!   DashboardEvent::Transport ◀──────────── pump task ◀── EventLoop::poll()
//! ```

mod pump;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::connection::{Connector, DashboardEvent, Generation, Transport, TransportOptions};
use crate::error::ConnectionError;

/// Capacity of the client's request queue.
const REQUEST_CAPACITY: usize = 100;

/// Supported URL schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Mqtt,
    Mqtts,
    Ws,
    Wss,
}

impl Scheme {
    fn default_port(self) -> u16 {
        match self {
            Scheme::Mqtt => 1883,
            Scheme::Mqtts => 8883,
            Scheme::Ws => 80,
            Scheme::Wss => 443,
        }
    }

    fn is_websocket(self) -> bool {
        matches!(self, Scheme::Ws | Scheme::Wss)
    }
}

/// A parsed broker URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    /// Path component, websocket only (e.g. "/mqtt").
    pub path: String,
}

impl BrokerAddress {
    /// Parse `scheme://host[:port][/path]`.
    pub fn parse(url: &str) -> Result<Self, ConnectionError> {
        let invalid =
            |reason: &str| ConnectionError::Init(format!("invalid broker url {url:?}: {reason}"));

        let (scheme, rest) = url.split_once("://").ok_or_else(|| invalid("missing scheme"))?;
        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "mqtt" | "tcp" => Scheme::Mqtt,
            "mqtts" | "ssl" => Scheme::Mqtts,
            "ws" => Scheme::Ws,
            "wss" => Scheme::Wss,
            other => return Err(invalid(&format!("unsupported scheme {other}"))),
        };

        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, ""),
        };
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| invalid("bad port"))?;
                (host, port)
            }
            None => (authority, scheme.default_port()),
        };
        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }

    /// Host argument for [`MqttOptions::new`]; websocket transports take
    /// the full URL.
    fn client_host(&self) -> String {
        if self.scheme.is_websocket() {
            let scheme = if self.scheme == Scheme::Wss { "wss" } else { "ws" };
            format!("{}://{}:{}{}", scheme, self.host, self.port, self.path)
        } else {
            self.host.clone()
        }
    }
}

/// Translate transport options into `rumqttc` options.
pub fn mqtt_options(options: &TransportOptions) -> Result<MqttOptions, ConnectionError> {
    let address = BrokerAddress::parse(&options.broker_url)?;

    let mut mqtt = MqttOptions::new(&options.client_id, address.client_host(), address.port);
    mqtt.set_keep_alive(options.keep_alive);
    mqtt.set_clean_session(options.clean_session);
    if let Some(creds) = &options.credentials {
        mqtt.set_credentials(&creds.username, &creds.password);
    }
    mqtt.set_last_will(rumqttc::LastWill::new(
        &options.last_will.topic,
        options.last_will.payload.as_bytes().to_vec(),
        QoS::AtMostOnce,
        options.last_will.retain,
    ));

    match address.scheme {
        Scheme::Mqtt => {}
        Scheme::Mqtts => {
            mqtt.set_transport(rumqttc::Transport::tls_with_default_config());
        }
        Scheme::Ws => {
            mqtt.set_transport(rumqttc::Transport::Ws);
        }
        Scheme::Wss => {
            mqtt.set_transport(rumqttc::Transport::wss_with_default_config());
        }
    }

    Ok(mqtt)
}

/// Opens `rumqttc` transports that report on the dashboard queue.
///
/// Must be used from within a tokio runtime.
#[derive(Debug, Clone)]
pub struct MqttConnector {
    events: mpsc::UnboundedSender<DashboardEvent>,
    grace: Duration,
}

impl MqttConnector {
    /// `grace` bounds how long a disconnecting transport may keep
    /// flushing queued publishes.
    pub fn new(events: mpsc::UnboundedSender<DashboardEvent>, grace: Duration) -> Self {
        Self { events, grace }
    }
}

impl Connector for MqttConnector {
    fn open(
        &mut self,
        options: &TransportOptions,
        generation: Generation,
    ) -> Result<Box<dyn Transport>, ConnectionError> {
        let mqtt = mqtt_options(options)?;
        let (client, mut eventloop) = AsyncClient::new(mqtt, REQUEST_CAPACITY);
        eventloop
            .network_options
            .set_connection_timeout(options.connect_timeout.as_secs().max(1));

        let requested = Arc::new(Mutex::new(VecDeque::new()));
        let pump = pump::Pump {
            generation,
            events: self.events.clone(),
            requested: requested.clone(),
            reconnect_period: options.reconnect_period,
        };
        let handle = tokio::spawn(pump.run(eventloop));

        debug!(generation, client_id = %options.client_id, "Spawned MQTT event pump");
        Ok(Box::new(MqttTransport {
            client,
            requested,
            pump: Some(handle),
            grace: self.grace,
        }))
    }
}

/// A live `rumqttc` client.
#[derive(Debug)]
pub struct MqttTransport {
    client: AsyncClient,
    /// Topics of subscribe requests not yet seen leaving the event loop.
    requested: Arc<Mutex<VecDeque<String>>>,
    pump: Option<JoinHandle<()>>,
    grace: Duration,
}

impl Transport for MqttTransport {
    fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> Result<(), ConnectionError> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, retain, payload.as_bytes().to_vec())
            .map_err(|e| ConnectionError::Transport(e.to_string()))
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), ConnectionError> {
        // Queue before sending so the pump can always match the packet id
        self.requested.lock().push_back(topic.to_string());
        self.client
            .try_subscribe(topic, QoS::AtMostOnce)
            .map_err(|e| {
                self.requested.lock().pop_back();
                ConnectionError::Subscription {
                    topic: topic.to_string(),
                    reason: e.to_string(),
                }
            })
    }

    fn disconnect(&mut self) -> Result<(), ConnectionError> {
        let result = self
            .client
            .try_disconnect()
            .map_err(|e| ConnectionError::Transport(e.to_string()));

        // The pump exits on its own once the disconnect goes out; if the
        // network is gone it would retry forever, so bound it.
        if let Some(pump) = self.pump.take() {
            let grace = self.grace;
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                pump.abort();
            });
        }
        result
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}
