//! The task driving a `rumqttc` event loop.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rumqttc::{
    ConnectReturnCode, ConnectionError, Event, EventLoop, Outgoing, Packet, SubscribeReasonCode,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::connection::{
    DashboardEvent, FaultKind, Generation, TransportEvent, TransportFault,
};

pub(super) struct Pump {
    pub generation: Generation,
    pub events: mpsc::UnboundedSender<DashboardEvent>,
    pub requested: Arc<Mutex<VecDeque<String>>>,
    pub reconnect_period: Duration,
}

impl Pump {
    pub async fn run(self, mut eventloop: EventLoop) {
        let mut connected = false;
        let mut in_flight: HashMap<u16, String> = HashMap::new();

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        connected = true;
                        if !self.send(TransportEvent::Connected) {
                            break;
                        }
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let event = TransportEvent::Message {
                        topic: publish.topic.clone(),
                        payload: String::from_utf8_lossy(&publish.payload).into_owned(),
                    };
                    if !self.send(event) {
                        break;
                    }
                }
                Ok(Event::Outgoing(Outgoing::Subscribe(pkid))) => {
                    if let Some(topic) = self.requested.lock().pop_front() {
                        in_flight.insert(pkid, topic);
                    }
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    let Some(topic) = in_flight.remove(&ack.pkid) else {
                        debug!(pkid = ack.pkid, "SubAck for unknown request");
                        continue;
                    };
                    let result = match ack.return_codes.first() {
                        Some(SubscribeReasonCode::Success(_)) => Ok(()),
                        Some(SubscribeReasonCode::Failure) => {
                            Err("rejected by broker".to_string())
                        }
                        None => Err("empty acknowledgement".to_string()),
                    };
                    if !self.send(TransportEvent::SubscribeAck { topic, result }) {
                        break;
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect)) | Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    let _ = self.send(TransportEvent::Closed);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    let fault = classify(&e);
                    warn!(generation = self.generation, "MQTT connection error: {}", e);

                    let event = match fault.kind {
                        FaultKind::Other if connected => TransportEvent::Offline,
                        _ => TransportEvent::Error(fault.clone()),
                    };
                    connected = false;
                    // Requests sent on the old connection will never be answered
                    in_flight.clear();
                    self.requested.lock().clear();

                    if !self.send(event) || fault.kind == FaultKind::Auth {
                        break;
                    }

                    tokio::time::sleep(self.reconnect_period).await;
                    if !self.send(TransportEvent::Reconnecting) {
                        break;
                    }
                }
            }
        }
        debug!(generation = self.generation, "MQTT event pump stopped");
    }

    /// Returns false once nobody is listening.
    fn send(&self, event: TransportEvent) -> bool {
        self.events
            .send(DashboardEvent::Transport {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// Map a `rumqttc` failure onto a fault kind.
pub(super) fn classify(error: &ConnectionError) -> TransportFault {
    match error {
        ConnectionError::ConnectionRefused(code) => refusal(*code),
        other => TransportFault::classify(other.to_string()),
    }
}

fn refusal(code: ConnectReturnCode) -> TransportFault {
    let kind = match code {
        ConnectReturnCode::NotAuthorized | ConnectReturnCode::BadUserNamePassword => FaultKind::Auth,
        ConnectReturnCode::ServiceUnavailable => FaultKind::ResourceExhausted,
        _ => FaultKind::Other,
    };
    TransportFault::new(kind, format!("connection refused: {:?}", code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refusal_codes_map_to_fault_kinds() {
        let auth = classify(&ConnectionError::ConnectionRefused(
            ConnectReturnCode::NotAuthorized,
        ));
        assert_eq!(auth.kind, FaultKind::Auth);

        let creds = classify(&ConnectionError::ConnectionRefused(
            ConnectReturnCode::BadUserNamePassword,
        ));
        assert_eq!(creds.kind, FaultKind::Auth);

        let busy = classify(&ConnectionError::ConnectionRefused(
            ConnectReturnCode::ServiceUnavailable,
        ));
        assert_eq!(busy.kind, FaultKind::ResourceExhausted);

        let other = classify(&ConnectionError::ConnectionRefused(
            ConnectReturnCode::BadClientId,
        ));
        assert_eq!(other.kind, FaultKind::Other);
    }

    #[test]
    fn network_errors_are_other() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert_eq!(classify(&ConnectionError::Io(io)).kind, FaultKind::Other);
    }
}
