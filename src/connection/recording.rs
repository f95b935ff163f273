//! In-process transport that records what the manager asks of it.
//!
//! Pairs with [`VirtualScheduler`](super::VirtualScheduler) to drive the
//! manager without a broker: the test feeds [`TransportEvent`](super::TransportEvent)s
//! by hand and inspects the recorded operations.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use super::event::Generation;
use super::transport::{Connector, Transport, TransportOptions};
use crate::error::ConnectionError;

/// One operation issued on a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportOp {
    Publish {
        topic: String,
        payload: String,
        retain: bool,
    },
    Subscribe(String),
    Disconnect,
}

#[derive(Debug, Default)]
struct Recorded {
    opened: Vec<Generation>,
    ops: Vec<(Generation, TransportOp)>,
    fail_open: Option<String>,
    fail_publishes: bool,
    fail_subscribe: HashSet<String>,
}

/// A [`Connector`] whose transports only record operations.
///
/// Clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct RecordingConnector {
    inner: Arc<Mutex<Recorded>>,
}

impl RecordingConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `open` fail with `reason`.
    pub fn fail_next_open(&self, reason: impl Into<String>) {
        self.inner.lock().fail_open = Some(reason.into());
    }

    /// Make every publish fail (still recorded).
    pub fn fail_publishes(&self, fail: bool) {
        self.inner.lock().fail_publishes = fail;
    }

    /// Make subscribe requests for `topic` fail locally.
    pub fn fail_subscribe(&self, topic: impl Into<String>) {
        self.inner.lock().fail_subscribe.insert(topic.into());
    }

    /// Generations of every transport opened so far.
    pub fn opened(&self) -> Vec<Generation> {
        self.inner.lock().opened.clone()
    }

    /// Every operation, in issue order.
    pub fn ops(&self) -> Vec<TransportOp> {
        self.inner.lock().ops.iter().map(|(_, op)| op.clone()).collect()
    }

    /// Operations issued on one transport.
    pub fn ops_for(&self, generation: Generation) -> Vec<TransportOp> {
        self.inner
            .lock()
            .ops
            .iter()
            .filter(|(g, _)| *g == generation)
            .map(|(_, op)| op.clone())
            .collect()
    }

    /// `(topic, payload, retain)` of every publish.
    pub fn published(&self) -> Vec<(String, String, bool)> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                TransportOp::Publish {
                    topic,
                    payload,
                    retain,
                } => Some((topic, payload, retain)),
                _ => None,
            })
            .collect()
    }

    /// Topics of every subscribe request.
    pub fn subscribed(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                TransportOp::Subscribe(topic) => Some(topic),
                _ => None,
            })
            .collect()
    }

    /// Forget recorded operations.
    pub fn clear(&self) {
        self.inner.lock().ops.clear();
    }
}

impl Connector for RecordingConnector {
    fn open(
        &mut self,
        _options: &TransportOptions,
        generation: Generation,
    ) -> Result<Box<dyn Transport>, ConnectionError> {
        let mut inner = self.inner.lock();
        if let Some(reason) = inner.fail_open.take() {
            return Err(ConnectionError::Init(reason));
        }
        inner.opened.push(generation);
        Ok(Box::new(RecordingTransport {
            generation,
            inner: self.inner.clone(),
        }))
    }
}

#[derive(Debug)]
struct RecordingTransport {
    generation: Generation,
    inner: Arc<Mutex<Recorded>>,
}

impl Transport for RecordingTransport {
    fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> Result<(), ConnectionError> {
        let mut inner = self.inner.lock();
        inner.ops.push((
            self.generation,
            TransportOp::Publish {
                topic: topic.to_string(),
                payload: payload.to_string(),
                retain,
            },
        ));
        if inner.fail_publishes {
            return Err(ConnectionError::Transport("publish rejected".to_string()));
        }
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), ConnectionError> {
        let mut inner = self.inner.lock();
        inner
            .ops
            .push((self.generation, TransportOp::Subscribe(topic.to_string())));
        if inner.fail_subscribe.contains(topic) {
            return Err(ConnectionError::Subscription {
                topic: topic.to_string(),
                reason: "request queue full".to_string(),
            });
        }
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), ConnectionError> {
        self.inner
            .lock()
            .ops
            .push((self.generation, TransportOp::Disconnect));
        Ok(())
    }
}
