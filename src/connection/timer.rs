//! Timer scheduling for the connection manager.
//!
//! Fired timers come back through the event queue as
//! [`DashboardEvent::Timer`]; nothing runs on a timer's own task.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::event::{DashboardEvent, TimerId, TimerKind};
use crate::clock::ManualClock;

/// Something that can fire a [`TimerKind`] after a delay.
pub trait Scheduler: Send {
    fn schedule(&mut self, delay: Duration, kind: TimerKind) -> TimerId;

    /// Cancel a pending timer. Unknown or already fired ids are ignored.
    fn cancel(&mut self, id: TimerId);
}

/// Real timers on the tokio runtime.
///
/// Must be used from within a runtime.
#[derive(Debug)]
pub struct TokioScheduler {
    events: mpsc::UnboundedSender<DashboardEvent>,
    next_id: u64,
    tasks: HashMap<TimerId, JoinHandle<()>>,
}

impl TokioScheduler {
    pub fn new(events: mpsc::UnboundedSender<DashboardEvent>) -> Self {
        Self {
            events,
            next_id: 0,
            tasks: HashMap::new(),
        }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&mut self, delay: Duration, kind: TimerKind) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        let tx = self.events.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(DashboardEvent::Timer { id, kind });
        });

        self.tasks.retain(|_, task| !task.is_finished());
        self.tasks.insert(id, handle);
        id
    }

    fn cancel(&mut self, id: TimerId) {
        if let Some(task) = self.tasks.remove(&id) {
            task.abort();
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }
}

#[derive(Debug, Default)]
struct VirtualTimers {
    elapsed: Duration,
    next_id: u64,
    pending: BTreeMap<(Duration, TimerId), TimerKind>,
}

/// Timers on virtual time, advanced explicitly by tests.
///
/// Clones share the same timer set: hand one to the manager and keep one
/// to drive time. When built with a [`ManualClock`], advancing also moves
/// that clock.
#[derive(Debug, Clone, Default)]
pub struct VirtualScheduler {
    timers: Arc<Mutex<VirtualTimers>>,
    clock: Option<ManualClock>,
}

impl VirtualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// A scheduler that keeps `clock` in step with virtual time.
    pub fn with_clock(clock: ManualClock) -> Self {
        Self {
            timers: Arc::default(),
            clock: Some(clock),
        }
    }

    /// Move virtual time forward and return the timers that came due, in
    /// firing order. Timers scheduled while handling these are not
    /// included even if already due; advance again to collect them.
    pub fn advance(&self, by: Duration) -> Vec<(TimerId, TimerKind)> {
        let mut timers = self.timers.lock();
        timers.elapsed += by;
        if let Some(clock) = &self.clock {
            clock.advance(by);
        }

        let now = timers.elapsed;
        let due: Vec<_> = timers
            .pending
            .range(..=(now, TimerId(u64::MAX)))
            .map(|(&key, &kind)| (key, kind))
            .collect();

        due.into_iter()
            .map(|(key, kind)| {
                timers.pending.remove(&key);
                (key.1, kind)
            })
            .collect()
    }

    /// Total virtual time elapsed.
    pub fn elapsed(&self) -> Duration {
        self.timers.lock().elapsed
    }

    /// Number of timers waiting to fire.
    pub fn pending_count(&self) -> usize {
        self.timers.lock().pending.len()
    }

    /// Whether a timer of this kind is waiting to fire.
    pub fn is_pending(&self, kind: TimerKind) -> bool {
        self.timers.lock().pending.values().any(|&k| k == kind)
    }
}

impl Scheduler for VirtualScheduler {
    fn schedule(&mut self, delay: Duration, kind: TimerKind) -> TimerId {
        let mut timers = self.timers.lock();
        timers.next_id += 1;
        let id = TimerId(timers.next_id);
        let due = timers.elapsed + delay;
        timers.pending.insert((due, id), kind);
        id
    }

    fn cancel(&mut self, id: TimerId) {
        self.timers.lock().pending.retain(|&(_, pending_id), _| pending_id != id);
    }
}
