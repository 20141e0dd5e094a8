/**
 * EVENTS - Outbound notifications and the bounded queue that carries them
 *
 * ROLE: Decouples ingestion from publishing. The monitor pushes events without
 * ever waiting; a relay task (see mqtt.rs) pops them at its own pace.
 *
 * BACKPRESSURE: the queue holds at most `capacity` events. Pushing into a full
 * queue evicts the oldest undelivered event and counts it in `dropped`.
 */

use crate::alerts::Alert;
use crate::liveness::NodeChanged;
use crate::state::Counter;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use tokio::sync::Notify;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum KernelEvent {
    NodeChanged(NodeChanged),
    AlertRaised { alert: Alert },
    AlertAcknowledged { alert: Alert },
}

struct QueueState {
    events: VecDeque<KernelEvent>,
    closed: bool,
}

pub struct EventQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
    dropped: Counter,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState { events: VecDeque::with_capacity(capacity), closed: false }),
            notify: Notify::new(),
            capacity,
            dropped: Counter::default(),
        }
    }

    /// Never blocks. Returns false if the event was discarded because the queue is closed.
    pub fn push(&self, event: KernelEvent) -> bool {
        {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            if state.events.len() >= self.capacity {
                state.events.pop_front();
                let total = self.dropped.incr();
                warn!(total, capacity = self.capacity, "event queue full, dropped oldest event");
            }
            state.events.push_back(event);
        }
        self.notify.notify_one();
        true
    }

    /// Waits for the next event. Returns `None` once the queue is closed and empty.
    pub async fn recv(&self) -> Option<KernelEvent> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock();
                if let Some(event) = state.events.pop_front() {
                    return Some(event);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Takes everything currently queued.
    pub fn drain(&self) -> Vec<KernelEvent> {
        self.state.lock().events.drain(..).collect()
    }

    /// Stops accepting events; already queued ones can still be received.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.get()
    }
}
