//! Two-lane command queue
//!
//! The single cross-thread channel of the runtime: any number of producers
//! (transports, the tick timer, user code) enqueue [`ActionMessage`]s, and
//! exactly one dispatcher consumes them. The priority lane is drained to
//! empty before the normal lane is served; within a lane, strict FIFO.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::message::ActionMessage;

// ----------------------------------------------------------------------------
// Command Queue
// ----------------------------------------------------------------------------

#[derive(Default)]
struct Lanes {
    priority: VecDeque<ActionMessage>,
    normal: VecDeque<ActionMessage>,
}

/// Thread-safe two-priority FIFO with an async blocking pop.
///
/// A plain mutex around the two lanes plus a [`Notify`] for consumer wake-up
/// is all the synchronisation required: producers hold the lock only long
/// enough to push, and the single consumer re-checks the lanes before every
/// await so no wake-up can be lost.
#[derive(Default)]
pub struct CommandQueue {
    lanes: Mutex<Lanes>,
    ready: Notify,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue on the normal lane.
    pub fn push(&self, message: ActionMessage) {
        self.lanes
            .lock()
            .expect("command queue lock poisoned")
            .normal
            .push_back(message);
        self.ready.notify_one();
    }

    /// Enqueue on the priority lane.
    pub fn push_priority(&self, message: ActionMessage) {
        self.lanes
            .lock()
            .expect("command queue lock poisoned")
            .priority
            .push_back(message);
        self.ready.notify_one();
    }

    /// Enqueue on the lane the message classifies itself into.
    pub fn submit(&self, message: ActionMessage) {
        if message.is_priority() {
            self.push_priority(message);
        } else {
            self.push(message);
        }
    }

    /// Remove and return the next command without waiting.
    ///
    /// Priority lane first (oldest first), then the normal lane.
    pub fn try_pop(&self) -> Option<ActionMessage> {
        let mut lanes = self.lanes.lock().expect("command queue lock poisoned");
        if let Some(message) = lanes.priority.pop_front() {
            return Some(message);
        }
        lanes.normal.pop_front()
    }

    /// Remove and return the next command, waiting until one is available.
    pub async fn pop(&self) -> ActionMessage {
        loop {
            // Register for notification before checking the lanes: a push
            // between the check and the await would otherwise be lost.
            let notified = self.ready.notified();
            if let Some(message) = self.try_pop() {
                return message;
            }
            notified.await;
        }
    }

    pub fn is_empty(&self) -> bool {
        let lanes = self.lanes.lock().expect("command queue lock poisoned");
        lanes.priority.is_empty() && lanes.normal.is_empty()
    }

    pub fn len(&self) -> usize {
        let lanes = self.lanes.lock().expect("command queue lock poisoned");
        lanes.priority.len() + lanes.normal.len()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
