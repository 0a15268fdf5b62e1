//! Per-(tag, sender) message mailboxes.

use cicada_transport::Message;
use std::{
    collections::{HashMap, VecDeque},
    sync::{Condvar, Mutex},
    time::{Duration, Instant},
};

/// The outcome of a failed mailbox poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PopError {
    /// The deadline elapsed with no message.
    Timeout,
    /// A nonblocking poll found nothing.
    Empty,
}

/// Routes received messages into one FIFO queue per `(tag, sender)` pair.
///
/// The router thread pushes, application threads pop. Blocking pops wait
/// on a condition variable so arrival latency is not bounded by a polling
/// interval.
#[derive(Debug, Default)]
pub(crate) struct Mailboxes {
    queues: Mutex<HashMap<(i32, u32), VecDeque<Message>>>,
    available: Condvar,
}

impl Mailboxes {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Files a message under its `(tag, sender)` queue.
    pub(crate) fn push(&self, message: Message) {
        let mut queues = self.queues.lock().expect("mailbox lock poisoned");
        queues.entry((message.tag, message.sender)).or_default().push_back(message);
        self.available.notify_all();
    }

    /// Pops the next message for `(tag, sender)`, waiting up to `timeout`.
    pub(crate) fn pop(&self, tag: i32, sender: u32, timeout: Duration) -> Result<Message, PopError> {
        let deadline = Instant::now() + timeout;
        let mut queues = self.queues.lock().expect("mailbox lock poisoned");
        loop {
            if let Some(message) =
                queues.get_mut(&(tag, sender)).and_then(|queue| queue.pop_front())
            {
                return Ok(message);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(PopError::Timeout);
            }
            let (guard, _) = self
                .available
                .wait_timeout(queues, deadline - now)
                .expect("mailbox lock poisoned");
            queues = guard;
        }
    }

    /// Pops the next message for `(tag, sender)` without blocking.
    pub(crate) fn try_pop(&self, tag: i32, sender: u32) -> Result<Message, PopError> {
        let mut queues = self.queues.lock().expect("mailbox lock poisoned");
        queues
            .get_mut(&(tag, sender))
            .and_then(|queue| queue.pop_front())
            .ok_or(PopError::Empty)
    }
}
