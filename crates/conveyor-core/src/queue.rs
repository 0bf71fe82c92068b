//! Unbounded multi-producer multi-consumer work queue.
//!
//! Messages are either a unit of work or the reserved `Done` sentinel.
//! The sentinel is a separate enum variant, so no payload can ever be
//! mistaken for it.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::config::QueueName;
use crate::error::QueueTimeout;

/// Payload type carried between stages.
pub type Payload = Value;

/// Shared handle to a queue carrying [`Payload`]s.
pub type QueueHandle = Arc<WorkQueue<Payload>>;

/// A message on a work queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Message<T> {
    Item(T),
    /// No more work will arrive for the consumer that receives this.
    Done,
}

impl<T> Message<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

/// FIFO queue with blocking, timed pops.
#[derive(Debug)]
pub struct WorkQueue<T> {
    name: QueueName,
    messages: Mutex<VecDeque<Message<T>>>,
    available: Notify,
    items_pushed: AtomicU64,
    sentinels_pushed: AtomicU64,
}

impl<T: Send> WorkQueue<T> {
    pub fn new(name: QueueName) -> Self {
        Self {
            name,
            messages: Mutex::new(VecDeque::new()),
            available: Notify::new(),
            items_pushed: AtomicU64::new(0),
            sentinels_pushed: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &QueueName {
        &self.name
    }

    /// Append a message. Never blocks.
    pub fn push(&self, message: Message<T>) {
        let counter = match message {
            Message::Item(_) => &self.items_pushed,
            Message::Done => &self.sentinels_pushed,
        };
        self.messages.lock().push_back(message);
        counter.fetch_add(1, Ordering::Relaxed);
        self.available.notify_one();
    }

    pub fn push_item(&self, item: T) {
        self.push(Message::Item(item));
    }

    pub fn push_done(&self) {
        self.push(Message::Done);
    }

    /// Take the oldest message if one is ready.
    pub fn try_pop(&self) -> Option<Message<T>> {
        self.messages.lock().pop_front()
    }

    /// Wait up to `timeout` for the oldest message.
    pub async fn pop(&self, timeout: Duration) -> Result<Message<T>, QueueTimeout> {
        let deadline = Instant::now() + timeout;

        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            // Register before checking so a push between the check and the
            // await still wakes us.
            notified.as_mut().enable();

            if let Some(message) = self.try_pop() {
                return Ok(message);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_pop().ok_or_else(|| QueueTimeout {
                    queue: self.name.to_string(),
                    waited: timeout,
                });
            }
        }
    }

    /// Advisory only: may be stale by the time the caller acts on it.
    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    /// Units of work pushed over the queue's lifetime.
    pub fn items_pushed(&self) -> u64 {
        self.items_pushed.load(Ordering::Relaxed)
    }

    /// Sentinels pushed over the queue's lifetime.
    pub fn sentinels_pushed(&self) -> u64 {
        self.sentinels_pushed.load(Ordering::Relaxed)
    }
}
