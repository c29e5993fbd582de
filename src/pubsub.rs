//! Topic fan-out: publishers and per-subscriber queues.
//!
//! A [`Publisher`] owns the subscriber list for one topic and copies each
//! published record into every live subscriber's queue, in subscription
//! order. Delivery never blocks the publisher; each [`Subscriber`] chooses
//! its own buffering with its queue depth `N`:
//!
//! * `N == 1` – latest-value-wins: a new record overwrites an unconsumed one.
//! * `N > 1` – bounded backlog: when full, the oldest record is dropped to
//!   make room for the newest.
//!
//! Subscribers deregister themselves on drop, so a publisher never delivers
//! into a queue nobody will drain.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use log::{debug, trace};
use parking_lot::Mutex;

use crate::queue::{MemberId, Queue, QueueSet};

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Delivery endpoint a publisher copies records into.
pub(crate) trait Sink<T>: Send + Sync {
    fn offer(&self, record: &T);
}

/// Fan-out side of one topic. Obtained from the runtime's `advertise`.
pub struct Publisher<T> {
    topic: String,
    subscribers: Mutex<Vec<(u64, Weak<dyn Sink<T>>)>>,
}

impl<T: Copy + Send + 'static> Publisher<T> {
    pub(crate) fn new(topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Copies `record` to every live subscriber, in subscription order.
    ///
    /// Returns the number of subscribers that received the record. Never
    /// blocks; slow consumers lose their oldest backlog instead. Safe from
    /// interrupt context.
    pub fn publish(&self, record: T) -> usize {
        let mut delivered = 0;
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|(_, sink)| match sink.upgrade() {
            Some(sink) => {
                sink.offer(&record);
                delivered += 1;
                true
            }
            None => false,
        });
        delivered
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|(_, sink)| sink.strong_count() > 0);
        subscribers.len()
    }

    pub(crate) fn add_subscriber(&self, id: u64, sink: Weak<dyn Sink<T>>) {
        self.subscribers.lock().push((id, sink));
        trace!("topic {:?}: subscriber {id} attached", self.topic);
    }

    pub(crate) fn remove_subscriber(&self, id: u64) {
        self.subscribers.lock().retain(|(sub_id, _)| *sub_id != id);
        trace!("topic {:?}: subscriber {id} detached", self.topic);
    }
}

pub(crate) struct SubscriberCore<T, const N: usize> {
    queue: Queue<T, N>,
    topic: String,
}

impl<T: Copy + Send, const N: usize> Sink<T> for SubscriberCore<T, N> {
    fn offer(&self, record: &T) {
        if N == 1 {
            self.queue.overwrite(*record);
            return;
        }
        if self.queue.try_push(*record) {
            return;
        }
        // Backlog full: sacrifice the oldest record for the newest.
        let _ = self.queue.try_pop();
        trace!("topic {:?}: backlog full, oldest record dropped", self.topic);
        let _ = self.queue.try_push(*record);
    }
}

/// Receive side of one topic subscription.
///
/// `N` is the backlog depth. The subscription ends when the value is
/// dropped.
pub struct Subscriber<T: Copy + Send + 'static, const N: usize> {
    core: Arc<SubscriberCore<T, N>>,
    publisher: Weak<Publisher<T>>,
    id: u64,
}

impl<T: Copy + Send + 'static, const N: usize> Subscriber<T, N> {
    pub(crate) fn attach(publisher: &Arc<Publisher<T>>) -> Self {
        let id = NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed);
        let core = Arc::new(SubscriberCore {
            queue: Queue::new(),
            topic: publisher.topic.clone(),
        });
        let sink: Arc<dyn Sink<T>> = core.clone();
        publisher.add_subscriber(id, Arc::downgrade(&sink));
        debug!("topic {:?}: subscribed (depth {N})", publisher.topic);
        Self {
            core,
            publisher: Arc::downgrade(publisher),
            id,
        }
    }

    pub fn topic(&self) -> &str {
        &self.core.topic
    }

    /// Blocks until a record arrives and returns it.
    pub fn receive(&self) -> Option<T> {
        self.core.queue.pop()
    }

    /// Like [`receive`](Self::receive) but gives up after `timeout`.
    pub fn receive_timeout(&self, timeout: Duration) -> Option<T> {
        self.core.queue.pop_timeout(timeout)
    }

    /// Returns a record only if one is already buffered.
    pub fn try_receive(&self) -> Option<T> {
        self.core.queue.try_pop()
    }

    /// Number of records currently buffered.
    pub fn backlog(&self) -> usize {
        self.core.queue.fill_level()
    }

    /// Registers this subscription's queue with a [`QueueSet`].
    ///
    /// Subject to the usual set rules: once per queue, and only while empty.
    pub fn add_to_set(&self, set: &QueueSet) -> bool {
        self.core.queue.add_to_set(set)
    }

    /// Whether a ready member reported by a set wait is this subscription.
    pub fn can_receive(&self, member: MemberId) -> bool {
        self.core.queue.is_member(member)
    }
}

impl<T: Copy + Send + 'static, const N: usize> Drop for Subscriber<T, N> {
    fn drop(&mut self) {
        if let Some(publisher) = self.publisher.upgrade() {
            publisher.remove_subscriber(self.id);
        }
    }
}
