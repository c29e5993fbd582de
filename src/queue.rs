//! Bounded typed queues and queue sets.
//!
//! [`Queue`] is a fixed-capacity FIFO of trivially-copyable items with
//! blocking, timeout and interrupt-safe variants of push/pop/peek. A queue
//! can join a [`QueueSet`] exactly once, which lets one task block on many
//! queues with a single wait call and then ask each queue whether the ready
//! member was its own.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use heapless::Deque;
use parking_lot::{Condvar, Mutex};

use crate::context;

static NEXT_MEMBER_ID: AtomicUsize = AtomicUsize::new(1);

/// Identity of a queue inside a [`QueueSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemberId(usize);

struct SetCore {
    ready: Mutex<VecDeque<MemberId>>,
    readable: Condvar,
}

impl SetCore {
    /// Marks `member` ready and reports whether a waiter was woken.
    fn notify(&self, member: MemberId) -> bool {
        let mut ready = self.ready.lock();
        ready.push_back(member);
        self.readable.notify_one()
    }
}

/// Aggregates queues for multiplexed waiting.
///
/// Members must be registered while empty and must then only be drained
/// after the set reported them ready, otherwise ready notifications go
/// stale. This mirrors the rules of kernel-level queue sets.
pub struct QueueSet {
    core: Arc<SetCore>,
}

impl QueueSet {
    pub fn new() -> Self {
        Self {
            core: Arc::new(SetCore {
                ready: Mutex::new(VecDeque::new()),
                readable: Condvar::new(),
            }),
        }
    }

    /// Blocks until any member queue has data, returning its identity.
    pub fn wait(&self) -> MemberId {
        let mut ready = self.core.ready.lock();
        loop {
            if let Some(member) = ready.pop_front() {
                return member;
            }
            self.core.readable.wait(&mut ready);
        }
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<MemberId> {
        let deadline = Instant::now() + timeout;
        let mut ready = self.core.ready.lock();
        loop {
            if let Some(member) = ready.pop_front() {
                return Some(member);
            }
            if self.core.readable.wait_until(&mut ready, deadline).timed_out() {
                return ready.pop_front();
            }
        }
    }
}

impl Default for QueueSet {
    fn default() -> Self {
        Self::new()
    }
}

struct Shared<T, const N: usize> {
    items: Deque<T, N>,
    set: Option<Arc<SetCore>>,
}

/// Fixed-capacity FIFO ring of copyable items.
///
/// All operations detect the execution context at call time: in task context
/// they may block (forever or until a timeout), in interrupt context they
/// never block and record a deferred yield when they wake a task. A failed
/// operation has no partial effect.
pub struct Queue<T, const N: usize> {
    shared: Mutex<Shared<T, N>>,
    not_empty: Condvar,
    not_full: Condvar,
    member: MemberId,
}

impl<T: Copy + Send, const N: usize> Queue<T, N> {
    pub fn new() -> Self {
        Self {
            shared: Mutex::new(Shared {
                items: Deque::new(),
                set: None,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            member: MemberId(NEXT_MEMBER_ID.fetch_add(1, Ordering::Relaxed)),
        }
    }

    /// Compile-time capacity.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Number of items currently queued.
    pub fn fill_level(&self) -> usize {
        self.shared.lock().items.len()
    }

    /// Free slots remaining.
    pub fn space_available(&self) -> usize {
        N - self.fill_level()
    }

    /// Registers this queue with `set`.
    ///
    /// Fails if the queue already belongs to a set or is not empty;
    /// membership is immutable for the queue's lifetime afterwards.
    pub fn add_to_set(&self, set: &QueueSet) -> bool {
        let mut shared = self.shared.lock();
        if shared.set.is_some() || !shared.items.is_empty() {
            return false;
        }
        shared.set = Some(Arc::clone(&set.core));
        true
    }

    /// Whether `member` (as returned by a set wait) identifies this queue.
    pub fn is_member(&self, member: MemberId) -> bool {
        self.member == member
    }

    /// Appends an item, blocking while the queue is full.
    pub fn push(&self, item: T) -> bool {
        self.push_deadline(item, None)
    }

    /// Appends an item, giving up after `timeout`.
    pub fn push_timeout(&self, item: T, timeout: Duration) -> bool {
        self.push_deadline(item, Some(Instant::now() + timeout))
    }

    /// Appends an item only if space is free right now.
    pub fn try_push(&self, item: T) -> bool {
        let woke;
        let notify_set;
        {
            let mut shared = self.shared.lock();
            if shared.items.push_back(item).is_err() {
                return false;
            }
            woke = self.not_empty.notify_one();
            notify_set = shared.set.clone();
        }
        self.finish_push(woke, notify_set);
        true
    }

    fn push_deadline(&self, item: T, deadline: Option<Instant>) -> bool {
        if context::in_interrupt() {
            return self.try_push(item);
        }

        let woke;
        let notify_set;
        {
            let mut shared = self.shared.lock();
            while shared.items.is_full() {
                match deadline {
                    None => self.not_full.wait(&mut shared),
                    Some(at) => {
                        if self.not_full.wait_until(&mut shared, at).timed_out()
                            && shared.items.is_full()
                        {
                            return false;
                        }
                    }
                }
            }
            // Cannot fail: the loop above guarantees a free slot.
            let _ = shared.items.push_back(item);
            woke = self.not_empty.notify_one();
            notify_set = shared.set.clone();
        }
        self.finish_push(woke, notify_set);
        true
    }

    fn finish_push(&self, woke: bool, set: Option<Arc<SetCore>>) {
        let set_woke = match set {
            Some(set) => set.notify(self.member),
            None => false,
        };
        context::note_wakeup(woke || set_woke);
    }

    /// Removes and returns the oldest item, blocking while empty.
    pub fn pop(&self) -> Option<T> {
        self.pop_deadline(None)
    }

    /// Removes and returns the oldest item, giving up after `timeout`.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        self.pop_deadline(Some(Instant::now() + timeout))
    }

    /// Removes and returns the oldest item only if one is present.
    pub fn try_pop(&self) -> Option<T> {
        let item;
        let woke;
        {
            let mut shared = self.shared.lock();
            item = shared.items.pop_front()?;
            woke = self.not_full.notify_one();
        }
        context::note_wakeup(woke);
        Some(item)
    }

    fn pop_deadline(&self, deadline: Option<Instant>) -> Option<T> {
        if context::in_interrupt() {
            return self.try_pop();
        }

        let item;
        let woke;
        {
            let mut shared = self.shared.lock();
            while shared.items.is_empty() {
                match deadline {
                    None => self.not_empty.wait(&mut shared),
                    Some(at) => {
                        if self.not_empty.wait_until(&mut shared, at).timed_out()
                            && shared.items.is_empty()
                        {
                            return None;
                        }
                    }
                }
            }
            item = shared.items.pop_front();
            woke = self.not_full.notify_one();
        }
        context::note_wakeup(woke);
        item
    }

    /// Copies the oldest item without removing it, blocking while empty.
    pub fn peek(&self) -> Option<T> {
        self.peek_deadline(None)
    }

    /// Copies the oldest item without removing it, giving up after `timeout`.
    pub fn peek_timeout(&self, timeout: Duration) -> Option<T> {
        self.peek_deadline(Some(Instant::now() + timeout))
    }

    fn peek_deadline(&self, deadline: Option<Instant>) -> Option<T> {
        let mut shared = self.shared.lock();
        if context::in_interrupt() {
            return shared.items.front().copied();
        }
        while shared.items.is_empty() {
            match deadline {
                None => self.not_empty.wait(&mut shared),
                Some(at) => {
                    if self.not_empty.wait_until(&mut shared, at).timed_out()
                        && shared.items.is_empty()
                    {
                        return None;
                    }
                }
            }
        }
        shared.items.front().copied()
    }

    /// Unconditionally replaces the queue content with `item`.
    ///
    /// Intended for capacity-1 "latest value wins" channels: the sole slot is
    /// overwritten regardless of fill state and a receiver always observes
    /// the most recent value.
    pub fn overwrite(&self, item: T) {
        let woke;
        let notify_set;
        {
            let mut shared = self.shared.lock();
            let was_empty = shared.items.is_empty();
            if shared.items.is_full() {
                shared.items.pop_front();
            }
            let _ = shared.items.push_back(item);
            woke = self.not_empty.notify_one();
            // Replacing an unconsumed item must not grow the ready list.
            notify_set = if was_empty { shared.set.clone() } else { None };
        }
        self.finish_push(woke, notify_set);
    }
}

impl<T: Copy + Send, const N: usize> Default for Queue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}
