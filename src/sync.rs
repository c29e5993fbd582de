//! Kernel-backed synchronization primitives.
//!
//! `Mutex` wraps the host lock the same way on every platform and pairs with
//! the RAII [`LockGuard`]. [`Semaphore`] provides binary/counting signaling
//! with the dual-context rules shared by the rest of the crate: waiting from
//! interrupt context is refused rather than allowed to block, and posting
//! from interrupt context records a deferred yield when it wakes a task.

use std::time::{Duration, Instant};

use parking_lot::Condvar;

use crate::context;

/// RAII guard returned by [`Mutex::lock`]; the lock is released on drop.
pub type LockGuard<'a, T> = parking_lot::MutexGuard<'a, T>;

/// Mutual exclusion around a value of type `T`.
pub struct Mutex<T> {
    inner: parking_lot::Mutex<T>,
}

impl<T> Mutex<T> {
    /// Creates a new mutex protecting the given value.
    pub fn new(value: T) -> Self {
        Self {
            inner: parking_lot::Mutex::new(value),
        }
    }

    /// Acquires the mutex, blocking until it becomes available.
    pub fn lock(&self) -> LockGuard<'_, T> {
        self.inner.lock()
    }

    /// Attempts to acquire the mutex without blocking.
    pub fn try_lock(&self) -> Option<LockGuard<'_, T>> {
        self.inner.try_lock()
    }

    /// Attempts to acquire the mutex, giving up after `timeout`.
    pub fn try_lock_for(&self, timeout: Duration) -> Option<LockGuard<'_, T>> {
        self.inner.try_lock_for(timeout)
    }

    /// Consumes the mutex and returns the protected value.
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Counting or binary semaphore.
///
/// A binary semaphore saturates at one pending permit, which makes it
/// suitable for interrupt-to-task signaling where only the fact of occurrence
/// matters.
pub struct Semaphore {
    count: parking_lot::Mutex<usize>,
    max: usize,
    available: Condvar,
}

impl Semaphore {
    /// Creates a binary semaphore with no permit pending.
    pub fn binary() -> Self {
        Self::counting(1, 0)
    }

    /// Creates a counting semaphore with the given ceiling and initial count.
    pub fn counting(max: usize, initial: usize) -> Self {
        Self {
            count: parking_lot::Mutex::new(initial.min(max)),
            max,
            available: Condvar::new(),
        }
    }

    /// Takes a permit, blocking until one is posted.
    ///
    /// Returns `false` without blocking when called from interrupt context.
    pub fn wait(&self) -> bool {
        self.wait_deadline(None)
    }

    /// Takes a permit, giving up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.wait_deadline(Some(Instant::now() + timeout))
    }

    fn wait_deadline(&self, deadline: Option<Instant>) -> bool {
        if context::in_interrupt() {
            // Taking a semaphore inside an ISR is refused, not blocked.
            let mut count = self.count.lock();
            if *count > 0 {
                *count -= 1;
                return true;
            }
            return false;
        }

        let mut count = self.count.lock();
        while *count == 0 {
            match deadline {
                None => self.available.wait(&mut count),
                Some(at) => {
                    if self.available.wait_until(&mut count, at).timed_out() && *count == 0 {
                        return false;
                    }
                }
            }
        }
        *count -= 1;
        true
    }

    /// Posts a permit, waking one waiter if any.
    ///
    /// Returns `false` if the semaphore was already at its ceiling. Safe from
    /// interrupt context; a deferred yield is recorded when a task was woken.
    pub fn post(&self) -> bool {
        let woke;
        {
            let mut count = self.count.lock();
            if *count >= self.max {
                return false;
            }
            *count += 1;
            woke = self.available.notify_one();
        }
        context::note_wakeup(woke);
        true
    }

    /// Number of permits currently pending.
    pub fn count(&self) -> usize {
        *self.count.lock()
    }
}
