//! Bitmask rendezvous signaling.
//!
//! An [`EventGroup`] lets any number of waiters block until one or more
//! condition bits are set by other tasks or interrupt handlers. Useful when
//! only the fact of occurrence matters and no payload needs to travel.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::context;

/// Bitmask carried by an [`EventGroup`].
pub type EventBits = u32;

struct GroupState {
    bits: EventBits,
    /// Bumped whenever a rendezvous completes, so participants that were
    /// already unblocked logically are not stranded by the bit clear.
    sync_generation: u64,
}

pub struct EventGroup {
    state: Mutex<GroupState>,
    changed: Condvar,
}

impl EventGroup {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GroupState {
                bits: 0,
                sync_generation: 0,
            }),
            changed: Condvar::new(),
        }
    }

    /// Sets the given bits, waking all waiters. Returns the resulting mask.
    ///
    /// Safe from interrupt context; a deferred yield is recorded when any
    /// task was woken.
    pub fn set_bits(&self, bits_to_set: EventBits) -> EventBits {
        let result;
        let woken;
        {
            let mut state = self.state.lock();
            state.bits |= bits_to_set;
            result = state.bits;
            woken = self.changed.notify_all();
        }
        context::note_wakeup(woken > 0);
        result
    }

    /// Clears the given bits. Returns the mask before clearing.
    pub fn clear_bits(&self, bits_to_clear: EventBits) -> EventBits {
        let mut state = self.state.lock();
        let before = state.bits;
        state.bits &= !bits_to_clear;
        before
    }

    /// Returns the current mask.
    pub fn get_bits(&self) -> EventBits {
        self.state.lock().bits
    }

    /// Blocks until the wanted bits are set.
    ///
    /// With `wait_all` every bit of `mask` must be set at once; otherwise any
    /// single bit satisfies the wait. With `clear_on_exit` the satisfying
    /// bits of `mask` are cleared before returning. Returns the mask at the
    /// time the wait was satisfied. From interrupt context the current mask
    /// is returned immediately without blocking.
    pub fn wait_bits(&self, mask: EventBits, clear_on_exit: bool, wait_all: bool) -> EventBits {
        self.wait_deadline(mask, clear_on_exit, wait_all, None)
    }

    /// Like [`wait_bits`](Self::wait_bits) but gives up after `timeout`,
    /// returning the (unsatisfying) mask at that point.
    pub fn wait_bits_timeout(
        &self,
        mask: EventBits,
        clear_on_exit: bool,
        wait_all: bool,
        timeout: Duration,
    ) -> EventBits {
        self.wait_deadline(mask, clear_on_exit, wait_all, Some(Instant::now() + timeout))
    }

    fn wait_deadline(
        &self,
        mask: EventBits,
        clear_on_exit: bool,
        wait_all: bool,
        deadline: Option<Instant>,
    ) -> EventBits {
        let mut state = self.state.lock();
        if context::in_interrupt() {
            return state.bits;
        }
        loop {
            if satisfied(state.bits, mask, wait_all) {
                let result = state.bits;
                if clear_on_exit {
                    state.bits &= !mask;
                }
                return result;
            }
            match deadline {
                None => self.changed.wait(&mut state),
                Some(at) => {
                    if self.changed.wait_until(&mut state, at).timed_out()
                        && !satisfied(state.bits, mask, wait_all)
                    {
                        return state.bits;
                    }
                }
            }
        }
    }

    /// Sets `bits_to_set`, then blocks until all of `bits_to_wait_for` are
    /// set, the classic multi-task rendezvous. The last participant to
    /// arrive clears the rendezvous bits on behalf of everyone.
    pub fn sync(&self, bits_to_set: EventBits, bits_to_wait_for: EventBits) -> EventBits {
        self.sync_deadline(bits_to_set, bits_to_wait_for, None)
    }

    /// Like [`sync`](Self::sync) but gives up after `timeout`.
    pub fn sync_timeout(
        &self,
        bits_to_set: EventBits,
        bits_to_wait_for: EventBits,
        timeout: Duration,
    ) -> EventBits {
        self.sync_deadline(bits_to_set, bits_to_wait_for, Some(Instant::now() + timeout))
    }

    fn sync_deadline(
        &self,
        bits_to_set: EventBits,
        bits_to_wait_for: EventBits,
        deadline: Option<Instant>,
    ) -> EventBits {
        let woken;
        let result;
        {
            let mut state = self.state.lock();
            state.bits |= bits_to_set;

            if state.bits & bits_to_wait_for == bits_to_wait_for {
                // Last arriver: complete the rendezvous for everyone.
                result = state.bits;
                state.bits &= !bits_to_wait_for;
                state.sync_generation += 1;
                woken = self.changed.notify_all();
            } else {
                woken = self.changed.notify_all();
                let my_generation = state.sync_generation;
                loop {
                    match deadline {
                        None => self.changed.wait(&mut state),
                        Some(at) => {
                            if self.changed.wait_until(&mut state, at).timed_out()
                                && state.sync_generation == my_generation
                            {
                                let bits = state.bits;
                                drop(state);
                                context::note_wakeup(woken > 0);
                                return bits;
                            }
                        }
                    }
                    if state.sync_generation != my_generation {
                        // The rendezvous completed while we were blocked.
                        break;
                    }
                }
                result = state.bits | bits_to_wait_for;
            }
        }
        context::note_wakeup(woken > 0);
        result
    }
}

impl Default for EventGroup {
    fn default() -> Self {
        Self::new()
    }
}

fn satisfied(bits: EventBits, mask: EventBits, wait_all: bool) -> bool {
    if wait_all {
        bits & mask == mask
    } else {
        bits & mask != 0
    }
}
