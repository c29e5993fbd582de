//! Execution-context detection and the deferred-yield protocol.
//!
//! Every primitive that can be called from both task and interrupt context
//! consults this module instead of re-implementing its own check. Interrupt
//! context is entered explicitly through [`with_interrupt_context`], which is
//! what platform glue wraps around interrupt service routines. Inside that
//! scope, primitives never block; if an operation unblocks a waiting task
//! they record a deferred yield which is honored exactly once when the scope
//! unwinds, after all locks have been released.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{const_reentrant_mutex, ReentrantMutex};

/// Where the current code is executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionContext {
    /// Before the runtime context has been brought up.
    Startup,
    /// A normal kernel thread; blocking calls are permitted.
    Task,
    /// An interrupt service routine; blocking calls are forbidden.
    Interrupt,
}

static SCHEDULER_STARTED: AtomicBool = AtomicBool::new(false);

static CRITICAL: ReentrantMutex<()> = const_reentrant_mutex(());

thread_local! {
    static INTERRUPT_DEPTH: Cell<u32> = Cell::new(0);
    static YIELD_PENDING: Cell<bool> = Cell::new(false);
}

/// Returns the execution context of the calling thread.
pub fn current() -> ExecutionContext {
    if in_interrupt() {
        ExecutionContext::Interrupt
    } else if scheduler_started() {
        ExecutionContext::Task
    } else {
        ExecutionContext::Startup
    }
}

/// Portable "are we in an ISR" test.
#[inline]
pub fn in_interrupt() -> bool {
    INTERRUPT_DEPTH.with(|d| d.get() > 0)
}

/// Whether the runtime context has been brought up.
pub fn scheduler_started() -> bool {
    SCHEDULER_STARTED.load(Ordering::Acquire)
}

pub(crate) fn mark_scheduler_started() {
    SCHEDULER_STARTED.store(true, Ordering::Release);
}

/// Runs `f` as if it were an interrupt service routine.
///
/// While `f` executes, [`in_interrupt`] reports `true` on this thread and all
/// primitives take their non-blocking paths. On exit from the outermost
/// scope, a pending deferred yield is honored (the hosted analog of
/// `portYIELD_FROM_ISR`). Returns the closure result and whether a yield was
/// requested by any operation inside the scope.
pub fn with_interrupt_context<R>(f: impl FnOnce() -> R) -> (R, bool) {
    let outermost = INTERRUPT_DEPTH.with(|d| {
        let depth = d.get();
        d.set(depth + 1);
        depth == 0
    });
    if outermost {
        YIELD_PENDING.with(|y| y.set(false));
    }

    let result = f();

    INTERRUPT_DEPTH.with(|d| d.set(d.get() - 1));
    let yielded = if outermost {
        let pending = YIELD_PENDING.with(|y| y.replace(false));
        if pending {
            std::thread::yield_now();
        }
        pending
    } else {
        false
    };
    (result, yielded)
}

/// Records that an operation made a higher-priority task runnable.
///
/// Only meaningful inside an interrupt scope; in task context the woken
/// thread is scheduled by the host directly. Must be called after the
/// caller has released its locks.
#[inline]
pub(crate) fn note_wakeup(woke_waiter: bool) {
    if woke_waiter && in_interrupt() {
        YIELD_PENDING.with(|y| y.set(true));
    }
}

/// Executes `f` inside the process-wide critical section.
///
/// Usable from task, interrupt and startup context alike; the section is
/// reentrant on the owning thread. Keep the enclosed work short.
pub fn critical_section<R>(f: impl FnOnce() -> R) -> R {
    let _guard = CRITICAL.lock();
    f()
}
