//! Task lifecycle state machine.
//!
//! A [`Task`] binds a unit of recurring work (anything implementing
//! [`Runnable`]) to a kernel thread with a fixed stack budget and priority.
//! The lifecycle is Created → Running → Stopping → Terminated: the thread
//! entry point runs an optional `init` hook and then invokes `run` until it
//! either returns `false` or a stop request is observed. Stopping is a
//! cooperative, synchronous join; there is no preemptive termination
//! mid-`run`.
//!
//! Each task also carries a single-slot notification usable for
//! interrupt-to-task signaling, and samples its own stack high-water mark
//! once per loop iteration for diagnostics.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use log::debug;
use parking_lot::{Condvar, Mutex};

use crate::context;
use crate::Error;

/// Lifecycle states of a [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Constructed but not started.
    Created,
    /// The thread entry point is active.
    Running,
    /// A stop was requested; waiting for the in-flight `run` to observe it.
    Stopping,
    /// The kernel thread has exited and the handle is cleared.
    Terminated,
}

/// A unit of recurring work hosted by a [`Task`].
///
/// `run` is invoked in a loop; returning `false` ends the task. Every
/// invocation should be safe to skip; a timed-out receive simply means
/// "no new data this cycle".
pub trait Runnable: Send + 'static {
    /// One-time hook invoked on the task thread before the first `run`.
    fn init(&mut self, _ctx: &TaskContext) {}

    /// One iteration of the task's work loop.
    fn run(&mut self, ctx: &TaskContext) -> bool;
}

impl<F> Runnable for F
where
    F: FnMut(&TaskContext) -> bool + Send + 'static,
{
    fn run(&mut self, ctx: &TaskContext) -> bool {
        self(ctx)
    }
}

struct Control {
    name: Mutex<String>,
    priority: AtomicU8,
    stack_bytes: AtomicUsize,
    started: AtomicBool,
    stop_requested: AtomicBool,
    state: Mutex<TaskState>,
    state_changed: Condvar,
    notify_slot: Mutex<bool>,
    notified: Condvar,
    high_water: AtomicUsize,
    thread: Mutex<Option<ThreadId>>,
}

impl Control {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            name: Mutex::new(String::new()),
            priority: AtomicU8::new(0),
            stack_bytes: AtomicUsize::new(0),
            started: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            state: Mutex::new(TaskState::Created),
            state_changed: Condvar::new(),
            notify_slot: Mutex::new(false),
            notified: Condvar::new(),
            high_water: AtomicUsize::new(0),
            thread: Mutex::new(None),
        })
    }

    fn state(&self) -> TaskState {
        *self.state.lock()
    }

    fn is_current_thread(&self) -> bool {
        *self.thread.lock() == Some(thread::current().id())
    }

    fn post(&self) {
        let woke;
        {
            let mut slot = self.notify_slot.lock();
            *slot = true;
            woke = self.notified.notify_one();
        }
        context::note_wakeup(woke);
    }

    fn wait_deadline(&self, deadline: Option<Instant>) -> bool {
        if context::in_interrupt() {
            let mut slot = self.notify_slot.lock();
            return std::mem::take(&mut *slot);
        }
        let mut slot = self.notify_slot.lock();
        loop {
            if *slot {
                *slot = false;
                return true;
            }
            if self.stop_requested.load(Ordering::Acquire) {
                return false;
            }
            match deadline {
                None => self.notified.wait(&mut slot),
                Some(at) => {
                    if self.notified.wait_until(&mut slot, at).timed_out() && !*slot {
                        return false;
                    }
                }
            }
        }
    }

    /// Requests a stop and waits for the thread to observe it.
    fn stop(&self, from_idle: bool) -> bool {
        if !self.started.load(Ordering::Acquire) {
            return false;
        }
        self.stop_requested.store(true, Ordering::SeqCst);
        // Wake a task parked in `wait` so it can observe the request.
        self.notified.notify_all();

        if self.is_current_thread() {
            // Self-stop: the loop exits after this `run` returns.
            return true;
        }

        if from_idle {
            while self.state() != TaskState::Terminated {
                thread::yield_now();
            }
        } else {
            let mut state = self.state.lock();
            if *state == TaskState::Running {
                *state = TaskState::Stopping;
            }
            while *state != TaskState::Terminated {
                self.state_changed.wait(&mut state);
            }
        }
        true
    }

    fn update_high_water(&self, base: usize) {
        let used = base.abs_diff(stack_position());
        self.high_water.fetch_max(used, Ordering::Relaxed);
    }
}

#[inline(never)]
fn stack_position() -> usize {
    let marker = 0u8;
    &marker as *const u8 as usize
}

/// Cheap, cloneable reference to a started task.
///
/// Handles are what the task directory stores and what interrupt glue
/// captures for [`post`](TaskHandle::post).
#[derive(Clone)]
pub struct TaskHandle {
    control: Arc<Control>,
}

impl TaskHandle {
    pub fn name(&self) -> String {
        self.control.name.lock().clone()
    }

    pub fn priority(&self) -> u8 {
        self.control.priority.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> TaskState {
        self.control.state()
    }

    /// `true` while the thread entry point is active (Running or Stopping).
    pub fn is_running(&self) -> bool {
        matches!(self.state(), TaskState::Running | TaskState::Stopping)
    }

    /// Posts the task's single-slot notification, waking it if parked.
    ///
    /// The slot counts to one: repeated posts before the task consumes the
    /// notification collapse into a single wakeup. Safe from interrupt
    /// context.
    pub fn post(&self) {
        self.control.post();
    }

    /// Requests a stop and blocks until the task's thread has exited.
    ///
    /// Returns `false` if the task was never started. Safe to call from
    /// several tasks concurrently; late callers observe the Terminated
    /// state and return promptly.
    pub fn stop(&self) -> bool {
        self.control.stop(false)
    }

    /// Like [`stop`](Self::stop) but yield-spins instead of blocking, for
    /// use from the idle task.
    pub fn stop_from_idle(&self) -> bool {
        self.control.stop(true)
    }

    /// Configured stack budget in bytes.
    pub fn stack_bytes(&self) -> usize {
        self.control.stack_bytes.load(Ordering::Relaxed)
    }

    /// High-water mark of stack usage observed so far.
    pub fn used_stack_bytes(&self) -> usize {
        self.control.high_water.load(Ordering::Relaxed)
    }

    /// Stack budget not yet touched at the high-water mark.
    pub fn remaining_stack_bytes(&self) -> usize {
        self.stack_bytes().saturating_sub(self.used_stack_bytes())
    }
}

/// Per-invocation context handed to [`Runnable::run`].
pub struct TaskContext {
    control: Arc<Control>,
}

impl TaskContext {
    /// Blocks until the task's notification is posted.
    ///
    /// Returns `false` when interrupted by a stop request instead of a
    /// notification.
    pub fn wait(&self) -> bool {
        self.control.wait_deadline(None)
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.control.wait_deadline(Some(Instant::now() + timeout))
    }

    /// Whether a stop has been requested for this task.
    pub fn stop_requested(&self) -> bool {
        self.control.stop_requested.load(Ordering::Acquire)
    }

    /// Sleeps the task thread; a no-op from interrupt context.
    pub fn sleep(&self, duration: Duration) {
        if !context::in_interrupt() {
            thread::sleep(duration);
        }
    }

    /// Offers the rest of this time slice to the scheduler.
    pub fn yield_now(&self) {
        thread::yield_now();
    }

    /// Handle to this task, e.g. for registering in the task directory.
    pub fn handle(&self) -> TaskHandle {
        TaskHandle {
            control: Arc::clone(&self.control),
        }
    }
}

/// Binds a [`Runnable`] to a kernel thread.
pub struct Task<R: Runnable> {
    control: Arc<Control>,
    behavior: Mutex<Option<R>>,
    join: Mutex<Option<JoinHandle<()>>>,
    stack_bytes: usize,
}

impl<R: Runnable> Task<R> {
    /// Default stack budget; generous because host threads are cheap.
    pub const DEFAULT_STACK_BYTES: usize = 64 * 1024;

    pub fn new(behavior: R) -> Self {
        Self {
            control: Control::new(),
            behavior: Mutex::new(Some(behavior)),
            join: Mutex::new(None),
            stack_bytes: Self::DEFAULT_STACK_BYTES,
        }
    }

    /// Overrides the stack budget; must be called before `start`.
    pub fn with_stack_bytes(mut self, stack_bytes: usize) -> Self {
        self.stack_bytes = stack_bytes;
        self
    }

    /// Creates the kernel thread and enters the Running state.
    ///
    /// A task starts at most once; kernel resource exhaustion is surfaced as
    /// an error so misconfiguration is caught at boot rather than tolerated.
    pub fn start(&self, priority: u8, name: &str) -> crate::Result<TaskHandle> {
        let behavior = self
            .behavior
            .lock()
            .take()
            .ok_or_else(|| Error::TaskAlreadyStarted(name.to_string()))?;

        *self.control.name.lock() = name.to_string();
        self.control.priority.store(priority, Ordering::Relaxed);
        self.control
            .stack_bytes
            .store(self.stack_bytes, Ordering::Relaxed);
        self.control.started.store(true, Ordering::Release);
        context::mark_scheduler_started();

        let control = Arc::clone(&self.control);
        let join = thread::Builder::new()
            .name(name.to_string())
            .stack_size(self.stack_bytes)
            .spawn(move || entry_point(control, behavior));
        let join = match join {
            Ok(join) => join,
            Err(err) => {
                // No thread exists to ever reach Terminated; a later stop
                // must see the task as never started instead of waiting.
                self.control.started.store(false, Ordering::Release);
                return Err(Error::TaskSpawn(err));
            }
        };
        *self.join.lock() = Some(join);

        debug!("task {name:?} started (priority {priority})");
        Ok(self.handle())
    }

    pub fn handle(&self) -> TaskHandle {
        TaskHandle {
            control: Arc::clone(&self.control),
        }
    }

    pub fn state(&self) -> TaskState {
        self.control.state()
    }

    pub fn is_running(&self) -> bool {
        self.handle().is_running()
    }

    /// Synchronous join: requests a stop, waits for the in-flight `run` to
    /// finish and the thread to exit. Returns `false` if never started.
    pub fn stop(&self) -> bool {
        let stopped = self.control.stop(false);
        if stopped && !self.control.is_current_thread() {
            if let Some(join) = self.join.lock().take() {
                let _ = join.join();
            }
        }
        stopped
    }

    /// Yield-spinning variant of [`stop`](Self::stop) for the idle task.
    pub fn stop_from_idle(&self) -> bool {
        let stopped = self.control.stop(true);
        if stopped && !self.control.is_current_thread() {
            if let Some(join) = self.join.lock().take() {
                let _ = join.join();
            }
        }
        stopped
    }
}

impl<R: Runnable> Drop for Task<R> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn entry_point<R: Runnable>(control: Arc<Control>, mut behavior: R) {
    let base = stack_position();
    *control.thread.lock() = Some(thread::current().id());
    {
        let mut state = control.state.lock();
        if *state == TaskState::Created {
            *state = TaskState::Running;
        }
        control.state_changed.notify_all();
    }

    let ctx = TaskContext {
        control: Arc::clone(&control),
    };
    behavior.init(&ctx);

    while !control.stop_requested.load(Ordering::Acquire) && behavior.run(&ctx) {
        control.update_high_water(base);
    }
    control.update_high_water(base);

    *control.thread.lock() = None;
    {
        let mut state = control.state.lock();
        *state = TaskState::Terminated;
        control.state_changed.notify_all();
    }
    debug!("task {:?} terminated", control.name.lock());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn run_false_terminates() {
        let iterations = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&iterations);
        let task = Task::new(move |_: &TaskContext| {
            counter.fetch_add(1, Ordering::SeqCst) < 2
        });
        let handle = task.start(1, "three-shot").unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while handle.state() != TaskState::Terminated && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(handle.state(), TaskState::Terminated);
        assert_eq!(iterations.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn stop_before_start_fails() {
        let task = Task::new(|_: &TaskContext| true);
        assert!(!task.stop());
        assert_eq!(task.state(), TaskState::Created);
        // Avoid the Drop stop on a task that still owns its behavior.
        let _ = task.start(0, "late").unwrap();
        assert!(task.stop());
    }

    #[test]
    fn failed_spawn_leaves_the_task_stoppable() {
        // An impossible stack budget makes thread creation fail.
        let task = Task::new(|_: &TaskContext| true).with_stack_bytes(usize::MAX);
        assert!(matches!(task.start(0, "doomed"), Err(Error::TaskSpawn(_))));

        assert_eq!(task.state(), TaskState::Created);
        // Without a thread to reach Terminated, stop (and the stop in Drop)
        // must report "never started" promptly rather than wait forever.
        assert!(!task.stop());
        assert!(!task.stop_from_idle());
        assert!(!task.handle().stop());
    }

    #[test]
    fn double_start_is_rejected() {
        let task = Task::new(|ctx: &TaskContext| {
            ctx.sleep(Duration::from_millis(5));
            true
        });
        task.start(0, "only-once").unwrap();
        assert!(matches!(
            task.start(0, "only-once"),
            Err(Error::TaskAlreadyStarted(_))
        ));
        assert!(task.stop());
    }

    #[test]
    fn notification_counts_to_one() {
        let observed = Arc::new(AtomicU32::new(0));
        let probe = Arc::clone(&observed);
        let task = Task::new(move |ctx: &TaskContext| {
            if ctx.wait_timeout(Duration::from_millis(200)) {
                probe.fetch_add(1, Ordering::SeqCst);
            }
            true
        });
        let handle = task.start(1, "notified").unwrap();
        thread::sleep(Duration::from_millis(50));

        // Back-to-back posts collapse into a single pending notification.
        handle.post();
        handle.post();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(observed.load(Ordering::SeqCst), 1);
        assert!(task.stop());
    }

    #[test]
    fn stack_high_water_is_sampled() {
        let task = Task::new(|ctx: &TaskContext| {
            ctx.sleep(Duration::from_millis(5));
            true
        });
        let handle = task.start(1, "stack-probe").unwrap();
        thread::sleep(Duration::from_millis(50));
        assert!(handle.used_stack_bytes() > 0);
        assert!(handle.remaining_stack_bytes() < handle.stack_bytes());
        assert!(task.stop());
    }
}
