//! Software timers driven by a shared service thread.
//!
//! A [`TimerService`] owns one kernel thread that sleeps until the nearest
//! armed deadline, fires the due callbacks, and reschedules periodic timers.
//! Callbacks run on the service thread, so they must stay short and must not
//! block; long work belongs in a task woken by the callback.
//!
//! [`Timer`] handles hold their state through an `Arc`; the service only
//! keeps weak references, so dropping the last handle retires the timer
//! without any explicit unregistration call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, trace};
use parking_lot::{Condvar, Mutex};

use crate::context;

type Callback = Box<dyn FnMut() + Send>;

struct TimerShared {
    period: Duration,
    periodic: bool,
    /// `None` while the timer is dormant.
    deadline: Option<Instant>,
}

struct TimerInner {
    name: String,
    shared: Mutex<TimerShared>,
    callback: Mutex<Callback>,
}

struct ServiceCore {
    timers: Mutex<Vec<Weak<TimerInner>>>,
    changed: Condvar,
    shutdown: AtomicBool,
}

impl ServiceCore {
    /// Wakes the service thread to re-evaluate deadlines.
    fn kick(&self) {
        let woke;
        {
            let _timers = self.timers.lock();
            woke = self.changed.notify_one();
        }
        context::note_wakeup(woke);
    }
}

/// Owns the timer thread; create one per runtime.
pub struct TimerService {
    core: Arc<ServiceCore>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl TimerService {
    pub fn new() -> Self {
        let core = Arc::new(ServiceCore {
            timers: Mutex::new(Vec::new()),
            changed: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });
        let thread_core = Arc::clone(&core);
        // Losing the timer thread means timers silently never fire; fail
        // fast at construction instead.
        let join = thread::Builder::new()
            .name("timer-svc".to_string())
            .spawn(move || service_loop(thread_core))
            .expect("timer service thread");
        Self {
            core,
            join: Mutex::new(Some(join)),
        }
    }

    /// Creates a dormant timer owned by this service.
    ///
    /// `periodic` timers rearm themselves after each expiry; one-shot timers
    /// go dormant until restarted.
    pub fn create_timer(
        &self,
        name: &str,
        period: Duration,
        periodic: bool,
        callback: impl FnMut() + Send + 'static,
    ) -> Timer {
        let inner = Arc::new(TimerInner {
            name: name.to_string(),
            shared: Mutex::new(TimerShared {
                period,
                periodic,
                deadline: None,
            }),
            callback: Mutex::new(Box::new(callback)),
        });
        self.core.timers.lock().push(Arc::downgrade(&inner));
        debug!("timer {name:?} created (period {period:?}, periodic {periodic})");
        Timer {
            inner,
            core: Arc::clone(&self.core),
        }
    }
}

impl Default for TimerService {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.core.shutdown.store(true, Ordering::Release);
        self.core.kick();
        if let Some(join) = self.join.lock().take() {
            let _ = join.join();
        }
    }
}

/// Handle to a software timer. Dropping it retires the timer.
pub struct Timer {
    inner: Arc<TimerInner>,
    core: Arc<ServiceCore>,
}

impl Timer {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Arms the timer for one full period from now. Restarts it if already
    /// armed. Safe from interrupt context.
    pub fn start(&self) {
        let period = {
            let mut shared = self.inner.shared.lock();
            shared.deadline = Some(Instant::now() + shared.period);
            shared.period
        };
        trace!("timer {:?} armed for {period:?}", self.inner.name);
        self.core.kick();
    }

    /// Disarms the timer without firing it.
    pub fn stop(&self) {
        self.inner.shared.lock().deadline = None;
        self.core.kick();
    }

    /// Restarts the current period from now; equivalent to [`start`](Self::start).
    pub fn reset(&self) {
        self.start();
    }

    /// Replaces the period and restarts the timer with it.
    pub fn set_period(&self, period: Duration) {
        {
            let mut shared = self.inner.shared.lock();
            shared.period = period;
            shared.deadline = Some(Instant::now() + period);
        }
        self.core.kick();
    }

    /// Whether the timer is armed.
    pub fn is_active(&self) -> bool {
        self.inner.shared.lock().deadline.is_some()
    }

    pub fn period(&self) -> Duration {
        self.inner.shared.lock().period
    }
}

fn service_loop(core: Arc<ServiceCore>) {
    loop {
        if core.shutdown.load(Ordering::Acquire) {
            return;
        }

        // Collect due timers and the nearest future deadline under the list
        // lock, then fire callbacks outside it.
        let now = Instant::now();
        let mut due: Vec<Arc<TimerInner>> = Vec::new();
        let mut nearest: Option<Instant> = None;
        {
            let mut timers = core.timers.lock();
            timers.retain(|weak| {
                let Some(timer) = weak.upgrade() else {
                    return false;
                };
                let mut shared = timer.shared.lock();
                if let Some(deadline) = shared.deadline {
                    if deadline <= now {
                        if shared.periodic {
                            shared.deadline = Some(deadline + shared.period);
                            nearest = min_deadline(nearest, shared.deadline);
                        } else {
                            shared.deadline = None;
                        }
                        drop(shared);
                        due.push(timer);
                    } else {
                        nearest = min_deadline(nearest, Some(deadline));
                    }
                }
                true
            });

            if due.is_empty() {
                if core.shutdown.load(Ordering::Acquire) {
                    return;
                }
                match nearest {
                    None => core.changed.wait(&mut timers),
                    Some(at) => {
                        let _ = core.changed.wait_until(&mut timers, at);
                    }
                }
                continue;
            }
        }

        for timer in due {
            trace!("timer {:?} fired", timer.name);
            (timer.callback.lock())();
        }
    }
}

fn min_deadline(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (x, None) => x,
        (None, y) => y,
    }
}
