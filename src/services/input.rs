//! Debounced input lines publishing key events.
//!
//! One [`InputService`] watches a single digital line through a caller
//! supplied reader closure, debounces it with an integrating counter, and
//! publishes [`InputEvent`] records on the shared input topic. Long presses
//! and auto-repeat are detected by a software timer armed on every press.
//!
//! Platform interrupt glue can speed reaction up by posting the hosting
//! task's notification from the line-change ISR; the service otherwise polls
//! at its idle interval.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::trace;

use crate::msgs::{now_millis, TOPIC_INPUT_EVENTS};
use crate::pubsub::Publisher;
use crate::registry::Runtime;
use crate::task::{Runnable, TaskContext};
use crate::timer::Timer;

/// Keys this service distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKey {
    Up,
    Down,
    Right,
    Left,
    Ok,
    Back,
}

impl InputKey {
    pub fn name(self) -> &'static str {
        match self {
            InputKey::Up => "up",
            InputKey::Down => "down",
            InputKey::Right => "right",
            InputKey::Left => "left",
            InputKey::Ok => "ok",
            InputKey::Back => "back",
        }
    }
}

/// What happened to the key.
///
/// `Short` fires on release of a press that never reached the long-press
/// threshold; `Long` fires once at the threshold, then `Repeat` on every
/// further press period while held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Press,
    Release,
    Short,
    Long,
    Repeat,
}

impl InputKind {
    const fn bit(self) -> u32 {
        match self {
            InputKind::Press => 1 << 0,
            InputKind::Release => 1 << 1,
            InputKind::Short => 1 << 2,
            InputKind::Long => 1 << 3,
            InputKind::Repeat => 1 << 4,
        }
    }
}

/// Runtime-adjustable mask of which event kinds get published.
///
/// Cloneable and shared; a UI can mute `Repeat` events while a menu is
/// closed without touching the service.
#[derive(Clone)]
pub struct InputFilter(Arc<AtomicU32>);

impl InputFilter {
    /// Passes every event kind.
    pub fn all() -> Self {
        Self(Arc::new(AtomicU32::new(u32::MAX)))
    }

    /// Passes only the listed kinds.
    pub fn only(kinds: &[InputKind]) -> Self {
        let filter = Self(Arc::new(AtomicU32::new(0)));
        filter.set(kinds);
        filter
    }

    /// Replaces the pass mask with the listed kinds.
    pub fn set(&self, kinds: &[InputKind]) {
        let mask = kinds.iter().fold(0, |mask, kind| mask | kind.bit());
        self.0.store(mask, Ordering::Relaxed);
    }

    pub fn allows(&self, kind: InputKind) -> bool {
        self.0.load(Ordering::Relaxed) & kind.bit() != 0
    }
}

/// One debounced input event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputEvent {
    /// Increments on every physical press; ties Release/Short/Long/Repeat
    /// events to the press that caused them.
    pub sequence: u32,
    pub timestamp: u64,
    pub key: InputKey,
    pub kind: InputKind,
}

/// Reads the raw line level; `true` means pressed.
pub type LineReader = Box<dyn FnMut() -> bool + Send>;

/// Debounce and press-detection parameters.
///
/// The defaults suit human buttons; tests shrink them for speed.
#[derive(Debug, Clone, Copy)]
pub struct InputTiming {
    /// Consecutive differing reads required to accept a level change.
    pub debounce_ticks: u32,
    /// Delay between reads while the line is bouncing.
    pub tick: Duration,
    /// Press timer period; long press and repeat are multiples of it.
    pub press_period: Duration,
    /// Press-timer expirations after which a press counts as long.
    pub long_press_counts: u32,
    /// Idle wait between polls of a stable line. A task notification (from
    /// interrupt glue) cuts the wait short.
    pub poll_interval: Duration,
}

impl Default for InputTiming {
    fn default() -> Self {
        Self {
            debounce_ticks: 4,
            tick: Duration::from_millis(1),
            press_period: Duration::from_millis(150),
            long_press_counts: 8,
            poll_interval: Duration::from_millis(20),
        }
    }
}

/// Debounces one input line and publishes its events.
pub struct InputService {
    runtime: Arc<Runtime>,
    key: InputKey,
    read_line: LineReader,
    timing: InputTiming,
    filter: InputFilter,
    publisher: Arc<Publisher<InputEvent>>,
    timer: Option<Timer>,
    sequence: Arc<AtomicU32>,
    press_counter: Arc<AtomicU32>,
    pressed: bool,
    integrator: u32,
}

impl InputService {
    pub fn new(
        runtime: Arc<Runtime>,
        key: InputKey,
        read_line: impl FnMut() -> bool + Send + 'static,
        timing: InputTiming,
        filter: InputFilter,
    ) -> crate::Result<Self> {
        let publisher = runtime.advertise::<InputEvent>(TOPIC_INPUT_EVENTS)?;
        Ok(Self {
            runtime,
            key,
            read_line: Box::new(read_line),
            timing,
            filter,
            publisher,
            timer: None,
            sequence: Arc::new(AtomicU32::new(0)),
            press_counter: Arc::new(AtomicU32::new(0)),
            pressed: false,
            integrator: 0,
        })
    }

    fn emit(&self, kind: InputKind) {
        publish_event(
            &self.publisher,
            &self.filter,
            self.key,
            self.sequence.load(Ordering::Relaxed),
            kind,
        );
    }

    /// Accepts a settled level change and emits the events it implies.
    fn commit(&mut self, pressed: bool) {
        self.pressed = pressed;
        if pressed {
            self.sequence.fetch_add(1, Ordering::Relaxed);
            self.press_counter.store(0, Ordering::Relaxed);
            if let Some(timer) = &self.timer {
                timer.set_period(self.timing.press_period);
            }
            self.emit(InputKind::Press);
        } else {
            if let Some(timer) = &self.timer {
                timer.stop();
            }
            if self.press_counter.load(Ordering::Relaxed) < self.timing.long_press_counts {
                self.emit(InputKind::Short);
            }
            self.press_counter.store(0, Ordering::Relaxed);
            self.emit(InputKind::Release);
        }
        trace!("input {}: level {}", self.key.name(), pressed);
    }
}

fn publish_event(
    publisher: &Publisher<InputEvent>,
    filter: &InputFilter,
    key: InputKey,
    sequence: u32,
    kind: InputKind,
) {
    if !filter.allows(kind) {
        return;
    }
    publisher.publish(InputEvent {
        sequence,
        timestamp: now_millis(),
        key,
        kind,
    });
}

impl Runnable for InputService {
    fn init(&mut self, _ctx: &TaskContext) {
        let publisher = Arc::clone(&self.publisher);
        let filter = self.filter.clone();
        let sequence = Arc::clone(&self.sequence);
        let press_counter = Arc::clone(&self.press_counter);
        let long_press_counts = self.timing.long_press_counts;
        let key = self.key;

        // Fires every press period while the key is held.
        let timer = self.runtime.timers().create_timer(
            key.name(),
            self.timing.press_period,
            true,
            move || {
                let count = press_counter.fetch_add(1, Ordering::Relaxed) + 1;
                let kind = match count.cmp(&long_press_counts) {
                    std::cmp::Ordering::Less => return,
                    std::cmp::Ordering::Equal => InputKind::Long,
                    std::cmp::Ordering::Greater => InputKind::Repeat,
                };
                publish_event(&publisher, &filter, key, sequence.load(Ordering::Relaxed), kind);
            },
        );
        self.timer = Some(timer);
    }

    fn run(&mut self, ctx: &TaskContext) -> bool {
        let raw = (self.read_line)();
        if raw != self.pressed {
            self.integrator += 1;
            if self.integrator >= self.timing.debounce_ticks {
                self.commit(raw);
                // Half preload so a genuine follow-up change settles faster
                // than a cold start but bounce still cancels out.
                self.integrator = self.timing.debounce_ticks / 2;
            }
            ctx.sleep(self.timing.tick);
        } else {
            self.integrator = self.timing.debounce_ticks / 2;
            ctx.wait_timeout(self.timing.poll_interval);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_masks_event_kinds() {
        let filter = InputFilter::only(&[InputKind::Short, InputKind::Long]);
        assert!(filter.allows(InputKind::Short));
        assert!(filter.allows(InputKind::Long));
        assert!(!filter.allows(InputKind::Press));
        assert!(!filter.allows(InputKind::Repeat));

        filter.set(&[InputKind::Repeat]);
        assert!(filter.allows(InputKind::Repeat));
        assert!(!filter.allows(InputKind::Short));
    }

    #[test]
    fn default_filter_passes_everything() {
        let filter = InputFilter::all();
        for kind in [
            InputKind::Press,
            InputKind::Release,
            InputKind::Short,
            InputKind::Long,
            InputKind::Repeat,
        ] {
            assert!(filter.allows(kind));
        }
    }
}
