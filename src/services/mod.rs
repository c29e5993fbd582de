//! Reference services built on top of the messaging layer.
//!
//! These are complete, runnable behaviors rather than demos: an input
//! debouncer publishing key events, a PID loop consuming measurements and
//! publishing actuator output, and a temperature sampler feeding it. Each is
//! a [`Runnable`](crate::task::Runnable) intended to be hosted by a
//! [`Task`](crate::task::Task) and wired up through a
//! [`Runtime`](crate::registry::Runtime).

pub mod input;
pub mod pid;
pub mod temperature;
