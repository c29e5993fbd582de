//! # taskbus
//!
//! A lightweight concurrency and messaging layer in the style of a preemptive
//! real-time kernel. Application code is organized as tasks that exchange
//! typed messages through a topic-based publish/subscribe registry backed by
//! fixed-capacity queues.
//!
//! ## Module Overview
//! - [`context`]        – Execution-context detection (task / interrupt /
//!   startup) and the deferred-yield protocol shared by every primitive.
//! - [`sync`]           – Kernel-backed `Mutex`, `LockGuard` and `Semaphore`.
//! - [`queue`]          – Bounded typed `Queue` and `QueueSet` for
//!   multiplexed waiting.
//! - [`event_group`]    – Bitmask rendezvous signaling.
//! - [`task`]           – Task lifecycle state machine bound to kernel
//!   threads, with single-slot notifications.
//! - [`timer`]          – One-shot/periodic timers dispatched from a
//!   dedicated service thread.
//! - [`registry`]       – The process-wide [`Runtime`] context holding the
//!   topic and task directories.
//! - [`pubsub`]         – `Publisher`/`Subscriber` fan-out protocol.
//! - [`message_buffer`] – Variable-length byte-stream channel.
//! - [`msgs`]           – Common message records and topic names.
//! - [`services`]       – Reference services (input, PID, temperature) built
//!   on the primitives above.
//!
//! The modules are loosely coupled so applications can pick only the
//! primitives they need; the pub/sub layer is the intended front door.

pub mod context;
pub mod event_group;
pub mod message_buffer;
pub mod msgs;
pub mod pubsub;
pub mod queue;
pub mod registry;
pub mod services;
pub mod sync;
pub mod task;
pub mod timer;

pub use context::ExecutionContext;
pub use event_group::{EventBits, EventGroup};
pub use message_buffer::MessageBuffer;
pub use pubsub::{Publisher, Subscriber};
pub use queue::{MemberId, Queue, QueueSet};
pub use registry::{Runtime, MAX_TOPIC_LEN};
pub use sync::{LockGuard, Mutex, Semaphore};
pub use task::{Runnable, Task, TaskContext, TaskHandle, TaskState};
pub use timer::{Timer, TimerService};

/// Result type for fallible registry and lifecycle operations.
///
/// Per-call timeout and capacity failures are reported through `bool`/
/// `Option` returns instead; see the individual primitives.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by registry and task lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Topic name is empty or exceeds [`MAX_TOPIC_LEN`] bytes.
    #[error("invalid topic name {0:?} (must be 1..={} bytes)", MAX_TOPIC_LEN)]
    InvalidTopic(String),

    /// The topic already exists with a different payload type.
    #[error("topic {topic:?} carries {existing} payloads, not {requested}")]
    TopicTypeMismatch {
        topic: String,
        existing: &'static str,
        requested: &'static str,
    },

    /// A task with the same name is already present in the task directory.
    #[error("task {0:?} is already registered")]
    TaskAlreadyRegistered(String),

    /// `start` was called on a task that is not in the `Created` state.
    #[error("task {0:?} was already started")]
    TaskAlreadyStarted(String),

    /// The host refused to create the kernel thread.
    #[error("failed to spawn task thread: {0}")]
    TaskSpawn(#[from] std::io::Error),
}
