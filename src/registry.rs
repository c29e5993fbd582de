//! Runtime context: topic registry, task directory, timer service.
//!
//! One [`Runtime`] is created at boot and handed (as an `Arc`) to every
//! component that advertises or subscribes. There is no global instance;
//! tests build as many isolated runtimes as they need.
//!
//! Topics are registered by name. The first `advertise` of a name creates
//! the topic and fixes its record type; later calls for the same name return
//! the same publisher, or fail if the record type differs.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::context;
use crate::pubsub::{Publisher, Subscriber};
use crate::task::TaskHandle;
use crate::timer::TimerService;
use crate::{Error, Result};

/// Longest accepted topic name, in bytes.
pub const MAX_TOPIC_LEN: usize = 32;

struct TopicEntry {
    publisher: Arc<dyn Any + Send + Sync>,
    type_id: TypeId,
    type_name: &'static str,
}

/// The boot-owned context object tying the messaging layer together.
pub struct Runtime {
    topics: Mutex<HashMap<String, TopicEntry>>,
    tasks: Mutex<HashMap<String, TaskHandle>>,
    timers: TimerService,
}

impl Runtime {
    pub fn new() -> Arc<Self> {
        context::mark_scheduler_started();
        info!("runtime started");
        Arc::new(Self {
            topics: Mutex::new(HashMap::new()),
            tasks: Mutex::new(HashMap::new()),
            timers: TimerService::new(),
        })
    }

    /// Creates the topic `name` carrying records of type `T`, or returns the
    /// existing publisher if the topic is already registered with `T`.
    ///
    /// Fails when the name is empty or overlong, or when the topic exists
    /// with a different record type. Advertising is idempotent and safe to
    /// race from several tasks; exactly one publisher per topic ever exists.
    pub fn advertise<T: Copy + Send + 'static>(&self, name: &str) -> Result<Arc<Publisher<T>>> {
        if name.is_empty() || name.len() > MAX_TOPIC_LEN {
            return Err(Error::InvalidTopic(name.to_string()));
        }

        let mut topics = self.topics.lock();
        let entry = topics.entry(name.to_string()).or_insert_with(|| {
            debug!("topic {name:?} created ({})", std::any::type_name::<T>());
            TopicEntry {
                publisher: Arc::new(Publisher::<T>::new(name)),
                type_id: TypeId::of::<T>(),
                type_name: std::any::type_name::<T>(),
            }
        });
        if entry.type_id != TypeId::of::<T>() {
            warn!(
                "topic {name:?} carries {}, refused for {}",
                entry.type_name,
                std::any::type_name::<T>()
            );
            return Err(Error::TopicTypeMismatch {
                topic: name.to_string(),
                existing: entry.type_name,
                requested: std::any::type_name::<T>(),
            });
        }
        let publisher = Arc::clone(&entry.publisher)
            .downcast::<Publisher<T>>()
            .expect("type id checked above");
        Ok(publisher)
    }

    /// Subscribes to topic `name` with a backlog of `N` records.
    ///
    /// Advertises the topic first if needed, so subscription order relative
    /// to the real publisher does not matter. The subscription ends when the
    /// returned value is dropped.
    pub fn subscribe<T: Copy + Send + 'static, const N: usize>(
        &self,
        name: &str,
    ) -> Result<Subscriber<T, N>> {
        let publisher = self.advertise::<T>(name)?;
        Ok(Subscriber::attach(&publisher))
    }

    /// Forgets the topic `name`.
    ///
    /// Existing publishers and subscribers keep working on the detached
    /// topic; a later `advertise` of the same name starts fresh.
    pub fn remove_topic(&self, name: &str) -> bool {
        let removed = self.topics.lock().remove(name).is_some();
        if removed {
            debug!("topic {name:?} removed");
        }
        removed
    }

    /// Topic names currently registered, in no particular order.
    pub fn topic_names(&self) -> Vec<String> {
        self.topics.lock().keys().cloned().collect()
    }

    /// Records a started task in the directory under its name.
    ///
    /// Fails if a task of that name is already registered.
    pub fn register_task(&self, handle: TaskHandle) -> Result<()> {
        let name = handle.name();
        let mut tasks = self.tasks.lock();
        if tasks.contains_key(&name) {
            return Err(Error::TaskAlreadyRegistered(name));
        }
        tasks.insert(name, handle);
        Ok(())
    }

    /// Drops a task from the directory. Does not stop it.
    pub fn remove_task(&self, name: &str) -> bool {
        self.tasks.lock().remove(name).is_some()
    }

    /// Looks up a registered task by name.
    pub fn task(&self, name: &str) -> Option<TaskHandle> {
        self.tasks.lock().get(name).cloned()
    }

    /// Names of all registered tasks, in no particular order.
    pub fn task_names(&self) -> Vec<String> {
        self.tasks.lock().keys().cloned().collect()
    }

    /// Stops every registered task except the named one, joining each in
    /// turn. Intended for orderly shutdown driven by a supervisor task.
    pub fn stop_all_except(&self, survivor: &str) {
        let handles: Vec<TaskHandle> = {
            let tasks = self.tasks.lock();
            tasks
                .iter()
                .filter(|(name, _)| name.as_str() != survivor)
                .map(|(_, handle)| handle.clone())
                .collect()
        };
        for handle in handles {
            info!("stopping task {:?}", handle.name());
            handle.stop();
        }
    }

    /// The shared software-timer service.
    pub fn timers(&self) -> &TimerService {
        &self.timers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn advertise_is_idempotent() {
        let runtime = Runtime::new();
        let first = runtime.advertise::<u32>("speed").unwrap();
        let second = runtime.advertise::<u32>("speed").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn topic_type_is_fixed_at_creation() {
        let runtime = Runtime::new();
        runtime.advertise::<u32>("speed").unwrap();
        assert!(matches!(
            runtime.advertise::<f32>("speed"),
            Err(Error::TopicTypeMismatch { .. })
        ));
        // Subscribing with the wrong type is refused the same way.
        assert!(runtime.subscribe::<f32, 4>("speed").is_err());
    }

    #[test]
    fn topic_names_are_validated() {
        let runtime = Runtime::new();
        assert!(matches!(
            runtime.advertise::<u8>(""),
            Err(Error::InvalidTopic(_))
        ));
        let overlong = "x".repeat(MAX_TOPIC_LEN + 1);
        assert!(matches!(
            runtime.advertise::<u8>(&overlong),
            Err(Error::InvalidTopic(_))
        ));
    }

    #[test]
    fn concurrent_advertise_yields_one_publisher() {
        let runtime = Runtime::new();
        let mut publishers = Vec::new();
        thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let runtime = &runtime;
                    scope.spawn(move || runtime.advertise::<u64>("shared").unwrap())
                })
                .collect();
            for handle in handles {
                publishers.push(handle.join().unwrap());
            }
        });
        for publisher in &publishers[1..] {
            assert!(Arc::ptr_eq(&publishers[0], publisher));
        }
    }

    #[test]
    fn removed_topic_starts_fresh() {
        let runtime = Runtime::new();
        let old = runtime.advertise::<u32>("volatile").unwrap();
        assert!(runtime.remove_topic("volatile"));
        assert!(!runtime.remove_topic("volatile"));
        let fresh = runtime.advertise::<u32>("volatile").unwrap();
        assert!(!Arc::ptr_eq(&old, &fresh));
    }
}
