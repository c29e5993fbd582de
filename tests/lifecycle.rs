//! Task lifecycle and directory behavior.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use taskbus::{Error, Runtime, Task, TaskContext, TaskState};

#[test]
fn stop_waits_for_the_inflight_iteration() {
    let mid_run = Arc::new(AtomicBool::new(false));
    let finished_cleanly = Arc::new(AtomicBool::new(false));
    let task = {
        let mid_run = Arc::clone(&mid_run);
        let finished = Arc::clone(&finished_cleanly);
        Task::new(move |ctx: &TaskContext| {
            mid_run.store(true, Ordering::SeqCst);
            ctx.sleep(Duration::from_millis(80));
            finished.store(true, Ordering::SeqCst);
            true
        })
    };
    let handle = task.start(1, "worker").unwrap();

    while !mid_run.load(Ordering::SeqCst) {
        thread::yield_now();
    }
    // Stop lands mid-iteration; the join must wait for `run` to return.
    assert!(handle.stop());
    assert!(finished_cleanly.load(Ordering::SeqCst));
    assert_eq!(handle.state(), TaskState::Terminated);
}

#[test]
fn stop_interrupts_a_parked_wait() {
    let task = Task::new(|ctx: &TaskContext| ctx.wait());
    let handle = task.start(1, "parked").unwrap();
    thread::sleep(Duration::from_millis(50));

    let start = Instant::now();
    assert!(handle.stop());
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(handle.state(), TaskState::Terminated);
}

#[test]
fn concurrent_stops_all_complete() {
    let task = Arc::new(Task::new(|ctx: &TaskContext| {
        ctx.sleep(Duration::from_millis(10));
        true
    }));
    let handle = task.start(1, "contested").unwrap();
    thread::sleep(Duration::from_millis(30));

    let stoppers: Vec<_> = (0..3)
        .map(|_| {
            let handle = handle.clone();
            thread::spawn(move || handle.stop())
        })
        .collect();
    for stopper in stoppers {
        assert!(stopper.join().unwrap());
    }
    assert_eq!(handle.state(), TaskState::Terminated);
    let _ = task;
}

#[test]
fn notification_wakes_a_parked_task() {
    let wakeups = Arc::new(AtomicU32::new(0));
    let task = {
        let wakeups = Arc::clone(&wakeups);
        Task::new(move |ctx: &TaskContext| {
            if ctx.wait() {
                wakeups.fetch_add(1, Ordering::SeqCst);
            }
            true
        })
    };
    let handle = task.start(1, "sleeper").unwrap();
    thread::sleep(Duration::from_millis(30));

    handle.post();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(wakeups.load(Ordering::SeqCst), 1);
    assert!(task.stop());
}

#[test]
fn directory_registers_and_looks_up_tasks() {
    let runtime = Runtime::new();
    let task = Task::new(|ctx: &TaskContext| {
        ctx.sleep(Duration::from_millis(5));
        true
    });
    let handle = task.start(2, "pump").unwrap();
    runtime.register_task(handle.clone()).unwrap();

    assert!(matches!(
        runtime.register_task(handle.clone()),
        Err(Error::TaskAlreadyRegistered(_))
    ));

    let found = runtime.task("pump").expect("registered task");
    assert_eq!(found.name(), "pump");
    assert_eq!(found.priority(), 2);
    assert!(found.is_running());
    assert!(runtime.task("missing").is_none());

    assert!(task.stop());
    assert!(runtime.remove_task("pump"));
    assert!(!runtime.remove_task("pump"));
}

#[test]
fn stop_all_except_spares_the_supervisor() {
    let runtime = Runtime::new();

    let worker_a = Task::new(|ctx: &TaskContext| {
        ctx.sleep(Duration::from_millis(5));
        true
    });
    let worker_b = Task::new(|ctx: &TaskContext| ctx.wait());
    let supervisor = Task::new(|ctx: &TaskContext| {
        ctx.sleep(Duration::from_millis(5));
        true
    });

    runtime.register_task(worker_a.start(1, "worker-a").unwrap()).unwrap();
    runtime.register_task(worker_b.start(1, "worker-b").unwrap()).unwrap();
    let boss = supervisor.start(3, "supervisor").unwrap();
    runtime.register_task(boss.clone()).unwrap();

    runtime.stop_all_except("supervisor");

    assert_eq!(runtime.task("worker-a").unwrap().state(), TaskState::Terminated);
    assert_eq!(runtime.task("worker-b").unwrap().state(), TaskState::Terminated);
    assert!(boss.is_running());
    assert!(supervisor.stop());
}
