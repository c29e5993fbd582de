//! Interrupt-context rules: never block, defer the yield.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use taskbus::context::with_interrupt_context;
use taskbus::{Queue, Runtime, Semaphore};

#[test]
fn isr_push_that_wakes_a_task_requests_a_yield() {
    let queue = Arc::new(Queue::<u8, 4>::new());
    let consumer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || queue.pop())
    };
    thread::sleep(Duration::from_millis(50));

    let (pushed, yielded) = with_interrupt_context(|| queue.push(7));
    assert!(pushed);
    assert!(yielded, "waking a blocked task must request a deferred yield");
    assert_eq!(consumer.join().unwrap(), Some(7));
}

#[test]
fn isr_push_without_a_waiter_does_not_yield() {
    let queue: Queue<u8, 4> = Queue::new();
    let (pushed, yielded) = with_interrupt_context(|| queue.push(1));
    assert!(pushed);
    assert!(!yielded);
}

#[test]
fn isr_operations_never_block() {
    let queue: Queue<u8, 1> = Queue::new();
    assert!(queue.try_push(1));

    let start = Instant::now();
    let (results, _) = with_interrupt_context(|| {
        // Full queue: a "blocking" push degrades to an immediate refusal.
        let push_failed = !queue.push(2);
        // Drain it, then a "blocking" pop returns empty-handed at once.
        let drained = queue.pop();
        let pop_empty = queue.pop();
        (push_failed, drained, pop_empty)
    });
    assert!(start.elapsed() < Duration::from_millis(50));
    assert_eq!(results, (true, Some(1), None));
}

#[test]
fn isr_semaphore_post_wakes_waiter_and_yields() {
    let semaphore = Arc::new(Semaphore::binary());
    let waiter = {
        let semaphore = Arc::clone(&semaphore);
        thread::spawn(move || semaphore.wait())
    };
    thread::sleep(Duration::from_millis(50));

    let (posted, yielded) = with_interrupt_context(|| semaphore.post());
    assert!(posted);
    assert!(yielded);
    assert!(waiter.join().unwrap());
}

#[test]
fn publishing_from_isr_wakes_a_blocked_subscriber() {
    let runtime = Runtime::new();
    let publisher = runtime.advertise::<u32>("alarm").unwrap();
    let subscriber = runtime.subscribe::<u32, 4>("alarm").unwrap();

    let receiver = thread::spawn(move || subscriber.receive());
    thread::sleep(Duration::from_millis(50));

    let (delivered, yielded) = with_interrupt_context(|| publisher.publish(13));
    assert_eq!(delivered, 1);
    assert!(yielded);
    assert_eq!(receiver.join().unwrap(), Some(13));
}

#[test]
fn yield_flag_resets_between_interrupt_scopes() {
    let queue = Arc::new(Queue::<u8, 4>::new());
    let consumer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || queue.pop())
    };
    thread::sleep(Duration::from_millis(50));

    let (_, yielded) = with_interrupt_context(|| queue.push(1));
    assert!(yielded);

    // The earlier wakeup must not leak into an uneventful scope.
    let ((), yielded) = with_interrupt_context(|| {});
    assert!(!yielded);
    assert_eq!(consumer.join().unwrap(), Some(1));
}
