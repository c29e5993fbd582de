//! End-to-end pub/sub behavior across real threads.

use std::thread;
use std::time::Duration;

use taskbus::{Error, QueueSet, Runtime};

#[test]
fn fan_out_with_mixed_subscriber_depths() {
    let runtime = Runtime::new();
    let publisher = runtime.advertise::<u32>("ticks").unwrap();
    let backlog = runtime.subscribe::<u32, 8>("ticks").unwrap();
    let latest = runtime.subscribe::<u32, 1>("ticks").unwrap();

    let producer = thread::spawn(move || {
        for value in 0..5 {
            publisher.publish(value);
            thread::sleep(Duration::from_millis(5));
        }
    });
    producer.join().unwrap();

    // The deep subscriber holds the full history, in order.
    for expected in 0..5 {
        assert_eq!(backlog.try_receive(), Some(expected));
    }
    assert_eq!(backlog.try_receive(), None);

    // The depth-1 subscriber kept only the newest value.
    assert_eq!(latest.backlog(), 1);
    assert_eq!(latest.try_receive(), Some(4));
}

#[test]
fn blocked_receiver_wakes_on_publish() {
    let runtime = Runtime::new();
    let publisher = runtime.advertise::<u64>("wakeups").unwrap();
    let subscriber = runtime.subscribe::<u64, 4>("wakeups").unwrap();

    let receiver = thread::spawn(move || subscriber.receive());
    thread::sleep(Duration::from_millis(50));
    assert_eq!(publisher.publish(99), 1);
    assert_eq!(receiver.join().unwrap(), Some(99));
}

#[test]
fn late_subscriber_misses_earlier_records() {
    let runtime = Runtime::new();
    let publisher = runtime.advertise::<u32>("history").unwrap();
    publisher.publish(1);
    publisher.publish(2);

    let subscriber = runtime.subscribe::<u32, 4>("history").unwrap();
    assert_eq!(subscriber.try_receive(), None);
    publisher.publish(3);
    assert_eq!(subscriber.try_receive(), Some(3));
}

#[test]
fn type_mismatch_is_refused_for_publishers_and_subscribers() {
    let runtime = Runtime::new();
    runtime.advertise::<f32>("setpoint").unwrap();

    assert!(matches!(
        runtime.advertise::<u32>("setpoint"),
        Err(Error::TopicTypeMismatch { .. })
    ));
    assert!(matches!(
        runtime.subscribe::<i16, 2>("setpoint"),
        Err(Error::TopicTypeMismatch { .. })
    ));
    // The original registration is unharmed.
    runtime.advertise::<f32>("setpoint").unwrap();
}

#[test]
fn subscriber_drop_during_active_publishing() {
    let runtime = Runtime::new();
    let publisher = runtime.advertise::<u32>("churn").unwrap();
    let keeper = runtime.subscribe::<u32, 1>("churn").unwrap();
    let transient = runtime.subscribe::<u32, 1>("churn").unwrap();

    let writer = {
        let publisher = publisher.clone();
        thread::spawn(move || {
            for value in 0..200 {
                publisher.publish(value);
                thread::yield_now();
            }
        })
    };
    thread::sleep(Duration::from_millis(2));
    drop(transient);
    writer.join().unwrap();

    assert_eq!(publisher.subscriber_count(), 1);
    assert_eq!(keeper.try_receive(), Some(199));
}

#[test]
fn queue_set_multiplexes_two_topics() {
    let runtime = Runtime::new();
    let speeds = runtime.advertise::<u32>("speed").unwrap();
    let temps = runtime.advertise::<f32>("temp").unwrap();
    let speed_sub = runtime.subscribe::<u32, 4>("speed").unwrap();
    let temp_sub = runtime.subscribe::<f32, 4>("temp").unwrap();

    let set = QueueSet::new();
    assert!(speed_sub.add_to_set(&set));
    assert!(temp_sub.add_to_set(&set));

    let producer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        speeds.publish(120);
        thread::sleep(Duration::from_millis(20));
        temps.publish(21.5);
    });

    let mut got_speed = false;
    let mut got_temp = false;
    for _ in 0..2 {
        let member = set.wait();
        if speed_sub.can_receive(member) {
            assert_eq!(speed_sub.try_receive(), Some(120));
            got_speed = true;
        } else if temp_sub.can_receive(member) {
            assert_eq!(temp_sub.try_receive(), Some(21.5));
            got_temp = true;
        }
    }
    producer.join().unwrap();
    assert!(got_speed && got_temp);
}
