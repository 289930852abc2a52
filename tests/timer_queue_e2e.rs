//! End-to-end scenarios against the production clock.
//!
//! These run on real time with real timerfds, so waits are bounded by
//! generous budgets rather than exact instants; the deterministic mirrors
//! of the same behaviors live in the in-module unit tests, driven by
//! `ManualClock`.

#![cfg(target_os = "linux")]
#![allow(missing_docs)]

mod common;

use common::init_test_logging;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::sleep;
use std::time::Duration;

use timerq::{EventId, TimerQueue};

const MILLI: i64 = 1_000_000;
const RECV_BUDGET: Duration = Duration::from_secs(2);

#[test]
fn add_and_execute() {
    init_test_logging();
    let queue = TimerQueue::new(false);
    assert!(queue.ready());

    let (tx, rx) = mpsc::channel();
    let id = queue.add(move || tx.send(()).unwrap(), queue.now() + 20 * MILLI);
    assert!(id.is_valid());

    rx.recv_timeout(RECV_BUDGET).expect("event did not fire");
    // The callback consumed the sender; nothing else may arrive.
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
}

#[test]
fn remove_before_fire() {
    init_test_logging();
    let queue = TimerQueue::new(false);
    assert!(queue.ready());

    let executed = Arc::new(AtomicBool::new(false));
    let id = {
        let executed = Arc::clone(&executed);
        queue.add(
            move || executed.store(true, Ordering::SeqCst),
            queue.now() + 50 * MILLI,
        )
    };
    assert!(id.is_valid());
    assert!(queue.remove(id));

    sleep(Duration::from_millis(100));
    assert!(!executed.load(Ordering::SeqCst));
}

#[test]
fn multiple_events_fire_in_deadline_order() {
    init_test_logging();
    let queue = TimerQueue::new(false);
    assert!(queue.ready());

    let (tx, rx) = mpsc::channel();
    let t0 = queue.now();
    for (label, offset) in [(1, 40), (2, 20), (3, 60)] {
        let tx = tx.clone();
        queue.add(move || tx.send(label).unwrap(), t0 + offset * MILLI);
    }

    let order: Vec<i32> = (0..3)
        .map(|_| rx.recv_timeout(RECV_BUDGET).expect("event did not fire"))
        .collect();
    assert_eq!(order, vec![2, 1, 3]);
}

#[test]
fn drop_silences_pending_events() {
    init_test_logging();
    let executed = Arc::new(AtomicBool::new(false));
    {
        let queue = TimerQueue::new(false);
        assert!(queue.ready());
        let executed = Arc::clone(&executed);
        queue.add(
            move || executed.store(true, Ordering::SeqCst),
            queue.now() + 50 * MILLI,
        );
    } // queue is destroyed here

    sleep(Duration::from_millis(100));
    assert!(!executed.load(Ordering::SeqCst));
}

#[test]
fn remove_invalid_ids() {
    init_test_logging();
    let queue = TimerQueue::new(false);
    assert!(queue.ready());
    assert!(!queue.remove(EventId::from_raw(12_345)));
    assert!(!queue.remove(EventId::INVALID));
}

#[test]
fn accessors_report_configuration() {
    init_test_logging();
    let queue = TimerQueue::new(false);
    assert!(queue.ready());
    assert!(!queue.alarm());
    assert!(queue.now() > 0);

    // Alarm mode is a construction-time property; whether the
    // wake-from-suspend timer itself is usable depends on CAP_WAKE_ALARM.
    let alarm_queue = TimerQueue::new(true);
    assert!(alarm_queue.alarm());
}

#[test]
fn priority_orders_a_shared_deadline() {
    init_test_logging();
    let queue = TimerQueue::new(false);
    assert!(queue.ready());

    let (tx, rx) = mpsc::channel();
    let due = queue.now() + 100 * MILLI;
    for priority in (1..=8i64).rev() {
        let tx = tx.clone();
        queue.add_with_deadlines(move || tx.send(priority).unwrap(), due, due, priority);
    }

    let order: Vec<i64> = (0..8)
        .map(|_| rx.recv_timeout(RECV_BUDGET).expect("event did not fire"))
        .collect();
    assert_eq!(order, (1..=8).collect::<Vec<_>>());
}
