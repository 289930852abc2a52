//! Timer queue benchmarks.
//!
//! These measure the lock-held portions of the public API:
//! - Scheduling (id allocation + double-index insert + re-arm)
//! - Cancellation (double-index erase + re-arm)
//! - A full dispatch pass over a batch of simultaneously due events,
//!   driven through `ManualClock` so no real waiting is involved.

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use std::sync::{mpsc, Arc};

use timerq::{Clock, ManualClock, Nanos, TimerQueue};

const FAR: Nanos = 3_600_000_000_000; // one hour, never reached

fn manual_queue() -> (Arc<ManualClock>, TimerQueue) {
    let clock = Arc::new(ManualClock::new());
    let queue = TimerQueue::with_clock(Arc::clone(&clock) as Arc<dyn Clock>, false);
    (clock, queue)
}

// =============================================================================
// SCHEDULING BENCHMARKS
// =============================================================================

fn bench_schedule(c: &mut Criterion) {
    let mut group = c.benchmark_group("timer_queue/schedule");

    // Add then immediately cancel, so the index size stays constant.
    group.bench_function("add_remove", |b| {
        let (clock, queue) = manual_queue();
        let due = clock.now() + FAR;
        b.iter(|| {
            let id = queue.add(|| {}, black_box(due));
            queue.remove(id);
        });
    });

    // Burst of inserts with distinct deadlines into a fresh queue.
    group.throughput(Throughput::Elements(1_000));
    group.bench_function("add_burst_1000", |b| {
        b.iter_batched(
            manual_queue,
            |(clock, queue)| {
                let t0 = clock.now() + FAR;
                for i in 0..1_000 {
                    queue.add(|| {}, t0 + i);
                }
                (clock, queue)
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

// =============================================================================
// DISPATCH BENCHMARKS
// =============================================================================

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("timer_queue/dispatch");

    // One collection pass over 100 events due at the same instant,
    // measured from time advance to the last callback completing.
    group.throughput(Throughput::Elements(100));
    group.bench_function("pass_100", |b| {
        b.iter_batched(
            || {
                let (clock, queue) = manual_queue();
                let (tx, rx) = mpsc::channel();
                let due = clock.now() + 1_000_000;
                for _ in 0..100 {
                    let tx = tx.clone();
                    queue.add(
                        move || {
                            let _ = tx.send(());
                        },
                        due,
                    );
                }
                (clock, queue, rx)
            },
            |(clock, queue, rx)| {
                clock.advance(1_000_000);
                for _ in 0..100 {
                    rx.recv().unwrap();
                }
                (clock, queue, rx)
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_schedule, bench_dispatch);
criterion_main!(benches);
