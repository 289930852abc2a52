//! The timed execution queue and its dispatcher thread.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tracing::{debug, error, trace};

use super::alarm::AlarmClock;
use super::event::{Event, EventId};
#[cfg(target_os = "linux")]
use crate::clock::LinuxClock;
use crate::clock::{Clock, ClockDomain, Handle, Nanos};

/// Index of the awake-only alarm clock.
const SOFT_SLOT: usize = 0;
/// Index of the wake-from-suspend alarm clock, present in alarm mode only.
const HARD_SLOT: usize = 1;

/// State guarded by the queue mutex.
struct State {
    running: bool,
    next_event_id: i64,
    alarm_clocks: Vec<AlarmClock>,
}

impl State {
    /// Ids start at 1 and wrap from the maximum back to 1, never yielding
    /// the reserved invalid value.
    fn allocate_event_id(&mut self) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = if id == i64::MAX { 1 } else { id + 1 };
        EventId::from_raw(id)
    }
}

struct Shared {
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

/// A timed execution queue for scheduling functions to run at specific
/// times.
///
/// Functions are scheduled against absolute deadlines in the awake-only
/// monotonic timebase (see [`TimerQueue::now`]) and executed by a
/// dedicated dispatcher thread. In alarm mode (`alarm = true`) the queue
/// additionally drives a wake-from-suspend timer, so hard deadlines are
/// honored even while the host sleeps.
///
/// Callbacks run on the dispatcher thread, outside the queue lock. A
/// callback that blocks delays every subsequent event; that is documented
/// behavior, not prevented.
///
/// Dropping the queue acts as mass cancellation: the dispatcher is woken
/// and joined, and events still pending are dropped without being invoked.
///
/// This type is thread-safe.
///
/// # Example
///
/// ```no_run
/// use timerq::TimerQueue;
///
/// let queue = TimerQueue::new(false);
/// assert!(queue.ready());
///
/// let id = queue.add(|| println!("fired"), queue.now() + 20_000_000);
/// assert!(id.is_valid());
/// ```
pub struct TimerQueue {
    shared: Arc<Shared>,
    alarm: bool,
    dispatcher: Option<thread::JoinHandle<()>>,
}

impl TimerQueue {
    /// Creates a queue backed by the production clock.
    ///
    /// With `alarm` set, the queue also drives a wake-from-suspend timer;
    /// creating it needs `CAP_WAKE_ALARM`, and without that permission the
    /// wake-from-suspend domain is unavailable (logged once).
    #[cfg(target_os = "linux")]
    #[must_use]
    pub fn new(alarm: bool) -> Self {
        Self::with_clock(Arc::new(LinuxClock::new()), alarm)
    }

    /// Creates a queue on an injected clock. This is the test seam: with a
    /// [`ManualClock`](crate::ManualClock) the queue's behavior is
    /// deterministic and independent of real time.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>, alarm: bool) -> Self {
        let mut alarm_clocks = vec![AlarmClock::new(&*clock, ClockDomain::AwakeOnly)];
        if alarm {
            alarm_clocks.push(AlarmClock::new(&*clock, ClockDomain::WakeFromSuspend));
        }

        let shared = Arc::new(Shared {
            clock,
            state: Mutex::new(State {
                running: true,
                next_event_id: 1,
                alarm_clocks,
            }),
        });

        let dispatcher = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("timerq-dispatcher".into())
                .spawn(move || dispatch_loop(&shared))
        };
        let dispatcher = match dispatcher {
            Ok(handle) => Some(handle),
            Err(err) => {
                error!(err = %err, "failed to spawn dispatcher thread");
                None
            }
        };

        Self {
            shared,
            alarm,
            dispatcher,
        }
    }

    /// Schedules `function` to run at the absolute time `execution_time`.
    ///
    /// In alarm mode the event is registered against the wake-from-suspend
    /// timer, so the single-deadline form follows the queue's overall
    /// wake-up policy. The returned id cancels the event via
    /// [`remove`](Self::remove); [`EventId::INVALID`] is returned when the
    /// clock is not ready, and no state is mutated.
    pub fn add<F>(&self, function: F, execution_time: Nanos) -> EventId
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.shared.clock.ready() {
            return EventId::INVALID;
        }

        let mut state = self.shared.state.lock();
        let shutting_down = !state.running;
        let id = state.allocate_event_id();
        let event = Arc::new(Event::new(id, execution_time, function));

        let slot = if self.alarm { HARD_SLOT } else { SOFT_SLOT };
        state.alarm_clocks[slot].add(&*self.shared.clock, shutting_down, execution_time, &event);
        id
    }

    /// Schedules `function` to run between `soft_deadline` and
    /// `hard_deadline`.
    ///
    /// The soft deadline lives in the awake-only domain and will not
    /// trigger while the host is suspended; the hard deadline lives in the
    /// wake-from-suspend domain and will. The event fires exactly once,
    /// whichever deadline is observed first. Without alarm mode the hard
    /// deadline is ignored and only the soft registration is made.
    ///
    /// `priority_time` orders events that become due in the same dispatch
    /// pass (lower runs first); a negative value defaults it to
    /// `hard_deadline`.
    pub fn add_with_deadlines<F>(
        &self,
        function: F,
        soft_deadline: Nanos,
        hard_deadline: Nanos,
        priority_time: Nanos,
    ) -> EventId
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.shared.clock.ready() {
            return EventId::INVALID;
        }

        let mut state = self.shared.state.lock();
        let shutting_down = !state.running;
        let id = state.allocate_event_id();
        let priority = if priority_time >= 0 {
            priority_time
        } else {
            hard_deadline
        };
        let event = Arc::new(Event::new(id, priority, function));

        state.alarm_clocks[SOFT_SLOT].add(
            &*self.shared.clock,
            shutting_down,
            soft_deadline,
            &event,
        );
        if self.alarm {
            state.alarm_clocks[HARD_SLOT].add(
                &*self.shared.clock,
                shutting_down,
                hard_deadline,
                &event,
            );
        }
        id
    }

    /// Cancels a pending event.
    ///
    /// Returns true iff the event was found and removed before execution.
    /// An event that has already started executing (or finished, or was
    /// never scheduled) is no longer held by any alarm clock and yields
    /// false; after a true return the callback is guaranteed never to run.
    pub fn remove(&self, id: EventId) -> bool {
        if !self.shared.clock.ready() || !id.is_valid() {
            return false;
        }

        // Check every alarm clock: an id can be registered in more than one.
        let mut state = self.shared.state.lock();
        let shutting_down = !state.running;
        let mut found = false;
        for alarm_clock in &mut state.alarm_clocks {
            if alarm_clock.remove(&*self.shared.clock, shutting_down, id) {
                found = true;
            }
        }
        found
    }

    /// Returns true if the underlying clock initialized successfully.
    #[must_use]
    pub fn ready(&self) -> bool {
        self.shared.clock.ready()
    }

    /// Returns true if the queue was configured to wake from suspend.
    #[must_use]
    pub const fn alarm(&self) -> bool {
        self.alarm
    }

    /// Returns the current time in the timebase deadlines are expressed
    /// in (the awake-only monotonic clock).
    #[must_use]
    pub fn now(&self) -> Nanos {
        self.shared.clock.now()
    }
}

impl Drop for TimerQueue {
    fn drop(&mut self) {
        if self.shared.clock.ready() {
            let mut state = self.shared.state.lock();
            state.running = false;
            // Fire every timer immediately to unblock the waiter.
            for alarm_clock in &state.alarm_clocks {
                alarm_clock.arm_timer_for_next_event(&*self.shared.clock, true);
            }
        }

        if let Some(dispatcher) = self.dispatcher.take() {
            if dispatcher.join().is_err() {
                error!("dispatcher thread panicked");
            }
        }

        let mut state = self.shared.state.lock();
        for alarm_clock in &mut state.alarm_clocks {
            alarm_clock.destroy(&*self.shared.clock);
        }
    }
}

/// One pass per wakeup: collect everything due across all alarm clocks,
/// deduplicate, erase sibling registrations, then execute in ascending
/// (priority, id) order outside the lock.
fn dispatch_loop(shared: &Shared) {
    loop {
        let handle = shared.clock.wait(-1);
        trace!(%handle, "dispatcher woke");

        if handle == Handle::INVALID {
            break;
        }
        if handle == Handle::PENDING || handle == Handle::INTERRUPTED {
            continue;
        }

        let mut due = BTreeMap::new();
        {
            let mut state = shared.state.lock();
            if !state.running {
                break;
            }

            let now = shared.clock.now();
            for alarm_clock in &mut state.alarm_clocks {
                alarm_clock.collect_events(&*shared.clock, false, now, &mut due);
            }
            // An event registered on multiple alarms must not execute twice.
            for alarm_clock in &mut state.alarm_clocks {
                alarm_clock.remove_events(&*shared.clock, false, &due);
            }
        }

        let mut batch: Vec<Arc<Event>> = due.into_values().collect();
        batch.sort_by_key(|event| (event.priority_time(), event.id()));
        for event in batch {
            trace!(id = %event.id(), "executing event");
            event.invoke();
        }
    }
    debug!("dispatcher exiting");
}
