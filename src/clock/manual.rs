//! Virtual-time clock for deterministic tests.

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::{Clock, ClockDomain, Handle, Nanos};

/// State of one virtual timer.
#[derive(Debug, Clone, Copy)]
struct TimerSlot {
    domain: ClockDomain,
    /// Absolute deadline; 0 means disarmed.
    deadline: Nanos,
}

#[derive(Debug)]
struct State {
    now: Nanos,
    next_handle: i32,
    timers: BTreeMap<Handle, TimerSlot>,
    /// Results handed out by `wait` ahead of any due timer.
    injected: VecDeque<Handle>,
}

/// A [`Clock`] whose time only advances when explicitly told to.
///
/// `wait` blocks on a condition variable until an armed timer becomes due,
/// so a queue running against this clock behaves exactly as in production
/// while the test controls the flow of time through [`advance`] and
/// [`advance_to`].
///
/// Time starts at one second past the epoch by default. Arming a timer to
/// 1 fires it immediately regardless of the virtual time, per the
/// [`Clock`] contract.
///
/// # Example
///
/// ```
/// use timerq::{Clock, ClockDomain, ManualClock};
///
/// let clock = ManualClock::new();
/// let timer = clock.create_timer(ClockDomain::AwakeOnly);
/// clock.set_timer(timer, clock.now() + 1_000).unwrap();
///
/// // Nothing is due yet.
/// assert_eq!(clock.wait(0), timerq::Handle::PENDING);
///
/// clock.advance(1_000);
/// assert_eq!(clock.wait(0), timer);
/// ```
///
/// [`advance`]: ManualClock::advance
/// [`advance_to`]: ManualClock::advance_to
#[derive(Debug)]
pub struct ManualClock {
    state: Mutex<State>,
    fired: Condvar,
}

impl ManualClock {
    const DEFAULT_ORIGIN: Nanos = 1_000_000_000;

    /// Creates a clock starting at one second past the epoch.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(Self::DEFAULT_ORIGIN)
    }

    /// Creates a clock starting at the given time.
    #[must_use]
    pub fn starting_at(origin: Nanos) -> Self {
        Self {
            state: Mutex::new(State {
                now: origin,
                next_handle: 1,
                timers: BTreeMap::new(),
                injected: VecDeque::new(),
            }),
            fired: Condvar::new(),
        }
    }

    /// Advances time by `delta` nanoseconds and wakes any waiter.
    ///
    /// Non-positive deltas are ignored.
    pub fn advance(&self, delta: Nanos) {
        if delta <= 0 {
            return;
        }
        let mut state = self.state.lock();
        state.now = state.now.saturating_add(delta);
        self.fired.notify_all();
    }

    /// Advances time to the absolute time `target`, if it is in the future.
    pub fn advance_to(&self, target: Nanos) {
        let mut state = self.state.lock();
        if target > state.now {
            state.now = target;
            self.fired.notify_all();
        }
    }

    /// Queues a result to be handed out by the next `wait` call, ahead of
    /// any due timer. Used to exercise the sentinel paths
    /// ([`Handle::PENDING`], [`Handle::INTERRUPTED`]) of a waiter.
    pub fn inject(&self, result: Handle) {
        let mut state = self.state.lock();
        state.injected.push_back(result);
        self.fired.notify_all();
    }

    /// Returns the deadline `handle` is currently armed to, or `None` if
    /// the timer is disarmed or unknown.
    #[must_use]
    pub fn armed_deadline(&self, handle: Handle) -> Option<Nanos> {
        let state = self.state.lock();
        let slot = state.timers.get(&handle)?;
        (slot.deadline != 0).then_some(slot.deadline)
    }

    /// Returns the domain `handle` was created in, or `None` if unknown.
    #[must_use]
    pub fn timer_domain(&self, handle: Handle) -> Option<ClockDomain> {
        self.state.lock().timers.get(&handle).map(|slot| slot.domain)
    }

    /// Returns the number of live timers.
    #[must_use]
    pub fn timer_count(&self) -> usize {
        self.state.lock().timers.len()
    }

    /// Consumes the earliest due arming, if any. Ties on deadline resolve
    /// to the lowest handle for determinism. A deadline of 1 is due
    /// unconditionally, honoring the fire-immediately convention even when
    /// the virtual clock sits at an earlier instant.
    fn take_due(state: &mut State) -> Option<Handle> {
        let mut best: Option<(Nanos, Handle)> = None;
        for (&handle, slot) in &state.timers {
            if slot.deadline == 1 || (slot.deadline > 0 && slot.deadline <= state.now) {
                let candidate = (slot.deadline, handle);
                if best.map_or(true, |current| candidate < current) {
                    best = Some(candidate);
                }
            }
        }
        let (_, handle) = best?;
        if let Some(slot) = state.timers.get_mut(&handle) {
            slot.deadline = 0;
        }
        Some(handle)
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn ready(&self) -> bool {
        true
    }

    fn now(&self) -> Nanos {
        self.state.lock().now
    }

    fn create_timer(&self, domain: ClockDomain) -> Handle {
        let mut state = self.state.lock();
        let handle = Handle::from_raw(state.next_handle);
        state.next_handle += 1;
        state.timers.insert(
            handle,
            TimerSlot {
                domain,
                deadline: 0,
            },
        );
        handle
    }

    fn destroy_timer(&self, handle: Handle) -> io::Result<()> {
        let mut state = self.state.lock();
        if state.timers.remove(&handle).is_none() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unknown timer handle",
            ));
        }
        Ok(())
    }

    fn set_timer(&self, handle: Handle, deadline: Nanos) -> io::Result<()> {
        let mut state = self.state.lock();
        let Some(slot) = state.timers.get_mut(&handle) else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unknown timer handle",
            ));
        };
        // Non-positive deadlines disarm, as they do for a timerfd.
        slot.deadline = deadline.max(0);
        self.fired.notify_all();
        Ok(())
    }

    fn wait(&self, timeout: Nanos) -> Handle {
        let start = Instant::now();
        let mut state = self.state.lock();
        loop {
            if let Some(result) = state.injected.pop_front() {
                return result;
            }
            if let Some(handle) = Self::take_due(&mut state) {
                return handle;
            }
            if timeout < 0 {
                self.fired.wait(&mut state);
            } else {
                let budget = Duration::from_nanos(timeout.unsigned_abs());
                let Some(remaining) = budget.checked_sub(start.elapsed()) else {
                    return Handle::PENDING;
                };
                if remaining.is_zero() {
                    return Handle::PENDING;
                }
                let _ = self.fired.wait_for(&mut state, remaining);
            }
        }
    }
}
