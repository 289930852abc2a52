//! Per-domain pending-event index and timer arming discipline.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, error};

use super::event::{Event, EventId};
use crate::clock::{Clock, ClockDomain, Handle, Nanos};

/// One clock domain's pending events plus its single underlying timer.
///
/// Not synchronized on its own: every method is called with the queue
/// lock held. The queue's shutdown state and the clock are passed in
/// explicitly rather than held as back-references.
///
/// Two indexes are kept mutually consistent: the id map for cancellation
/// and an ordered (deadline, id) set for earliest-deadline lookup. After
/// every mutation the underlying timer is re-armed to the earliest held
/// deadline, disarmed when empty, or armed to fire immediately when the
/// queue is shutting down.
pub(crate) struct AlarmClock {
    domain: ClockDomain,
    timer: Handle,
    events: BTreeMap<EventId, (Arc<Event>, Nanos)>,
    deadlines: BTreeSet<(Nanos, EventId)>,
}

impl AlarmClock {
    pub(crate) fn new(clock: &dyn Clock, domain: ClockDomain) -> Self {
        let timer = clock.create_timer(domain);
        if !timer.is_valid() {
            // Arming becomes a no-op for this domain; dual registrations
            // are still honored by the sibling clock.
            error!(?domain, "failed to create timer, domain unavailable");
        }
        Self {
            domain,
            timer,
            events: BTreeMap::new(),
            deadlines: BTreeSet::new(),
        }
    }

    /// Inserts `event` under `deadline`, re-arming the timer when the new
    /// deadline becomes the earliest held.
    pub(crate) fn add(
        &mut self,
        clock: &dyn Clock,
        shutting_down: bool,
        deadline: Nanos,
        event: &Arc<Event>,
    ) {
        let needs_reschedule = self
            .deadlines
            .first()
            .map_or(true, |&(head, _)| deadline < head);

        self.events.insert(event.id(), (Arc::clone(event), deadline));
        self.deadlines.insert((deadline, event.id()));

        if needs_reschedule {
            self.arm_timer_for_next_event(clock, shutting_down);
        }
    }

    /// Erases `id` from both indexes. Returns true iff it was held.
    ///
    /// Removing the head entry re-arms the timer; removing any other entry
    /// leaves the armed timer unchanged. The last reference to the event
    /// may be dropped here, under the queue lock.
    pub(crate) fn remove(&mut self, clock: &dyn Clock, shutting_down: bool, id: EventId) -> bool {
        if !id.is_valid() {
            return false;
        }
        let Some((_, deadline)) = self.events.remove(&id) else {
            return false;
        };

        let key = (deadline, id);
        let was_next = self.deadlines.first() == Some(&key);
        self.deadlines.remove(&key);

        if was_next {
            self.arm_timer_for_next_event(clock, shutting_down);
        }
        true
    }

    /// Moves every event with a deadline `<= now` into `out`, keyed by id
    /// so an event registered with both alarm clocks collapses to a single
    /// entry, then re-arms.
    pub(crate) fn collect_events(
        &mut self,
        clock: &dyn Clock,
        shutting_down: bool,
        now: Nanos,
        out: &mut BTreeMap<EventId, Arc<Event>>,
    ) {
        while let Some(&(deadline, id)) = self.deadlines.first() {
            if deadline > now {
                break;
            }
            self.deadlines.pop_first();
            if let Some((event, _)) = self.events.remove(&id) {
                out.insert(id, event);
            }
        }
        self.arm_timer_for_next_event(clock, shutting_down);
    }

    /// Erases any remaining registration of the given events. Called after
    /// a collection pass so a sibling registration cannot fire a second
    /// time.
    pub(crate) fn remove_events(
        &mut self,
        clock: &dyn Clock,
        shutting_down: bool,
        events: &BTreeMap<EventId, Arc<Event>>,
    ) {
        for &id in events.keys() {
            self.remove(clock, shutting_down, id);
        }
    }

    /// Arms the underlying timer: immediately when shutting down, to the
    /// earliest held deadline otherwise, or disarms when empty.
    pub(crate) fn arm_timer_for_next_event(&self, clock: &dyn Clock, shutting_down: bool) {
        if !self.timer.is_valid() {
            return;
        }
        let next = if shutting_down {
            1
        } else {
            self.deadlines.first().map_or(0, |&(deadline, _)| deadline)
        };
        if let Err(err) = clock.set_timer(self.timer, next) {
            error!(
                domain = ?self.domain,
                handle = %self.timer,
                err = %err,
                "failed to arm timer"
            );
        }
    }

    /// Releases the underlying timer. Called once during queue teardown.
    pub(crate) fn destroy(&mut self, clock: &dyn Clock) {
        if !self.timer.is_valid() {
            return;
        }
        if let Err(err) = clock.destroy_timer(self.timer) {
            debug!(domain = ?self.domain, err = %err, "failed to destroy timer");
        }
        self.timer = Handle::INVALID;
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.events.len()
    }
}
