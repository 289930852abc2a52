//! Event identity and the shared scheduled work item.

use core::fmt;

use parking_lot::Mutex;

use crate::clock::Nanos;

/// A unique identifier for a scheduled event.
///
/// Returned by [`TimerQueue::add`](crate::TimerQueue::add) and accepted by
/// [`TimerQueue::remove`](crate::TimerQueue::remove). Valid ids are
/// strictly positive; [`EventId::INVALID`] reports a failed submission.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(i64);

impl EventId {
    /// The reserved id reported when a submission is rejected.
    pub const INVALID: Self = Self(-1);

    /// Wraps a raw id value.
    #[must_use]
    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_raw(self) -> i64 {
        self.0
    }

    /// Returns true iff this is a real id rather than [`EventId::INVALID`].
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 > 0
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "EventId({})", self.0)
        } else {
            write!(f, "EventId(INVALID)")
        }
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{}", self.0)
    }
}

/// A scheduled unit of work, shared between the alarm clocks that hold it
/// and the transient in-flight set built during a dispatch pass.
///
/// The callback is taken out exactly once; a second `invoke` on the same
/// event is a no-op. That makes at-most-once execution structural rather
/// than a property of careful bookkeeping alone.
pub(crate) struct Event {
    id: EventId,
    priority_time: Nanos,
    function: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Event {
    pub(crate) fn new<F>(id: EventId, priority_time: Nanos, function: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            id,
            priority_time,
            function: Mutex::new(Some(Box::new(function))),
        }
    }

    pub(crate) const fn id(&self) -> EventId {
        self.id
    }

    pub(crate) const fn priority_time(&self) -> Nanos {
        self.priority_time
    }

    /// Runs the callback if it has not run yet. The internal lock is
    /// released before the callback executes.
    pub(crate) fn invoke(&self) {
        let function = self.function.lock().take();
        if let Some(function) = function {
            function();
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.id)
            .field("priority_time", &self.priority_time)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn invalid_id_is_not_valid() {
        assert!(!EventId::INVALID.is_valid());
        assert!(!EventId::from_raw(0).is_valid());
        assert!(EventId::from_raw(1).is_valid());
    }

    #[test]
    fn id_formatting() {
        assert_eq!(format!("{:?}", EventId::from_raw(7)), "EventId(7)");
        assert_eq!(format!("{:?}", EventId::INVALID), "EventId(INVALID)");
        assert_eq!(format!("{}", EventId::from_raw(7)), "E7");
    }

    #[test]
    fn invoke_runs_at_most_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let event = {
            let count = Arc::clone(&count);
            Event::new(EventId::from_raw(1), 0, move || {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        event.invoke();
        event.invoke();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
