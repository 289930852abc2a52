//! Pluggable clock abstraction: timer creation, absolute-time arming, and
//! a blocking wait for the first fired timer.
//!
//! The queue engine never talks to the operating system directly; it goes
//! through [`Clock`], which abstracts over the host's timer primitives.
//! Two implementations are provided:
//!
//! - [`LinuxClock`]: the production clock, backed by `timerfd` and `epoll`
//!   (Linux only).
//! - [`ManualClock`]: a virtual-time clock for deterministic tests. Time
//!   advances only when told to, so time-dependent behavior can be tested
//!   without waiting for real wall-clock time to pass.
//!
//! # Clock domains
//!
//! Timers are bound to one of two monotonic domains:
//!
//! - [`ClockDomain::AwakeOnly`]: advances only while the host is awake.
//! - [`ClockDomain::WakeFromSuspend`]: keeps advancing during suspend and
//!   can wake the host to deliver an expiry.
//!
//! All absolute times are [`Nanos`] in the awake-only timebase unless a
//! timer was explicitly created in the wake-from-suspend domain.

#[cfg(target_os = "linux")]
mod linux;
mod manual;

use core::fmt;
use std::io;

#[cfg(target_os = "linux")]
pub use linux::LinuxClock;
pub use manual::ManualClock;

/// Absolute time or duration in nanoseconds.
///
/// Deadlines are absolute readings of a domain's monotonic clock. Negative
/// values are reserved for sentinels (e.g. an infinite `wait` timeout).
pub type Nanos = i64;

/// A handle to a timer owned by a [`Clock`].
///
/// Real handles are non-negative, like POSIX file descriptors. Negative
/// values are reserved for the sentinels below, which are disjoint from
/// every real handle.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(i32);

impl Handle {
    /// No handle: the operation failed or the clock is unusable.
    pub const INVALID: Self = Self(-1);
    /// The wait timed out with nothing fired; retry later.
    pub const PENDING: Self = Self(-2);
    /// The wait was interrupted by a signal; retry immediately.
    pub const INTERRUPTED: Self = Self(-3);

    /// Wraps a raw handle value.
    #[must_use]
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// Returns the raw handle value.
    #[must_use]
    pub const fn as_raw(self) -> i32 {
        self.0
    }

    /// Returns true iff this is a real handle rather than a sentinel.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::INVALID => write!(f, "Handle(INVALID)"),
            Self::PENDING => write!(f, "Handle(PENDING)"),
            Self::INTERRUPTED => write!(f, "Handle(INTERRUPTED)"),
            Self(raw) => write!(f, "Handle({raw})"),
        }
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The clock domain a timer is bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClockDomain {
    /// Monotonic time that does not advance while the host is suspended.
    AwakeOnly,
    /// Monotonic time that advances (and can wake the host) during suspend.
    WakeFromSuspend,
}

/// A clock that can create timers, arm them to absolute times, and wait
/// for the first one to fire.
///
/// Implementations must be safe to use from multiple threads: arming
/// happens under the queue lock while `wait` blocks on a different thread
/// outside any lock.
///
/// # Contracts
///
/// - `wait` returns at most one handle per call. If several timers fire
///   together, the clock picks one arbitrarily and leaves the rest
///   observable on the next call. The fired timer is drained: its expiry
///   never causes a later wake without a caller-visible handle.
/// - Arming to 0 disarms. Arming to 1 fires immediately; the queue relies
///   on this to unblock its waiter during shutdown without a separate
///   signalling primitive.
/// - No callback is ever invoked from inside the clock.
pub trait Clock: Send + Sync {
    /// Returns true iff the clock initialized successfully.
    fn ready(&self) -> bool;

    /// Returns the current time in the awake-only monotonic timebase,
    /// the timebase all submitted deadlines use.
    fn now(&self) -> Nanos;

    /// Allocates one timer bound to `domain`.
    ///
    /// Returns [`Handle::INVALID`] on any failure — for example missing
    /// permission for the wake-from-suspend domain.
    fn create_timer(&self, domain: ClockDomain) -> Handle;

    /// Releases a timer. Destroying a handle the clock does not know is
    /// an error.
    fn destroy_timer(&self, handle: Handle) -> io::Result<()>;

    /// Arms `handle` to fire at the absolute time `deadline`, expressed in
    /// the timebase of the timer's domain. A deadline of 0 disarms; a
    /// deadline of 1 fires immediately.
    fn set_timer(&self, handle: Handle, deadline: Nanos) -> io::Result<()>;

    /// Blocks until a timer fires (returning its handle), the timeout
    /// elapses ([`Handle::PENDING`]), an interruption occurs
    /// ([`Handle::INTERRUPTED`]), or a fatal error occurs
    /// ([`Handle::INVALID`]). A negative timeout waits indefinitely.
    fn wait(&self, timeout: Nanos) -> Handle;
}
