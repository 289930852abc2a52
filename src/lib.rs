//! Timerq: a thread-safe timed execution queue with dual-deadline
//! scheduling and pluggable clocks.
//!
//! # Overview
//!
//! A [`TimerQueue`] accepts no-argument callbacks to run at caller-supplied
//! absolute times and executes them on a dedicated dispatcher thread. Each
//! event can carry two deadlines: a *soft* deadline honored only while the
//! host is awake, and a *hard* deadline honored even across system suspend
//! (when the queue is constructed in alarm mode). An event registered
//! against both deadlines fires exactly once, whichever is observed first.
//! Events that become due together execute in ascending priority order,
//! with ties broken deterministically by id.
//!
//! The queue never talks to the operating system directly: all timer
//! primitives sit behind the [`Clock`] trait. Production code uses
//! [`LinuxClock`] (`timerfd` + `epoll`); tests inject [`ManualClock`],
//! whose time advances only when told to, making time-dependent behavior
//! fully deterministic.
//!
//! # Guarantees
//!
//! - **At-most-once**: a callback runs at most once, no matter how many
//!   timer sources the event was registered with.
//! - **Post-cancel silence**: once [`TimerQueue::remove`] returns true,
//!   the callback never runs.
//! - **Teardown silence**: dropping the queue joins the dispatcher and
//!   discards pending events without invoking them.
//! - **Deterministic dispatch order**: within one dispatch pass, events
//!   run in ascending `(priority, id)` order.
//!
//! # Example
//!
//! ```no_run
//! use timerq::TimerQueue;
//!
//! let queue = TimerQueue::new(false);
//! assert!(queue.ready());
//!
//! // Run 20 ms from now.
//! let id = queue.add(|| println!("fired"), queue.now() + 20_000_000);
//!
//! // Changed our mind: cancel before it fires.
//! if queue.remove(id) {
//!     println!("cancelled before execution");
//! }
//! ```
//!
//! # Caveats
//!
//! Callbacks run on the dispatcher thread. A callback that blocks delays
//! every subsequent event; this is documented rather than prevented. There
//! are no real-time guarantees and no persistence across process restart.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]

pub mod clock;
pub mod queue;

#[cfg(target_os = "linux")]
pub use clock::LinuxClock;
pub use clock::{Clock, ClockDomain, Handle, ManualClock, Nanos};
pub use queue::{EventId, TimerQueue};
