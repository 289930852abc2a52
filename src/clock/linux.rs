//! Production clock backed by `timerfd` and `epoll`.
//!
//! Each timer is a one-shot `timerfd` registered with a single epoll
//! instance. Waiting is one `epoll_wait` for at most one event; the fired
//! timerfd is drained before its handle is returned so a consumed expiry
//! can never cause a spurious wake later.

#![allow(unsafe_code)]

use std::collections::HashSet;
use std::io;
use std::mem;
use std::ptr;

use parking_lot::Mutex;
use tracing::{error, trace};

use super::{Clock, ClockDomain, Handle, Nanos};

const NANOS_PER_SEC: Nanos = 1_000_000_000;
const NANOS_PER_MILLI: Nanos = 1_000_000;

/// The Linux [`Clock`]: `CLOCK_BOOTTIME` / `CLOCK_BOOTTIME_ALARM` timerfds
/// multiplexed through one epoll instance.
///
/// Creating a wake-from-suspend timer requires `CAP_WAKE_ALARM`; without
/// it `create_timer` returns [`Handle::INVALID`], which the queue treats
/// as that domain being unavailable. Timer fds are registered with
/// `EPOLLWAKEUP` so a pending dispatch holds off suspend; the kernel
/// silently ignores that flag without `CAP_BLOCK_SUSPEND`.
#[derive(Debug)]
pub struct LinuxClock {
    poll_fd: libc::c_int,
    timers: Mutex<HashSet<libc::c_int>>,
}

impl LinuxClock {
    /// Creates the clock. Failure to create the epoll instance is logged
    /// and leaves the clock in the not-[`ready`](Clock::ready) state.
    #[must_use]
    pub fn new() -> Self {
        let poll_fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if poll_fd < 0 {
            error!(
                err = %io::Error::last_os_error(),
                "failed to create epoll instance"
            );
        }
        Self {
            poll_fd,
            timers: Mutex::new(HashSet::new()),
        }
    }
}

impl Default for LinuxClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for LinuxClock {
    fn ready(&self) -> bool {
        self.poll_fd >= 0
    }

    fn now(&self) -> Nanos {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        let rc = unsafe { libc::clock_gettime(libc::CLOCK_BOOTTIME, &mut ts) };
        if rc != 0 {
            error!(err = %io::Error::last_os_error(), "clock_gettime failed");
            return 0;
        }
        (ts.tv_sec as Nanos) * NANOS_PER_SEC + (ts.tv_nsec as Nanos)
    }

    fn create_timer(&self, domain: ClockDomain) -> Handle {
        if !self.ready() {
            return Handle::INVALID;
        }
        let clock_id = match domain {
            ClockDomain::AwakeOnly => libc::CLOCK_BOOTTIME,
            ClockDomain::WakeFromSuspend => libc::CLOCK_BOOTTIME_ALARM,
        };
        let fd = unsafe { libc::timerfd_create(clock_id, libc::TFD_CLOEXEC | libc::TFD_NONBLOCK) };
        if fd < 0 {
            // Not uncommon for WakeFromSuspend: CLOCK_BOOTTIME_ALARM needs
            // CAP_WAKE_ALARM.
            error!(
                ?domain,
                err = %io::Error::last_os_error(),
                "timerfd_create failed"
            );
            return Handle::INVALID;
        }

        let mut event = libc::epoll_event {
            events: (libc::EPOLLIN | libc::EPOLLWAKEUP) as u32,
            u64: fd as u64,
        };
        let rc = unsafe { libc::epoll_ctl(self.poll_fd, libc::EPOLL_CTL_ADD, fd, &mut event) };
        if rc < 0 {
            error!(fd, err = %io::Error::last_os_error(), "epoll_ctl add failed");
            unsafe { libc::close(fd) };
            return Handle::INVALID;
        }
        self.timers.lock().insert(fd);
        Handle::from_raw(fd)
    }

    fn destroy_timer(&self, handle: Handle) -> io::Result<()> {
        let fd = handle.as_raw();
        if !self.timers.lock().remove(&fd) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unknown timer handle",
            ));
        }
        let rc = unsafe { libc::epoll_ctl(self.poll_fd, libc::EPOLL_CTL_DEL, fd, ptr::null_mut()) };
        let result = if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        };
        unsafe { libc::close(fd) };
        result
    }

    fn set_timer(&self, handle: Handle, deadline: Nanos) -> io::Result<()> {
        if !self.ready() {
            return Err(io::Error::other("clock not initialized"));
        }
        let mut spec = libc::itimerspec {
            it_interval: libc::timespec {
                tv_sec: 0,
                tv_nsec: 0,
            },
            it_value: libc::timespec {
                tv_sec: 0,
                tv_nsec: 0,
            },
        };
        // A zeroed it_value disarms the timer.
        if deadline > 0 {
            spec.it_value.tv_sec = (deadline / NANOS_PER_SEC) as libc::time_t;
            spec.it_value.tv_nsec = (deadline % NANOS_PER_SEC) as libc::c_long;
        }
        let rc = unsafe {
            libc::timerfd_settime(
                handle.as_raw(),
                libc::TFD_TIMER_ABSTIME,
                &spec,
                ptr::null_mut(),
            )
        };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    fn wait(&self, timeout: Nanos) -> Handle {
        if !self.ready() {
            return Handle::INVALID;
        }
        let timeout_ms: libc::c_int = if timeout < 0 {
            -1
        } else if timeout > Nanos::from(libc::c_int::MAX) * NANOS_PER_MILLI {
            libc::c_int::MAX
        } else {
            (timeout / NANOS_PER_MILLI) as libc::c_int
        };

        let mut event = libc::epoll_event { events: 0, u64: 0 };
        let n = unsafe { libc::epoll_wait(self.poll_fd, &mut event, 1, timeout_ms) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                return Handle::INTERRUPTED;
            }
            error!(err = %err, "epoll_wait failed");
            return Handle::INVALID;
        }
        if n == 0 {
            return Handle::PENDING;
        }

        let fd = event.u64 as libc::c_int;
        let mut expirations: u64 = 0;
        let nread = unsafe {
            libc::read(
                fd,
                ptr::addr_of_mut!(expirations).cast(),
                mem::size_of::<u64>(),
            )
        };
        trace!(fd, bytes = nread, "drained fired timer");
        if nread < 0 {
            let err = io::Error::last_os_error();
            // EAGAIN: the timer was re-armed or disarmed between the epoll
            // wakeup and the drain; there is nothing to report yet.
            if matches!(err.raw_os_error(), Some(libc::EAGAIN | libc::EINTR)) {
                return Handle::PENDING;
            }
            error!(fd, err = %err, "failed to drain fired timer");
            return Handle::INVALID;
        }
        Handle::from_raw(fd)
    }
}

impl Drop for LinuxClock {
    fn drop(&mut self) {
        for fd in self.timers.lock().drain() {
            unsafe { libc::close(fd) };
        }
        if self.poll_fd >= 0 {
            unsafe { libc::close(self.poll_fd) };
        }
    }
}
