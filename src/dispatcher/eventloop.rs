//! Event-loop integration shim (§4.H, §9 design note: "treat the loop as
//! an injected dependency exposing `(fd, step(timeout))`").
//!
//! The dispatcher's own I/O (the TCP accept loop and every `hyper`
//! connection) runs on the owning `tokio` current-thread runtime and needs
//! no external fd to make progress. This shim exists for hosts that embed
//! the dispatcher inside a foreign reactor and want a single fd to poll
//! for "this dispatcher has scheduled work" — mirroring the original's
//! `timerfd`-driven tick rather than its epoll/kqueue backend, since the
//! accept loop here is already self-driving. [`crate::dispatcher::Dispatcher`]
//! owns one [`TimerEventLoop`] for the lifetime of the server and exposes it
//! through `Dispatcher::fd`/`Dispatcher::process`.

use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::error::{Error, Kind, Result};

/// A loop backend exposing one readable fd and a non-blocking tick.
pub trait EventLoop {
    /// The fd a host scheduler should watch for readability, or `-1` once
    /// [`EventLoop::close`] has run (§8 invariant 5).
    fn fd(&self) -> RawFd;

    /// Advances the loop by one non-blocking iteration.
    fn step(&mut self, timeout: Duration) -> Result<()>;

    /// Releases the backing fd.
    fn close(&mut self);
}

/// A `timerfd`-backed loop, firing at a fixed period so a host can poll
/// this dispatcher at a steady cadence (100 ms in the original).
#[cfg(target_os = "linux")]
pub struct TimerEventLoop {
    fd: RawFd,
}

#[cfg(target_os = "linux")]
impl TimerEventLoop {
    /// Creates a periodic timer firing every `period`.
    pub fn new(period: Duration) -> Result<Self> {
        let fd = unsafe { libc::timerfd_create(libc::CLOCK_MONOTONIC, libc::TFD_NONBLOCK) };
        if fd < 0 {
            return Err(Error::with_cause(Kind::Io, std::io::Error::last_os_error()));
        }
        let spec = libc::itimerspec {
            it_interval: duration_to_timespec(period),
            it_value: duration_to_timespec(period),
        };
        let rc = unsafe { libc::timerfd_settime(fd, 0, &spec, std::ptr::null_mut()) };
        if rc < 0 {
            let err = Error::with_cause(Kind::Io, std::io::Error::last_os_error());
            unsafe { libc::close(fd) };
            return Err(err);
        }
        Ok(TimerEventLoop { fd })
    }
}

#[cfg(target_os = "linux")]
fn duration_to_timespec(d: Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: d.as_secs() as libc::time_t,
        tv_nsec: d.subsec_nanos() as libc::c_long,
    }
}

#[cfg(target_os = "linux")]
impl EventLoop for TimerEventLoop {
    fn fd(&self) -> RawFd {
        self.fd
    }

    fn step(&mut self, _timeout: Duration) -> Result<()> {
        // Drains the expiration counter so the fd goes back to
        // non-readable; this dispatcher's own work runs on the tokio
        // reactor regardless of this fd firing.
        let mut expirations: u64 = 0;
        let n = unsafe {
            libc::read(
                self.fd,
                &mut expirations as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if n < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::WouldBlock {
                return Ok(());
            }
            return Err(Error::with_cause(Kind::LoopTick, err));
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.fd >= 0 {
            unsafe { libc::close(self.fd) };
            self.fd = -1;
        }
    }
}

#[cfg(target_os = "linux")]
impl Drop for TimerEventLoop {
    fn drop(&mut self) {
        self.close();
    }
}

/// A no-op loop for hosts on platforms without `timerfd`; always reports
/// `fd() == -1` so a poller treats it as "nothing to watch."
#[cfg(not(target_os = "linux"))]
pub struct TimerEventLoop;

#[cfg(not(target_os = "linux"))]
impl TimerEventLoop {
    /// Creates a loop with no backing fd on non-Linux platforms.
    pub fn new(_period: Duration) -> Result<Self> {
        Ok(TimerEventLoop)
    }
}

#[cfg(not(target_os = "linux"))]
impl EventLoop for TimerEventLoop {
    fn fd(&self) -> RawFd {
        -1
    }

    fn step(&mut self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {}
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn close_sets_fd_to_negative_one() {
        let mut timer = TimerEventLoop::new(Duration::from_millis(100)).unwrap();
        assert!(timer.fd() >= 0);
        timer.close();
        assert_eq!(timer.fd(), -1);
    }
}
