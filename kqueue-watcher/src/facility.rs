//! Kernel event queues.
//!
//! [`EventFacility`] is the seam between the watcher and the OS: it owns the
//! queue descriptor, adds per-path descriptors to its interest list and hands
//! back whatever is ready without blocking. [`Kqueue`] is the real
//! implementation on macOS and the BSDs; [`crate::loopback::LoopbackFacility`]
//! stands in for it in tests and on hosts without kqueue.

use std::io;
use std::os::fd::{AsRawFd, RawFd};

use crate::event::VnodeEvents;

/// A ready event as reported by the queue: which descriptor fired and how.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FacilityEvent {
    pub fd: RawFd,
    pub flags: VnodeEvents,
}

/// A readiness-pollable kernel event queue.
pub trait EventFacility: AsRawFd + Sized {
    /// Create the queue.
    fn open() -> io::Result<Self>;

    /// Add `fd` to the interest list, edge-triggered and auto-clearing.
    fn register(&mut self, fd: RawFd, interest: VnodeEvents) -> io::Result<()>;

    /// Remove `fd` from the interest list before it is closed.
    ///
    /// kqueue drops the registration itself when the descriptor closes, so the
    /// default does nothing.
    fn unregister(&mut self, _fd: RawFd) -> io::Result<()> {
        Ok(())
    }

    /// Collect every event that is ready right now, reading at most `capacity`
    /// events per kernel call. Never blocks.
    fn poll_ready(&mut self, capacity: usize) -> io::Result<Vec<FacilityEvent>>;
}

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
))]
pub use self::kqueue::Kqueue;

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
))]
mod kqueue {
    #![allow(unsafe_code)]

    use std::io;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
    use std::ptr;

    use tracing::warn;

    use super::{EventFacility, FacilityEvent};
    use crate::event::VnodeEvents;

    /// Largest event list a single `kevent` call accepts.
    const MAX_EVENTS: usize = libc::c_int::MAX as usize;

    const NO_WAIT: libc::timespec = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };

    /// An owned kqueue descriptor. Closed on drop.
    #[derive(Debug)]
    pub struct Kqueue {
        fd: OwnedFd,
    }

    impl Kqueue {
        fn vnode_change(fd: RawFd, interest: VnodeEvents) -> libc::kevent {
            // SAFETY: kevent is plain old data; zero is a valid value for every
            // field, including the platform-specific ones we do not set.
            let mut change: libc::kevent = unsafe { std::mem::zeroed() };
            change.ident = fd as _;
            change.filter = libc::EVFILT_VNODE as _;
            change.flags = (libc::EV_ADD | libc::EV_ENABLE | libc::EV_CLEAR) as _;
            change.fflags = interest.bits() as _;
            change
        }
    }

    impl EventFacility for Kqueue {
        fn open() -> io::Result<Self> {
            // SAFETY: kqueue() takes no arguments and returns a new descriptor or -1.
            let raw = unsafe { libc::kqueue() };
            if raw < 0 {
                return Err(io::Error::last_os_error());
            }
            // SAFETY: `raw` is a freshly created descriptor owned by nobody else.
            let fd = unsafe { OwnedFd::from_raw_fd(raw) };

            // SAFETY: fcntl on a descriptor we own.
            if unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) } < 0 {
                return Err(io::Error::last_os_error());
            }

            Ok(Self { fd })
        }

        fn register(&mut self, fd: RawFd, interest: VnodeEvents) -> io::Result<()> {
            let change = Self::vnode_change(fd, interest);

            // SAFETY: one valid changelist entry, no eventlist.
            let ret = unsafe {
                libc::kevent(
                    self.fd.as_raw_fd(),
                    &change,
                    1,
                    ptr::null_mut(),
                    0,
                    &NO_WAIT,
                )
            };
            if ret < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }

        fn poll_ready(&mut self, capacity: usize) -> io::Result<Vec<FacilityEvent>> {
            let capacity = capacity.clamp(1, MAX_EVENTS);
            let mut buffer: Vec<libc::kevent> = Vec::with_capacity(capacity);
            let mut ready = Vec::new();

            loop {
                // SAFETY: the eventlist points at `capacity` uninitialized slots
                // and the kernel writes at most that many.
                let count = unsafe {
                    libc::kevent(
                        self.fd.as_raw_fd(),
                        ptr::null(),
                        0,
                        buffer.as_mut_ptr(),
                        capacity as libc::c_int,
                        &NO_WAIT,
                    )
                };
                if count < 0 {
                    let err = io::Error::last_os_error();
                    if err.kind() == io::ErrorKind::Interrupted {
                        continue;
                    }
                    return Err(err);
                }

                let count = count as usize;
                // SAFETY: the kernel initialized the first `count` entries.
                unsafe { buffer.set_len(count) };

                for event in buffer.drain(..) {
                    if (event.flags as u32) & (libc::EV_ERROR as u32) != 0 {
                        warn!(
                            "kqueue reported an error for descriptor {}: {}",
                            event.ident,
                            io::Error::from_raw_os_error(event.data as i32)
                        );
                        continue;
                    }
                    ready.push(FacilityEvent {
                        fd: event.ident as RawFd,
                        flags: VnodeEvents::from_bits_truncate(event.fflags as u32),
                    });
                }

                if count < capacity {
                    break;
                }
            }

            Ok(ready)
        }
    }

    impl AsRawFd for Kqueue {
        fn as_raw_fd(&self) -> RawFd {
            self.fd.as_raw_fd()
        }
    }

}
