//! An in-process event facility.
//!
//! Events are injected through a [`LoopbackInjector`] instead of coming from the
//! kernel. The facility still exposes a real descriptor that turns readable
//! whenever an event is pending, so it can be driven by the same reactor code as
//! [`crate::facility::Kqueue`]. Used by the test suite and by hosts that want to
//! exercise watch-set maintenance where kqueue is unavailable.

use std::collections::HashMap;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixDatagram;

use crate::event::VnodeEvents;
use crate::facility::{EventFacility, FacilityEvent};

const RECORD_LEN: usize = 8;

/// Facility whose events are supplied by a [`LoopbackInjector`].
#[derive(Debug)]
pub struct LoopbackFacility {
    reader: UnixDatagram,
    writer: UnixDatagram,
    registered: HashMap<RawFd, VnodeEvents>,
    reject_registrations: bool,
}

impl LoopbackFacility {
    /// A handle that can push events into this facility from anywhere.
    pub fn injector(&self) -> io::Result<LoopbackInjector> {
        Ok(LoopbackInjector {
            writer: self.writer.try_clone()?,
        })
    }

    /// Whether `fd` is on the interest list.
    pub fn is_registered(&self, fd: RawFd) -> bool {
        self.registered.contains_key(&fd)
    }

    /// Descriptors on the interest list.
    pub fn registered(&self) -> impl Iterator<Item = RawFd> + '_ {
        self.registered.keys().copied()
    }

    /// Make every following registration fail, as a broken kernel would.
    pub fn reject_registrations(&mut self, reject: bool) {
        self.reject_registrations = reject;
    }
}

impl EventFacility for LoopbackFacility {
    fn open() -> io::Result<Self> {
        let (reader, writer) = UnixDatagram::pair()?;
        reader.set_nonblocking(true)?;
        Ok(Self {
            reader,
            writer,
            registered: HashMap::new(),
            reject_registrations: false,
        })
    }

    fn register(&mut self, fd: RawFd, interest: VnodeEvents) -> io::Result<()> {
        if self.reject_registrations {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }
        self.registered.insert(fd, interest);
        Ok(())
    }

    fn unregister(&mut self, fd: RawFd) -> io::Result<()> {
        self.registered.remove(&fd);
        Ok(())
    }

    fn poll_ready(&mut self, _capacity: usize) -> io::Result<Vec<FacilityEvent>> {
        let mut ready = Vec::new();
        let mut record = [0u8; RECORD_LEN];

        loop {
            match self.reader.recv(&mut record) {
                Ok(RECORD_LEN) => {
                    let (fd, flags) = record.split_at(4);
                    let fd = RawFd::from_ne_bytes([fd[0], fd[1], fd[2], fd[3]]);
                    let flags = u32::from_ne_bytes([flags[0], flags[1], flags[2], flags[3]]);

                    // The kernel only reports what was asked for, on live registrations.
                    let Some(interest) = self.registered.get(&fd) else {
                        continue;
                    };
                    let flags = VnodeEvents::from_bits_truncate(flags) & *interest;
                    if !flags.is_empty() {
                        ready.push(FacilityEvent { fd, flags });
                    }
                }
                Ok(_) => continue,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }

        Ok(ready)
    }
}

impl AsRawFd for LoopbackFacility {
    fn as_raw_fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }
}

/// Sending half of a [`LoopbackFacility`].
#[derive(Debug)]
pub struct LoopbackInjector {
    writer: UnixDatagram,
}

impl LoopbackInjector {
    /// Report `flags` on descriptor `fd`.
    pub fn fire(&self, fd: RawFd, flags: VnodeEvents) -> io::Result<()> {
        let mut record = [0u8; RECORD_LEN];
        record[..4].copy_from_slice(&fd.to_ne_bytes());
        record[4..].copy_from_slice(&flags.bits().to_ne_bytes());
        self.writer.send(&record)?;
        Ok(())
    }
}
