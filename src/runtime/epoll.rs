//! Native Linux event queue via raw `epoll(7)`.
//!
//! Level-triggered: the listener keeps reporting readable while
//! connections are pending, so partial drains are safe.

use super::{deadline_after, Multiplexer, Readiness};
use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::{Duration, Instant};

pub(crate) struct EpollMultiplexer {
    epoll: OwnedFd,
    listener: RawFd,
    events: Vec<libc::epoll_event>,
}

impl EpollMultiplexer {
    pub fn new(listener: RawFd, capacity: usize) -> io::Result<Self> {
        if capacity == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "epoll event buffer needs at least one slot",
            ));
        }

        // SAFETY: plain syscall, result checked below
        let raw = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: raw is a freshly created descriptor that nothing else owns
        let epoll = unsafe { OwnedFd::from_raw_fd(raw) };

        let mut interest = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: listener as u64,
        };
        // SAFETY: both descriptors are open and interest outlives the call
        let rc = unsafe {
            libc::epoll_ctl(
                epoll.as_raw_fd(),
                libc::EPOLL_CTL_ADD,
                listener,
                &mut interest,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            epoll,
            listener,
            events: vec![libc::epoll_event { events: 0, u64: 0 }; capacity],
        })
    }
}

impl Multiplexer for EpollMultiplexer {
    fn wait(&mut self, timeout: Duration) -> io::Result<Readiness> {
        let deadline = deadline_after(timeout);

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let timeout_ms = remaining
                .as_millis()
                .min(libc::c_int::MAX as u128) as libc::c_int;

            // SAFETY: events has events.len() writable slots
            let n = unsafe {
                libc::epoll_wait(
                    self.epoll.as_raw_fd(),
                    self.events.as_mut_ptr(),
                    self.events.len() as libc::c_int,
                    timeout_ms,
                )
            };

            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }

            if n == 0 {
                // Millisecond truncation can wake us just short of the deadline
                if Instant::now() < deadline {
                    continue;
                }
                return Ok(Readiness::TimedOut);
            }

            let ready = self.events[..n as usize].iter().any(|event| {
                let token = { event.u64 };
                token == self.listener as u64
            });
            if ready {
                return Ok(Readiness::Ready);
            }
        }
    }
}
