//! Event-queue readiness via mio.
//!
//! The listener is registered once; each wait collects at most
//! `capacity` events from the kernel queue (epoll on Linux, kqueue on
//! macOS and the BSDs). mio registrations are edge-triggered, so the
//! acceptor must drain the listener until `WouldBlock` after every report.

use super::{deadline_after, Multiplexer, Readiness};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

const LISTENER_TOKEN: Token = Token(0);

pub(crate) struct QueueMultiplexer {
    poll: Poll,
    events: Events,
}

impl QueueMultiplexer {
    pub fn new(fd: RawFd, capacity: usize) -> io::Result<Self> {
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut SourceFd(&fd), LISTENER_TOKEN, Interest::READABLE)?;

        Ok(Self {
            poll,
            events: Events::with_capacity(capacity),
        })
    }
}

impl Multiplexer for QueueMultiplexer {
    fn wait(&mut self, timeout: Duration) -> io::Result<Readiness> {
        let deadline = deadline_after(timeout);

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.poll.poll(&mut self.events, Some(remaining)) {
                Ok(()) => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }

            if self.events.is_empty() {
                return Ok(Readiness::TimedOut);
            }

            let ready = self
                .events
                .iter()
                .any(|event| event.token() == LISTENER_TOKEN && event.is_readable());
            if ready {
                return Ok(Readiness::Ready);
            }
        }
    }

    fn edge_triggered(&self) -> bool {
        true
    }
}
