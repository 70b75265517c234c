//! Readiness multiplexing for listening sockets.
//!
//! Every strategy answers the same question: is a connection pending on
//! this listener, or did the wait interval pass without one?
//! - `Select`: bitmask scan with `select(2)`
//! - `Poll`: descriptor array scan with `poll(2)`
//! - `Epoll`: kernel interest list through mio (epoll/kqueue)
//! - `NativeEpoll`: kernel interest list through raw `epoll(7)`, Linux only
//!
//! Which strategies can run is decided at startup by `Strategy::is_supported`.

mod connection;
mod listener;
mod poll;
mod queue;
mod select;

#[cfg(target_os = "linux")]
mod epoll;

pub(crate) use connection::{Connection, ConnectionRegistry};
pub(crate) use listener::bind_listener;

use serde::Deserialize;
use std::fmt;
use std::io;
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

/// Longest timeout a single wait or idle deadline describes. Longer
/// requests are clamped to it.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// The instant `timeout` from now, clamped to `MAX_TIMEOUT`.
pub(crate) fn deadline_after(timeout: Duration) -> Instant {
    Instant::now() + timeout.min(MAX_TIMEOUT)
}

/// Outcome of a single readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The listener has at least one pending connection.
    Ready,
    /// The wait interval elapsed with nothing pending.
    TimedOut,
}

/// A readiness mechanism watching one listening descriptor.
///
/// Implementations retry `EINTR` internally and never report it. A
/// zero-count wake is `TimedOut`, not an error.
pub trait Multiplexer: Send {
    /// Block until the listener is readable or `timeout` elapses.
    fn wait(&mut self, timeout: Duration) -> io::Result<Readiness>;

    /// Whether a pending backlog is reported only once, when it appears.
    ///
    /// Callers that stop draining early must resume without waiting.
    fn edge_triggered(&self) -> bool {
        false
    }
}

/// The readiness strategies this server can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    Select,
    Poll,
    Epoll,
    NativeEpoll,
}

impl Strategy {
    pub const ALL: [Strategy; 4] = [
        Strategy::Select,
        Strategy::Poll,
        Strategy::Epoll,
        Strategy::NativeEpoll,
    ];

    /// Tag written into every response served by this strategy.
    pub fn tag(self) -> &'static str {
        match self {
            Strategy::Select => "Select",
            Strategy::Poll => "Poll",
            Strategy::Epoll => "Epoll",
            Strategy::NativeEpoll => "Native Epoll",
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            Strategy::Select => 8080,
            Strategy::Poll => 8081,
            Strategy::Epoll => 8082,
            Strategy::NativeEpoll => 8085,
        }
    }

    /// Whether this platform provides the mechanism.
    pub fn is_supported(self) -> bool {
        match self {
            Strategy::Select | Strategy::Poll | Strategy::Epoll => true,
            Strategy::NativeEpoll => cfg!(target_os = "linux"),
        }
    }

    /// Every strategy this platform can run.
    pub fn available() -> Vec<Strategy> {
        Self::ALL
            .into_iter()
            .filter(|strategy| strategy.is_supported())
            .collect()
    }

    /// Build the multiplexer for `listener`.
    ///
    /// `event_capacity` bounds how many events an event-queue strategy
    /// collects per wait; the scan strategies ignore it.
    pub fn open(
        self,
        listener: RawFd,
        event_capacity: usize,
    ) -> io::Result<Box<dyn Multiplexer>> {
        match self {
            Strategy::Select => Ok(Box::new(select::SelectMultiplexer::new(listener)?)),
            Strategy::Poll => Ok(Box::new(poll::PollMultiplexer::new(listener))),
            Strategy::Epoll => Ok(Box::new(queue::QueueMultiplexer::new(
                listener,
                event_capacity,
            )?)),
            Strategy::NativeEpoll => open_native_epoll(listener, event_capacity),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[cfg(target_os = "linux")]
fn open_native_epoll(listener: RawFd, event_capacity: usize) -> io::Result<Box<dyn Multiplexer>> {
    Ok(Box::new(epoll::EpollMultiplexer::new(listener, event_capacity)?))
}

#[cfg(not(target_os = "linux"))]
fn open_native_epoll(
    _listener: RawFd,
    _event_capacity: usize,
) -> io::Result<Box<dyn Multiplexer>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "native epoll is only available on Linux",
    ))
}
