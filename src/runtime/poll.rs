//! Array readiness via `poll(2)`.

use super::{deadline_after, Multiplexer, Readiness};
use std::io;
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

/// Index of the listener's record in the interest array.
const LISTENER: usize = 0;

pub(crate) struct PollMultiplexer {
    fds: [libc::pollfd; 1],
}

impl PollMultiplexer {
    pub fn new(fd: RawFd) -> Self {
        Self {
            fds: [libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            }],
        }
    }
}

impl Multiplexer for PollMultiplexer {
    fn wait(&mut self, timeout: Duration) -> io::Result<Readiness> {
        let deadline = deadline_after(timeout);

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            for record in &mut self.fds {
                record.revents = 0;
            }

            // SAFETY: fds is a live array of fds.len() pollfd records
            let n = unsafe {
                libc::poll(
                    self.fds.as_mut_ptr(),
                    self.fds.len() as libc::nfds_t,
                    to_millis(remaining),
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
                return Ok(Readiness::TimedOut);
            }

            let revents = self.fds[LISTENER].revents;
            if revents & (libc::POLLERR | libc::POLLNVAL) != 0 {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("listener reported poll error flags {revents:#x}"),
                ));
            }
            if revents & libc::POLLIN != 0 {
                return Ok(Readiness::Ready);
            }
        }
    }
}

/// Round up so a sub-millisecond remainder does not become a busy poll.
fn to_millis(d: Duration) -> libc::c_int {
    let mut ms = d.as_millis();
    if d.subsec_nanos() % 1_000_000 != 0 {
        ms += 1;
    }
    ms.min(libc::c_int::MAX as u128) as libc::c_int
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_millis_rounding() {
        assert_eq!(to_millis(Duration::ZERO), 0);
        assert_eq!(to_millis(Duration::from_micros(1)), 1);
        assert_eq!(to_millis(Duration::from_millis(5_000)), 5_000);
        assert_eq!(to_millis(Duration::from_secs(u64::MAX)), libc::c_int::MAX);
    }

    #[test]
    fn test_closed_descriptor_is_an_error() {
        // Negative descriptors are ignored by poll; use one that is surely closed
        let mut mux = PollMultiplexer::new(libc::c_int::MAX - 1);
        let err = mux.wait(Duration::from_millis(10)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
    }
}
