//! Bitmask readiness via `select(2)`.
//!
//! The kernel overwrites both the `fd_set` and (on Linux) the `timeval`
//! with results, so both are rebuilt from scratch before every call.

use super::{deadline_after, Multiplexer, Readiness};
use std::io;
use std::mem::MaybeUninit;
use std::os::unix::io::RawFd;
use std::ptr;
use std::time::{Duration, Instant};

pub(crate) struct SelectMultiplexer {
    fd: RawFd,
}

impl SelectMultiplexer {
    pub fn new(fd: RawFd) -> io::Result<Self> {
        // FD_SET on a descriptor outside the bitmask is undefined behavior
        if fd < 0 || fd as usize >= libc::FD_SETSIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("descriptor {fd} does not fit in an fd_set"),
            ));
        }
        Ok(Self { fd })
    }

    fn interest_set(&self) -> libc::fd_set {
        let mut set = MaybeUninit::<libc::fd_set>::uninit();
        // SAFETY: FD_ZERO initializes the whole set; fd was bounds-checked in new()
        unsafe {
            libc::FD_ZERO(set.as_mut_ptr());
            libc::FD_SET(self.fd, set.as_mut_ptr());
            set.assume_init()
        }
    }
}

impl Multiplexer for SelectMultiplexer {
    fn wait(&mut self, timeout: Duration) -> io::Result<Readiness> {
        let deadline = deadline_after(timeout);

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let mut read_fds = self.interest_set();
            let mut tv = to_timeval(remaining);

            // SAFETY: read_fds and tv are valid for the duration of the call
            let n = unsafe {
                libc::select(
                    self.fd + 1,
                    &mut read_fds,
                    ptr::null_mut(),
                    ptr::null_mut(),
                    &mut tv,
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

            // SAFETY: read_fds was filled in by select
            if unsafe { libc::FD_ISSET(self.fd, &read_fds) } {
                return Ok(Readiness::Ready);
            }
        }
    }
}

fn to_timeval(d: Duration) -> libc::timeval {
    libc::timeval {
        tv_sec: d.as_secs() as libc::time_t,
        tv_usec: d.subsec_micros() as libc::suseconds_t,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_out_of_range_descriptor() {
        assert!(SelectMultiplexer::new(-1).is_err());
        assert!(SelectMultiplexer::new(libc::FD_SETSIZE as RawFd).is_err());
        assert!(SelectMultiplexer::new(0).is_ok());
    }

    #[test]
    fn test_timeval_conversion() {
        let tv = to_timeval(Duration::from_millis(5_250));
        assert_eq!(tv.tv_sec, 5);
        assert_eq!(tv.tv_usec, 250_000);
    }

    #[test]
    fn test_interest_set_contains_only_listener() {
        let mux = SelectMultiplexer::new(7).unwrap();
        let set = mux.interest_set();
        for fd in 0..64 {
            // SAFETY: set is initialized and fd is in range
            let present = unsafe { libc::FD_ISSET(fd, &set) };
            assert_eq!(present, fd == 7, "fd {fd}");
        }
    }
}
