//! Listening socket construction.

use std::io;
use std::net::{SocketAddr, TcpListener};

/// Listen backlog for every strategy.
const BACKLOG: i32 = 1024;

/// Bind a non-blocking TCP listener.
///
/// Non-blocking so that an accept after a readiness report can never stall
/// the acceptor loop if the pending connection was reset in between.
/// `SO_REUSEADDR` lets a restarted server rebind while old sockets sit in
/// TIME_WAIT; `SO_REUSEPORT` is deliberately not set so that two servers
/// cannot silently share a port.
pub fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_ephemeral_port() {
        let listener = bind_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        // Nothing pending, so a non-blocking accept must not block
        let err = listener.accept().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_bind_conflict_is_reported() {
        let first = bind_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = first.local_addr().unwrap();
        assert!(bind_listener(addr).is_err());
    }
}
