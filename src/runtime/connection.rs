//! Accepted connections and the per-strategy connection registry.
//!
//! A `Connection` is created by an acceptor loop and handed to exactly one
//! echo session, which owns it until close. The registry only does
//! accounting: it maps each open connection to its peer and acceptance time.

use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::fmt;
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::trace;

/// Process-unique identifier for an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ConnectionId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A freshly accepted client connection.
#[derive(Debug)]
pub struct Connection {
    /// Registry key.
    pub id: ConnectionId,
    /// Remote endpoint.
    pub peer: SocketAddr,
    /// Socket, already switched to non-blocking mode.
    pub stream: TcpStream,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            id: ConnectionId::next(),
            peer,
            stream,
        }
    }
}

/// What the registry remembers about an open connection.
#[derive(Debug, Clone)]
pub struct ConnectionEntry {
    pub peer: SocketAddr,
    pub accepted_at: DateTime<Local>,
}

/// Thread-safe set of open connections for one strategy.
///
/// Inserts and removes take the write lock, queries take the read lock.
/// Entries are removed only by the session that owns the connection.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, ConnectionEntry>>,
}

impl ConnectionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record a newly accepted connection. Callers must not add twice.
    pub fn add(&self, conn: &Connection) {
        let entry = ConnectionEntry {
            peer: conn.peer,
            accepted_at: Local::now(),
        };
        let mut connections = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let previous = connections.insert(conn.id, entry);
        debug_assert!(previous.is_none(), "connection {} added twice", conn.id);
        trace!(conn_id = %conn.id, total = connections.len(), "Registered connection");
    }

    /// Forget a connection. Returns false if it was not registered.
    pub fn remove(&self, id: ConnectionId) -> bool {
        self.connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    /// Number of open connections.
    pub fn count(&self) -> usize {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Copy of every entry, ordered by connection id.
    pub fn snapshot(&self) -> Vec<(ConnectionId, ConnectionEntry)> {
        let connections = self
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<_> = connections
            .iter()
            .map(|(id, entry)| (*id, entry.clone()))
            .collect();
        entries.sort_by_key(|(id, _)| *id);
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    /// Accept a real loopback connection; the client half is returned too.
    fn connected_pair(listener: &TcpListener) -> (Connection, TcpStream) {
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, peer) = listener.accept().unwrap();
        (Connection::new(server, peer), client)
    }

    #[test]
    fn test_ids_are_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_add_and_remove() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let registry = ConnectionRegistry::new();

        let (c1, _k1) = connected_pair(&listener);
        let (c2, _k2) = connected_pair(&listener);
        registry.add(&c1);
        registry.add(&c2);
        assert_eq!(registry.count(), 2);

        assert!(registry.remove(c1.id));
        assert_eq!(registry.count(), 1);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].0, c2.id);
        assert_eq!(snapshot[0].1.peer, c2.peer);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let registry = ConnectionRegistry::new();

        let (conn, _client) = connected_pair(&listener);
        registry.add(&conn);
        assert!(registry.remove(conn.id));

        // Removing again changes nothing
        assert!(!registry.remove(conn.id));
        assert_eq!(registry.count(), 0);
        assert!(registry.is_empty());

        // Neither does removing an id that was never added
        assert!(!registry.remove(ConnectionId::next()));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_concurrent_add_remove() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let registry = ConnectionRegistry::new();

        let (conns, _clients): (Vec<Connection>, Vec<TcpStream>) =
            (0..64).map(|_| connected_pair(&listener)).unzip();
        let ids: Vec<ConnectionId> = conns.iter().map(|c| c.id).collect();

        let handles: Vec<_> = conns
            .into_iter()
            .map(|conn| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    registry.add(&conn);
                    let _ = registry.count();
                    conn
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.count(), 64);

        // Remove the even half concurrently
        let handles: Vec<_> = ids
            .iter()
            .step_by(2)
            .map(|&id| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.remove(id))
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(registry.count(), 32);
    }
}
