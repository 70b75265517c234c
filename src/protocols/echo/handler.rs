//! Echo session handler for the Tokio runtime.

use bytes::BytesMut;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use super::response::format_response;
use crate::runtime::{Connection, ConnectionRegistry, MAX_TIMEOUT};
use crate::shutdown::Shutdown;

/// Everything a session needs besides its connection.
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Strategy tag echoed in every response.
    pub tag: &'static str,
    pub registry: Arc<ConnectionRegistry>,
    pub idle_timeout: Duration,
    /// Upper bound on a single read.
    pub buffer_size: usize,
    pub shutdown: Shutdown,
}

/// Why a session ended.
#[derive(Debug)]
pub enum CloseReason {
    PeerClosed,
    IdleTimeout,
    Shutdown,
    ReadError(io::Error),
    WriteError(io::Error),
}

/// Serve one connection until it closes, then deregister it.
///
/// The connection must already be registered in `ctx.registry`.
pub async fn handle_connection(conn: Connection, mut ctx: SessionContext) -> CloseReason {
    let Connection { id, peer, stream } = conn;

    let reason = match TcpStream::from_std(stream) {
        Ok(stream) => serve(stream, peer, &mut ctx).await,
        Err(e) => CloseReason::ReadError(e),
    };

    // The socket is closed by now; drop the bookkeeping entry last
    ctx.registry.remove(id);

    let tag = ctx.tag;
    match &reason {
        CloseReason::PeerClosed => {
            info!(strategy = tag, peer = %peer, conn_id = %id, "Connection closed")
        }
        CloseReason::IdleTimeout => {
            info!(strategy = tag, peer = %peer, conn_id = %id, "Connection timed out")
        }
        CloseReason::Shutdown => {
            debug!(strategy = tag, peer = %peer, conn_id = %id, "Connection closed for shutdown")
        }
        CloseReason::ReadError(e) => {
            warn!(strategy = tag, peer = %peer, conn_id = %id, error = %e, "Read error")
        }
        CloseReason::WriteError(e) => {
            warn!(strategy = tag, peer = %peer, conn_id = %id, error = %e, "Write error")
        }
    }

    reason
}

/// Read/respond loop. Owns the stream, so returning closes the socket.
async fn serve(mut stream: TcpStream, peer: SocketAddr, ctx: &mut SessionContext) -> CloseReason {
    let mut buf = vec![0u8; ctx.buffer_size];
    let mut response = BytesMut::with_capacity(ctx.buffer_size + 64);
    let idle_timeout = ctx.idle_timeout.min(MAX_TIMEOUT);
    let mut deadline = Instant::now() + idle_timeout;

    loop {
        let n = tokio::select! {
            _ = ctx.shutdown.triggered() => return CloseReason::Shutdown,
            read = timeout_at(deadline, stream.read(&mut buf)) => match read {
                Err(_elapsed) => return CloseReason::IdleTimeout,
                Ok(Ok(0)) => return CloseReason::PeerClosed,
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return CloseReason::ReadError(e),
            },
        };

        deadline = Instant::now() + idle_timeout;

        let payload = &buf[..n];
        debug!(
            strategy = ctx.tag,
            peer = %peer,
            bytes = n,
            data = %String::from_utf8_lossy(payload),
            "Received data"
        );

        response.clear();
        format_response(ctx.tag, payload, &mut response);
        if let Err(e) = stream.write_all(&response).await {
            return CloseReason::WriteError(e);
        }
    }
}
