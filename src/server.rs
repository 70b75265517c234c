//! Acceptor loops and server lifecycle.
//!
//! Each enabled strategy gets a listener, a multiplexer, its own
//! connection registry and a dedicated acceptor thread. Accepted
//! connections are handed to echo sessions on the Tokio runtime.

use crate::config::Config;
use crate::protocols::echo::{self, SessionContext};
use crate::runtime::{
    bind_listener, Connection, ConnectionRegistry, Multiplexer, Readiness, Strategy,
};
use crate::shutdown::{self, Shutdown};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

/// Tunables shared by every acceptor loop and its sessions.
#[derive(Debug, Clone)]
pub struct AcceptorSettings {
    pub wait_timeout: Duration,
    pub accept_backoff: Duration,
    pub event_capacity: usize,
    pub idle_timeout: Duration,
    pub buffer_size: usize,
}

impl From<&Config> for AcceptorSettings {
    fn from(config: &Config) -> Self {
        Self {
            wait_timeout: config.wait_timeout,
            accept_backoff: config.accept_backoff,
            event_capacity: config.event_capacity,
            idle_timeout: config.idle_timeout,
            buffer_size: config.buffer_size,
        }
    }
}

/// A running acceptor loop.
#[derive(Debug)]
pub struct AcceptorHandle {
    pub strategy: Strategy,
    pub local_addr: SocketAddr,
    pub registry: Arc<ConnectionRegistry>,
    thread: JoinHandle<()>,
}

impl AcceptorHandle {
    /// Wait for the loop to exit. It stops within one wait timeout of its
    /// shutdown signal firing.
    pub fn join(self) {
        if self.thread.join().is_err() {
            error!(strategy = self.strategy.tag(), "Acceptor thread panicked");
        }
    }
}

/// Source of connections for an acceptor loop.
trait Incoming: AsRawFd + Send + 'static {
    fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl Incoming for TcpListener {
    fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}

/// Bind `addr`, open the strategy's multiplexer and start the acceptor thread.
///
/// Setup failures are returned; the caller decides whether the rest of the
/// server keeps running without this strategy.
pub fn spawn_acceptor(
    strategy: Strategy,
    addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    settings: AcceptorSettings,
    runtime: Handle,
    shutdown: Shutdown,
) -> io::Result<AcceptorHandle> {
    let listener = bind_listener(addr)?;
    start_acceptor(strategy, listener, registry, settings, runtime, shutdown)
}

fn start_acceptor<L: Incoming>(
    strategy: Strategy,
    listener: L,
    registry: Arc<ConnectionRegistry>,
    settings: AcceptorSettings,
    runtime: Handle,
    shutdown: Shutdown,
) -> io::Result<AcceptorHandle> {
    let local_addr = listener.local_addr()?;
    let multiplexer = strategy.open(listener.as_raw_fd(), settings.event_capacity)?;

    let acceptor = Acceptor {
        strategy,
        multiplexer,
        listener,
        registry: Arc::clone(&registry),
        settings,
        runtime,
        shutdown,
    };

    let thread = thread::Builder::new()
        .name(format!("acceptor-{}", strategy.tag().to_lowercase().replace(' ', "-")))
        .spawn(move || acceptor.run())?;

    Ok(AcceptorHandle {
        strategy,
        local_addr,
        registry,
        thread,
    })
}

/// One listener driven by one multiplexer.
///
/// The multiplexer refers to the listener's descriptor, so it is declared
/// first and dropped before the listener closes.
struct Acceptor<L> {
    strategy: Strategy,
    multiplexer: Box<dyn Multiplexer>,
    listener: L,
    registry: Arc<ConnectionRegistry>,
    settings: AcceptorSettings,
    runtime: Handle,
    shutdown: Shutdown,
}

impl<L: Incoming> Acceptor<L> {
    fn run(mut self) {
        let tag = self.strategy.tag();
        let edge_triggered = self.multiplexer.edge_triggered();
        debug!(strategy = tag, edge_triggered, "Acceptor loop started");

        // An edge-triggered queue reports a backlog once; if an accept error
        // cut the drain short, the next wait would not report it again
        let mut backlog = false;

        while !self.shutdown.is_triggered() {
            if backlog {
                backlog = !self.accept_pending();
                continue;
            }

            match self.multiplexer.wait(self.settings.wait_timeout) {
                Ok(Readiness::TimedOut) => {
                    debug!(strategy = tag, "Waiting for new connections");
                }
                Ok(Readiness::Ready) => backlog = !self.accept_pending() && edge_triggered,
                Err(e) => {
                    warn!(strategy = tag, error = %e, "Readiness wait failed");
                    thread::sleep(self.settings.accept_backoff);
                }
            }
        }

        info!(strategy = tag, "Acceptor loop stopped");
    }

    /// Accept until the backlog is empty.
    ///
    /// Draining is required for the edge-triggered event queue and harmless
    /// for the level-triggered strategies. Returns `false` when an accept
    /// error ended the drain, after backing off once.
    fn accept_pending(&self) -> bool {
        loop {
            if self.shutdown.is_triggered() {
                return true;
            }

            match self.listener.accept() {
                Ok((stream, peer)) => self.dispatch(stream, peer),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return true,
                // The peer gave up before we got to it, or a signal landed
                Err(ref e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted
                    ) =>
                {
                    continue
                }
                Err(e) => {
                    error!(strategy = self.strategy.tag(), error = %e, "Accept error");
                    thread::sleep(self.settings.accept_backoff);
                    return false;
                }
            }
        }
    }

    fn dispatch(&self, stream: TcpStream, peer: SocketAddr) {
        let tag = self.strategy.tag();

        // Sockets accepted on Linux do not inherit O_NONBLOCK
        if let Err(e) = stream.set_nonblocking(true) {
            warn!(strategy = tag, peer = %peer, error = %e, "Failed to configure connection");
            return;
        }

        let conn = Connection::new(stream, peer);
        info!(strategy = tag, peer = %peer, conn_id = %conn.id, "New connection");
        self.registry.add(&conn);

        let ctx = SessionContext {
            tag,
            registry: Arc::clone(&self.registry),
            idle_timeout: self.settings.idle_timeout,
            buffer_size: self.settings.buffer_size,
            shutdown: self.shutdown.clone(),
        };
        self.runtime.spawn(echo::handle_connection(conn, ctx));
    }
}

/// Periodically log each strategy's open connection count.
pub async fn report_status(
    registries: Vec<(Strategy, Arc<ConnectionRegistry>)>,
    interval: Duration,
    mut shutdown: Shutdown,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.triggered() => break,
            _ = ticker.tick() => {
                for (strategy, registry) in &registries {
                    info!(
                        strategy = strategy.tag(),
                        connections = registry.count(),
                        "Status report"
                    );
                    if registry.is_empty() {
                        continue;
                    }
                    for (conn_id, entry) in registry.snapshot() {
                        debug!(
                            strategy = strategy.tag(),
                            conn_id = %conn_id,
                            peer = %entry.peer,
                            accepted_at = %entry.accepted_at.format("%H:%M:%S"),
                            "Open connection"
                        );
                    }
                }
            }
        }
    }
}

/// Start every configured strategy and serve until SIGINT or SIGTERM.
pub async fn run(config: Config) -> io::Result<()> {
    let (trigger, shutdown) = shutdown::channel();
    let runtime = Handle::current();
    let settings = AcceptorSettings::from(&config);

    let available = Strategy::available();
    let mut acceptors = Vec::with_capacity(config.strategies.len());
    for &(strategy, port) in &config.strategies {
        if !available.contains(&strategy) {
            warn!(
                strategy = strategy.tag(),
                "Strategy not supported on this platform, skipping"
            );
            continue;
        }

        let addr = SocketAddr::new(config.host, port);
        match spawn_acceptor(
            strategy,
            addr,
            ConnectionRegistry::new(),
            settings.clone(),
            runtime.clone(),
            shutdown.clone(),
        ) {
            Ok(handle) => {
                info!(strategy = strategy.tag(), addr = %handle.local_addr, "Server listening");
                acceptors.push(handle);
            }
            Err(e) => {
                error!(
                    strategy = strategy.tag(),
                    addr = %addr,
                    error = %e,
                    "Failed to start strategy"
                )
            }
        }
    }

    if acceptors.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            "no strategy could be started",
        ));
    }

    let registries = acceptors
        .iter()
        .map(|handle| (handle.strategy, Arc::clone(&handle.registry)))
        .collect();
    let status = tokio::spawn(report_status(
        registries,
        config.status_interval,
        shutdown.clone(),
    ));

    wait_for_signal().await?;
    info!("Shutdown signal received, stopping server");
    trigger.trigger();

    for handle in acceptors {
        let strategy = handle.strategy;
        if tokio::task::spawn_blocking(move || handle.join()).await.is_err() {
            error!(strategy = strategy.tag(), "Failed to join acceptor thread");
        }
    }
    if let Err(e) = status.await {
        error!(error = %e, "Status reporter failed");
    }

    info!("Server stopped");
    Ok(())
}

async fn wait_for_signal() -> io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}
