//! muxecho: a tagged echo server over three readiness strategies
//!
//! Every strategy listens on its own port and answers with the same
//! protocol, so the mechanisms can be compared side by side:
//! - `select(2)` bitmask scan
//! - `poll(2)` descriptor array scan
//! - kernel event queue (epoll/kqueue via mio, plus raw epoll on Linux)
//!
//! Features:
//! - Per-strategy connection registries with periodic status reports
//! - Idle timeout for every echo session
//! - Graceful shutdown on SIGINT/SIGTERM
//! - Configuration via CLI arguments or TOML file

mod config;
mod protocols;
mod runtime;
mod server;
mod shutdown;

use config::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        strategies = ?config.strategies,
        wait_timeout_secs = config.wait_timeout.as_secs(),
        idle_timeout_secs = config.idle_timeout.as_secs(),
        "Starting muxecho server"
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all().thread_name("session-worker");
    if let Some(workers) = config.workers {
        builder.worker_threads(workers);
    }
    let runtime = builder.build()?;

    runtime.block_on(server::run(config))?;
    Ok(())
}
