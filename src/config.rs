//! Configuration module for the muxecho server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::runtime::{Strategy, MAX_TIMEOUT};
use clap::Parser;
use serde::Deserialize;
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Upper bound on the pause after an accept error.
const MAX_ACCEPT_BACKOFF: Duration = Duration::from_secs(60);

/// Command-line arguments for the echo server
#[derive(Parser, Debug)]
#[command(name = "muxecho")]
#[command(author = "muxecho authors")]
#[command(version = "0.1.0")]
#[command(about = "A tagged echo server driven by select, poll and epoll", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind every strategy to (e.g., 0.0.0.0)
    #[arg(long)]
    pub host: Option<String>,

    /// Strategies to run, comma separated (overrides the file's enabled flags)
    #[arg(short, long, value_enum, value_delimiter = ',')]
    pub strategies: Option<Vec<Strategy>>,

    /// Readiness wait interval in seconds
    #[arg(long)]
    pub wait_timeout_secs: Option<u64>,

    /// Idle timeout for echo sessions in seconds
    #[arg(long)]
    pub idle_timeout_secs: Option<u64>,

    /// Number of Tokio worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub strategies: StrategiesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address every listener binds to
    #[serde(default = "default_host")]
    pub host: String,
    /// Number of Tokio worker threads
    pub workers: Option<usize>,
    /// Readiness wait interval in seconds
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout_secs: u64,
    /// Pause after a failed accept or wait, in milliseconds
    #[serde(default = "default_accept_backoff")]
    pub accept_backoff_ms: u64,
    /// Maximum events collected per event-queue wait
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Interval between status reports in seconds
    #[serde(default = "default_status_interval")]
    pub status_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            workers: None,
            wait_timeout_secs: default_wait_timeout(),
            accept_backoff_ms: default_accept_backoff(),
            event_capacity: default_event_capacity(),
            status_interval_secs: default_status_interval(),
        }
    }
}

/// Echo session configuration
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    /// Idle timeout in seconds, reset on every read
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// Maximum bytes per read
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout(),
            buffer_size: default_buffer_size(),
        }
    }
}

/// Per-strategy listener settings
#[derive(Debug, Deserialize)]
pub struct StrategyConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub port: u16,
}

impl StrategyConfig {
    fn for_strategy(strategy: Strategy) -> Self {
        Self {
            enabled: true,
            port: strategy.default_port(),
        }
    }
}

/// Listener settings for every strategy
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StrategiesConfig {
    #[serde(default = "default_select")]
    pub select: StrategyConfig,
    #[serde(default = "default_poll")]
    pub poll: StrategyConfig,
    #[serde(default = "default_epoll")]
    pub epoll: StrategyConfig,
    #[serde(default = "default_native_epoll")]
    pub native_epoll: StrategyConfig,
}

impl StrategiesConfig {
    fn get(&self, strategy: Strategy) -> &StrategyConfig {
        match strategy {
            Strategy::Select => &self.select,
            Strategy::Poll => &self.poll,
            Strategy::Epoll => &self.epoll,
            Strategy::NativeEpoll => &self.native_epoll,
        }
    }
}

impl Default for StrategiesConfig {
    fn default() -> Self {
        Self {
            select: default_select(),
            poll: default_poll(),
            epoll: default_epoll(),
            native_epoll: default_native_epoll(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_wait_timeout() -> u64 {
    5
}

fn default_accept_backoff() -> u64 {
    100
}

fn default_event_capacity() -> usize {
    10
}

fn default_status_interval() -> u64 {
    5
}

fn default_idle_timeout() -> u64 {
    30
}

fn default_buffer_size() -> usize {
    1024
}

fn default_enabled() -> bool {
    true
}

fn default_select() -> StrategyConfig {
    StrategyConfig::for_strategy(Strategy::Select)
}

fn default_poll() -> StrategyConfig {
    StrategyConfig::for_strategy(Strategy::Poll)
}

fn default_epoll() -> StrategyConfig {
    StrategyConfig::for_strategy(Strategy::Epoll)
}

fn default_native_epoll() -> StrategyConfig {
    StrategyConfig::for_strategy(Strategy::NativeEpoll)
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    /// Enabled strategies with their ports, in startup order
    pub strategies: Vec<(Strategy, u16)>,
    pub wait_timeout: Duration,
    pub accept_backoff: Duration,
    pub event_capacity: usize,
    pub status_interval: Duration,
    pub idle_timeout: Duration,
    pub buffer_size: usize,
    pub workers: Option<usize>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args over file values and validate the result.
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let host_str = cli.host.unwrap_or(toml_config.server.host);
        let host: IpAddr = host_str
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("invalid host address '{host_str}'")))?;

        // An explicit CLI list wins over the file's enabled flags, ports still come from the file
        let strategies: Vec<(Strategy, u16)> = match cli.strategies {
            Some(list) => {
                let mut seen = HashSet::new();
                list.into_iter()
                    .filter(|strategy| seen.insert(*strategy))
                    .map(|strategy| (strategy, toml_config.strategies.get(strategy).port))
                    .collect()
            }
            None => Strategy::ALL
                .into_iter()
                .filter(|strategy| toml_config.strategies.get(*strategy).enabled)
                .map(|strategy| (strategy, toml_config.strategies.get(strategy).port))
                .collect(),
        };

        let config = Config {
            host,
            strategies,
            wait_timeout: Duration::from_secs(
                cli.wait_timeout_secs
                    .unwrap_or(toml_config.server.wait_timeout_secs),
            ),
            accept_backoff: Duration::from_millis(toml_config.server.accept_backoff_ms),
            event_capacity: toml_config.server.event_capacity,
            status_interval: Duration::from_secs(toml_config.server.status_interval_secs),
            idle_timeout: Duration::from_secs(
                cli.idle_timeout_secs
                    .unwrap_or(toml_config.session.idle_timeout_secs),
            ),
            buffer_size: toml_config.session.buffer_size,
            workers: cli.workers.or(toml_config.server.workers),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.strategies.is_empty() {
            return Err(ConfigError::Invalid("no strategy is enabled".to_string()));
        }
        if self.wait_timeout.is_zero() {
            return Err(ConfigError::Invalid("wait timeout must be positive".to_string()));
        }
        if self.idle_timeout.is_zero() {
            return Err(ConfigError::Invalid("idle timeout must be positive".to_string()));
        }
        if self.status_interval.is_zero() {
            return Err(ConfigError::Invalid("status interval must be positive".to_string()));
        }
        for (name, value) in [
            ("wait timeout", self.wait_timeout),
            ("idle timeout", self.idle_timeout),
            ("status interval", self.status_interval),
        ] {
            if value > MAX_TIMEOUT {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be at most {}s",
                    MAX_TIMEOUT.as_secs()
                )));
            }
        }
        if self.accept_backoff > MAX_ACCEPT_BACKOFF {
            return Err(ConfigError::Invalid(format!(
                "accept backoff must be at most {}ms",
                MAX_ACCEPT_BACKOFF.as_millis()
            )));
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid("buffer size must be positive".to_string()));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid("event capacity must be positive".to_string()));
        }
        if self.workers == Some(0) {
            return Err(ConfigError::Invalid("worker count must be positive".to_string()));
        }

        let mut ports = HashSet::new();
        for (strategy, port) in &self.strategies {
            // Port 0 asks the OS for a fresh port each time, so it never collides
            if *port != 0 && !ports.insert(*port) {
                return Err(ConfigError::Invalid(format!(
                    "port {port} used by more than one strategy (second: {strategy})"
                )));
            }
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}
