use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use linesync_core::config::{
    DEFAULT_CACHE_TTL_SECS, DEFAULT_MAINTENANCE_INTERVAL_SECS, DEFAULT_MAX_CONSECUTIVE_FAILURES,
    DEFAULT_POLL_INTERVAL_MS,
};
use linesync_core::EngineConfig;

/// Default HTTP/WebSocket port.
pub const DEFAULT_PORT: u16 = 4001;

/// Default bound on graceful shutdown, in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Parser)]
#[command(name = "linesync-server")]
#[command(about = "LineSync - realtime production-line dashboard backend")]
#[command(version)]
pub struct Args {
    /// Address to bind to
    #[arg(long, env = "LINESYNC_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Directory of the embedded line store
    #[arg(short, long, env = "LINESYNC_DATA_PATH", default_value = "./data")]
    pub data_path: PathBuf,

    /// Change-tracking poll interval in milliseconds
    #[arg(long, env = "LINESYNC_POLL_INTERVAL_MS", default_value_t = DEFAULT_POLL_INTERVAL_MS)]
    pub poll_interval_ms: u64,

    /// Consecutive failed polls before a topic's poller stops
    #[arg(long, env = "LINESYNC_MAX_FAILURES", default_value_t = DEFAULT_MAX_CONSECUTIVE_FAILURES)]
    pub max_failures: u32,

    /// Enable the read-through cache
    #[arg(
        long,
        env = "CACHE_ENABLED",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub cache: bool,

    /// Cache entry time-to-live in seconds
    #[arg(long, env = "LINESYNC_CACHE_TTL_SECS", default_value_t = DEFAULT_CACHE_TTL_SECS)]
    pub cache_ttl_secs: u64,

    /// Seconds between change-log truncation and cache expiry sweeps
    #[arg(
        long,
        env = "LINESYNC_MAINTENANCE_INTERVAL_SECS",
        default_value_t = DEFAULT_MAINTENANCE_INTERVAL_SECS
    )]
    pub maintenance_interval_secs: u64,

    /// Seconds to wait for connections and pollers to wind down on shutdown
    #[arg(long, env = "LINESYNC_SHUTDOWN_TIMEOUT_SECS", default_value_t = DEFAULT_SHUTDOWN_TIMEOUT_SECS)]
    pub shutdown_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LINESYNC_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    pub fn into_config(self) -> ServerConfig {
        ServerConfig {
            host: self.host,
            port: self.port,
            data_path: self.data_path,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_failures: self.max_failures,
            cache_enabled: self.cache,
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            maintenance_interval: Duration::from_secs(self.maintenance_interval_secs),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_path: PathBuf,
    pub poll_interval: Duration,
    pub max_failures: u32,
    pub cache_enabled: bool,
    pub cache_ttl: Duration,
    pub maintenance_interval: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            data_path: PathBuf::from("./data"),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            cache_enabled: true,
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            maintenance_interval: Duration::from_secs(DEFAULT_MAINTENANCE_INTERVAL_SECS),
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
        }
    }
}

impl ServerConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Engine settings derived from the server flags.
    pub fn engine_config(&self) -> EngineConfig {
        let config = EngineConfig::new()
            .with_poll_interval(self.poll_interval)
            .with_max_consecutive_failures(self.max_failures)
            .with_default_cache_ttl(self.cache_ttl)
            .with_maintenance_interval(self.maintenance_interval);
        if self.cache_enabled {
            config
        } else {
            config.without_cache()
        }
    }
}
