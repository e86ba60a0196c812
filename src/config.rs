//! Server configuration, from command-line flags with environment fallbacks.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// EmberKV server configuration.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "emberkv")]
#[command(about = "In-memory string/list/hash store with periodic snapshots")]
#[command(version)]
pub struct Config {
    /// Host to bind to
    #[arg(long, env = "EMBERKV_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "EMBERKV_PORT", default_value_t = 6379)]
    pub port: u16,

    /// Snapshot file, loaded at startup and written periodically
    #[arg(long, env = "EMBERKV_SNAPSHOT", default_value = "dump.snap")]
    pub snapshot_path: PathBuf,

    /// Seconds between periodic snapshots (0 disables them)
    #[arg(long, env = "EMBERKV_SNAPSHOT_INTERVAL", default_value_t = 300)]
    pub snapshot_interval: u64,

    /// Initial interval of the expiry sweeper, in milliseconds
    #[arg(long, env = "EMBERKV_SWEEP_INTERVAL_MS", default_value_t = 100)]
    pub sweep_interval_ms: u64,

    /// Seconds to wait for open connections at shutdown
    #[arg(long, default_value_t = 5)]
    pub shutdown_grace: u64,

    /// Default log filter; RUST_LOG takes precedence
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            snapshot_path: PathBuf::from("dump.snap"),
            snapshot_interval: 300,
            sweep_interval_ms: 100,
            shutdown_grace: 5,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// `None` when periodic snapshots are disabled.
    pub fn snapshot_every(&self) -> Option<Duration> {
        (self.snapshot_interval > 0).then(|| Duration::from_secs(self.snapshot_interval))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace)
    }
}
