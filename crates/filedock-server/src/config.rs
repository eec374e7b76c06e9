//! Configuration for the Filedock server

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Filedock server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Server port (0 picks an ephemeral port)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Flat directory holding every stored file
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// Maximum concurrently connected sessions
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Seconds of silence before a session is disconnected
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Idle scanner period in seconds
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,

    /// Stats report period in seconds
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,

    /// Bounded wait on each command queue, in milliseconds
    #[serde(default = "default_dispatch_poll")]
    pub dispatch_poll_ms: u64,

    /// Upper bound on writing one reply, in seconds
    #[serde(default = "default_reply_timeout")]
    pub reply_timeout_secs: u64,

    /// Longest accepted protocol line in bytes
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (text or json)
    pub format: LogFormat,
    /// Optional log file path (logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            file: None,
        }
    }
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text logging for human readability
    Text,
    /// JSON structured logging for log aggregators
    Json,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            root_dir: default_root_dir(),
            max_connections: default_max_connections(),
            idle_timeout_secs: default_idle_timeout(),
            scan_interval_secs: default_scan_interval(),
            stats_interval_secs: default_stats_interval(),
            dispatch_poll_ms: default_dispatch_poll(),
            reply_timeout_secs: default_reply_timeout(),
            max_line_length: default_max_line_length(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.root_dir.exists() && !self.root_dir.is_dir() {
            return Err(crate::Error::Config(format!(
                "Root path is not a directory: {:?}",
                self.root_dir
            )));
        }

        if self.max_connections == 0 {
            return Err(crate::Error::Config(
                "max_connections must be at least 1".to_string(),
            ));
        }

        if self.idle_timeout_secs == 0 {
            return Err(crate::Error::Config(
                "idle_timeout_secs must be at least 1".to_string(),
            ));
        }

        if self.scan_interval_secs == 0 || self.stats_interval_secs == 0 {
            return Err(crate::Error::Config(
                "scan and stats intervals must be at least 1 second".to_string(),
            ));
        }

        if self.dispatch_poll_ms == 0 {
            return Err(crate::Error::Config(
                "dispatch_poll_ms must be at least 1".to_string(),
            ));
        }

        if self.reply_timeout_secs == 0 {
            return Err(crate::Error::Config(
                "reply_timeout_secs must be at least 1".to_string(),
            ));
        }

        if self.max_line_length < 1024 {
            return Err(crate::Error::Config(
                "max_line_length must be at least 1024 bytes".to_string(),
            ));
        }

        Ok(())
    }

    /// `host:port` string the listener binds to
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    /// Silence after which a session is dropped
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Period of the idle scan
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    /// Period of the stats report
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    /// How long the dispatcher waits on an empty queue
    pub fn dispatch_poll(&self) -> Duration {
        Duration::from_millis(self.dispatch_poll_ms)
    }

    /// Bound on writing one reply
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.reply_timeout_secs)
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9000
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("ServerStorage")
}

fn default_max_connections() -> usize {
    4
}

fn default_idle_timeout() -> u64 {
    500
}

fn default_scan_interval() -> u64 {
    5
}

fn default_stats_interval() -> u64 {
    5
}

fn default_dispatch_poll() -> u64 {
    20
}

fn default_reply_timeout() -> u64 {
    30
}

fn default_max_line_length() -> usize {
    64 * 1024 * 1024 // base64 uploads travel as a single line
}
