//! Filedock Server Binary
//!
//! Run with: cargo run --bin filedock-server -- --root ./ServerStorage

use anyhow::{Context, Result};
use clap::Parser;
use filedock_server::{Config, LogFormat, Server};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address
    #[arg(short, long)]
    bind: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Storage directory
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Maximum concurrently connected sessions
    #[arg(short, long)]
    max_connections: Option<usize>,

    /// Seconds of inactivity before a session is disconnected
    #[arg(long)]
    idle_timeout: Option<u64>,

    /// Verbose logging (debug level)
    #[arg(short, long)]
    verbose: bool,

    /// Log format (json or text)
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Log file path (rotated daily)
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Args {
    /// File config (or defaults) with command line overrides applied
    fn into_config(self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(bind) = self.bind {
            config.bind_address = bind;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(root) = self.root {
            config.root_dir = root;
        }
        if let Some(max) = self.max_connections {
            config.max_connections = max;
        }
        if let Some(secs) = self.idle_timeout {
            config.idle_timeout_secs = secs;
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
        if let Some(file) = self.log_file {
            config.logging.file = Some(file);
        }
        if self.verbose {
            config.logging.level = "debug".to_string();
        }

        Ok(config)
    }
}

/// Install the global subscriber; the guard must live until exit
fn init_logging(config: &Config) -> Result<Option<WorkerGuard>> {
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level))
    };

    let Some(log_file) = &config.logging.file else {
        match config.logging.format {
            LogFormat::Json => tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter())
                .with_current_span(true)
                .init(),
            LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter()).init(),
        }
        return Ok(None);
    };

    let directory = log_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| std::path::Path::new("."));
    let file_name = log_file
        .file_name()
        .context("Log file path has no file name")?;
    std::fs::create_dir_all(directory)
        .with_context(|| format!("Failed to create log directory {}", directory.display()))?;

    let appender = tracing_appender::rolling::daily(directory, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    match config.logging.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter())
            .with_writer(writer)
            .with_current_span(true)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(writer)
            .with_ansi(false)
            .init(),
    }

    Ok(Some(guard))
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Args::parse().into_config()?;
    let _log_guard = init_logging(&config)?;

    info!(
        event = "server_starting",
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.bind_address,
        port = config.port,
        root_dir = ?config.root_dir,
        max_connections = config.max_connections,
        idle_timeout_secs = config.idle_timeout_secs,
        log_format = ?config.logging.format,
        log_file = ?config.logging.file,
        "Starting Filedock server"
    );

    let server = match Server::bind(config).await {
        Ok(server) => server,
        Err(e) => {
            error!(event = "server_creation_failed", error = %e, "Failed to start server");
            return Err(e.into());
        }
    };

    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!(event = "shutdown_requested", "Received Ctrl-C, shutting down");
                shutdown.cancel();
            }
            Err(e) => warn!(error = %e, "Unable to listen for Ctrl-C"),
        }
    });

    if let Err(e) = server.run().await {
        error!(event = "server_error", error = %e, "Server encountered an error");
        return Err(e.into());
    }

    info!(event = "server_shutdown", "Filedock server shutdown complete");
    Ok(())
}
