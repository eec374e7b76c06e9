//! # Filedock Server
//!
//! Multi-client file storage server speaking a newline-delimited text
//! protocol over TCP.
//!
//! ## Architecture
//!
//! - Admission: the accept loop refuses connections beyond capacity with a
//!   `BUSY:` line
//! - Connection handlers: one reader task per session, handshake then enqueue
//! - Dispatcher: a single consumer executing commands in arrival order,
//!   Administrator queue first
//! - Monitors: periodic idle scan and traffic report
//!
//! ## Features
//!
//! - Flat storage directory with list, read, upload, download, delete,
//!   search and info
//! - Administrator and read-only roles
//! - Idle disconnection with a `TIMEOUT:` notice
//! - Per-session and process-wide traffic counters

pub mod client;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod monitor;
pub mod registry;
pub mod server;
pub mod session;
pub mod stats;
pub mod storage;

pub use client::Client;
pub use config::{Config, LogFormat, LoggingConfig};
pub use connection::{ConnectionHandler, DisconnectReason};
pub use error::{Error, Result};
pub use registry::SessionRegistry;
pub use server::Server;
pub use session::Session;
pub use stats::{SessionStats, StatsSnapshot};
pub use storage::{FileInfo, Storage};
