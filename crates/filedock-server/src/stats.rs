//! Traffic statistics snapshots
//!
//! Snapshots are taken from the [`SessionRegistry`](crate::SessionRegistry)
//! and never mutate it. They are rendered three ways: a multi-line report for
//! the periodic log, a single `STATS:` protocol line for `/stats`, and a
//! JSON line for the periodic log under the JSON log format.

use chrono::{DateTime, Utc};
use filedock_core::Role;
use filedock_core::protocol::{LIST_SEPARATOR, STATS_PREFIX};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Point-in-time view of one connected session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Session id
    pub id: String,
    /// Announced username
    pub username: String,
    /// Peer address
    pub addr: String,
    /// Declared role
    pub role: Role,
    /// Inbound lines
    pub messages: u64,
    /// Upload payload bytes
    pub bytes_received: u64,
    /// Download payload bytes
    pub bytes_sent: u64,
    /// Seconds since the last inbound line
    pub idle_secs: u64,
}

/// Point-in-time view of server traffic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// When the snapshot was taken
    pub taken_at: DateTime<Utc>,
    /// Connected sessions
    pub active_sessions: usize,
    /// Upload payload bytes across all sessions
    pub bytes_received: u64,
    /// Download payload bytes across all sessions
    pub bytes_sent: u64,
    /// Connections admitted since start
    pub connections_accepted: u64,
    /// Connections refused at capacity
    pub connections_rejected: u64,
    /// One entry per connected session
    pub sessions: Vec<SessionStats>,
}

impl StatsSnapshot {
    /// Human readable multi-line report
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Active connections: {}", self.active_sessions);
        let _ = writeln!(out, "Clients:");
        for s in &self.sessions {
            let _ = writeln!(out, "- {}@{} Messages={}", s.username, s.addr, s.messages);
        }
        let _ = writeln!(out, "Total bytes received: {}", self.bytes_received);
        let _ = write!(out, "Total bytes sent: {}", self.bytes_sent);
        out
    }

    /// Single protocol line answering `/stats`
    pub fn reply_line(&self) -> String {
        let clients = self
            .sessions
            .iter()
            .map(|s| format!("{}@{}#{}", s.username, s.addr, s.messages))
            .collect::<Vec<_>>()
            .join(&LIST_SEPARATOR.to_string());

        format!(
            "{STATS_PREFIX}Active={};BytesReceived={};BytesSent={};Clients={}",
            self.active_sessions, self.bytes_received, self.bytes_sent, clients
        )
    }

    /// One-line summary for log output
    pub fn summary(&self) -> String {
        format!(
            "{} active, {} accepted, {} rejected, {} bytes in, {} bytes out",
            self.active_sessions,
            self.connections_accepted,
            self.connections_rejected,
            self.bytes_received,
            self.bytes_sent
        )
    }

    /// Export as single-line JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
