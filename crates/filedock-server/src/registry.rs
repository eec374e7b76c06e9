//! Session registry
//!
//! Owns the live session table and the process-wide traffic counters.
//! Created by [`Server::bind`](crate::Server::bind), handed by `Arc` to the
//! admission loop, connection handlers, dispatcher and monitors, and drained
//! when the server shuts down.

use crate::session::Session;
use crate::stats::{SessionStats, StatsSnapshot};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Concurrent id → session table plus aggregate counters
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
    capacity: usize,
    next_id: AtomicU64,
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
}

impl SessionRegistry {
    /// Create an empty registry admitting at most `capacity` connected sessions
    pub fn new(capacity: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            capacity,
            next_id: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Configured connection limit
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Allocate a fresh session id. Ids are never reused.
    pub fn next_id(&self) -> String {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{id:08x}")
    }

    /// Number of registered sessions whose connected flag is set
    pub fn active_count(&self) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.value().is_connected())
            .count()
    }

    /// Soft admission check; concurrent accepts may overshoot briefly
    pub fn has_capacity(&self) -> bool {
        self.active_count() < self.capacity
    }

    /// Add an accepted session to the table
    pub fn register(&self, session: Arc<Session>) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        debug!(session_id = %session.id(), "Registering session");
        self.sessions.insert(session.id().to_string(), session);
    }

    /// Remove a session. Safe to call more than once.
    pub fn unregister(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    /// Snapshot of the current table, safe to hold across awaits
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Registered sessions, connected or not
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is registered
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Account for an upload of `bytes` payload bytes by `session`
    pub fn record_upload(&self, session: &Session, bytes: u64) {
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
        session.add_bytes_received(bytes);
    }

    /// Account for a download of `bytes` payload bytes by `session`
    pub fn record_download(&self, session: &Session, bytes: u64) {
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
        session.add_bytes_sent(bytes);
    }

    /// Count one connection refused at capacity
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Upload payload bytes across all sessions
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Download payload bytes across all sessions
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Connections admitted since start
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Connections refused since start
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Read-only statistics over connected sessions
    pub fn snapshot(&self) -> StatsSnapshot {
        let mut sessions: Vec<SessionStats> = self
            .sessions()
            .into_iter()
            .filter(|s| s.is_connected())
            .map(|s| SessionStats {
                id: s.id().to_string(),
                username: s.username().to_string(),
                addr: s.addr().to_string(),
                role: s.role(),
                messages: s.messages_received(),
                bytes_received: s.bytes_received(),
                bytes_sent: s.bytes_sent(),
                idle_secs: s.idle_for().as_secs(),
            })
            .collect();
        sessions.sort_by(|a, b| a.id.cmp(&b.id));

        StatsSnapshot {
            taken_at: Utc::now(),
            active_sessions: sessions.len(),
            bytes_received: self.bytes_received(),
            bytes_sent: self.bytes_sent(),
            connections_accepted: self.accepted(),
            connections_rejected: self.rejected(),
            sessions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filedock_core::{Handshake, Role};
    use tokio_util::sync::CancellationToken;

    fn session(registry: &SessionRegistry) -> Arc<Session> {
        let (_client, server) = tokio::io::duplex(64);
        Arc::new(Session::new(
            registry.next_id(),
            "127.0.0.1:4000".parse().unwrap(),
            Box::new(server),
            CancellationToken::new(),
        ))
    }

    #[test]
    fn test_ids_are_unique() {
        let registry = SessionRegistry::new(4);
        let a = registry.next_id();
        let b = registry.next_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 8);
    }

    #[tokio::test]
    async fn test_capacity_counts_connected_only() {
        let registry = SessionRegistry::new(2);
        let first = session(&registry);
        let second = session(&registry);
        registry.register(Arc::clone(&first));
        registry.register(Arc::clone(&second));

        assert_eq!(registry.active_count(), 2);
        assert!(!registry.has_capacity());

        // Terminated but not yet unregistered sessions free their slot
        first.terminate(None).await;
        assert_eq!(registry.active_count(), 1);
        assert!(registry.has_capacity());
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let registry = SessionRegistry::new(4);
        let s = session(&registry);
        let id = s.id().to_string();
        registry.register(s);

        assert_eq!(registry.len(), 1);
        assert!(registry.unregister(&id).is_some());
        assert!(registry.unregister(&id).is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_byte_accounting() {
        let registry = SessionRegistry::new(4);
        let s = session(&registry);
        registry.register(Arc::clone(&s));

        registry.record_upload(&s, 100);
        registry.record_download(&s, 40);
        registry.record_download(&s, 2);

        assert_eq!(registry.bytes_received(), 100);
        assert_eq!(registry.bytes_sent(), 42);
        assert_eq!(s.bytes_received(), 100);
        assert_eq!(s.bytes_sent(), 42);
    }

    #[tokio::test]
    async fn test_snapshot_excludes_disconnected() {
        let registry = SessionRegistry::new(4);
        let alice = session(&registry);
        alice.identify(Handshake::new("alice", Role::Administrator));
        alice.record_message();
        let bob = session(&registry);
        bob.identify(Handshake::new("bob", Role::ReadOnly));
        registry.register(Arc::clone(&alice));
        registry.register(Arc::clone(&bob));
        registry.record_rejected();

        bob.terminate(None).await;

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.active_sessions, 1);
        assert_eq!(snapshot.sessions.len(), 1);
        assert_eq!(snapshot.sessions[0].username, "alice");
        assert_eq!(snapshot.sessions[0].messages, 1);
        assert_eq!(snapshot.connections_accepted, 2);
        assert_eq!(snapshot.connections_rejected, 1);
    }
}
