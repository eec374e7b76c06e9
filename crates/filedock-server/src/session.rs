//! Per-connection session state
//!
//! A [`Session`] is created at accept time and shared (behind an `Arc`) by
//! the connection handler, the dispatcher and the monitors. Identity is set
//! once at handshake; liveness and traffic counters are atomics. The write
//! half of the connection lives here so replies from the dispatcher and
//! notices from the handler or idle scanner share one serialized sink.

use crate::{Error, Result};
use filedock_core::{Handshake, Role};
use std::net::SocketAddr;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::debug;

/// Username reported for sessions that have not completed the handshake
pub const UNKNOWN_USER: &str = "unknown";

/// Bound on taking the writer and on writing a parting notice to a peer that
/// may have stopped reading
const NOTICE_TIMEOUT: Duration = Duration::from_secs(1);

/// Output half of a session's connection
pub type ReplySink = Box<dyn AsyncWrite + Send + Unpin>;

/// Server-side state of one accepted connection
pub struct Session {
    id: String,
    addr: SocketAddr,
    created: Instant,
    identity: OnceLock<Handshake>,
    /// Milliseconds since `created` at the last parsed inbound line
    last_activity_ms: AtomicU64,
    connected: AtomicBool,
    messages_received: AtomicU64,
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
    writer: Mutex<Option<ReplySink>>,
    closed: CancellationToken,
}

impl Session {
    /// Create a connected session.
    ///
    /// `closed` is cancelled when the session terminates; pass a child of the
    /// server's shutdown token so shutdown reaches every session.
    pub fn new(id: String, addr: SocketAddr, writer: ReplySink, closed: CancellationToken) -> Self {
        Self {
            id,
            addr,
            created: Instant::now(),
            identity: OnceLock::new(),
            last_activity_ms: AtomicU64::new(0),
            connected: AtomicBool::new(true),
            messages_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            writer: Mutex::new(Some(writer)),
            closed,
        }
    }

    /// Registry key, unique for the server's lifetime
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Peer address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Record the handshake. Returns `false` if the session was already identified.
    pub fn identify(&self, handshake: Handshake) -> bool {
        self.identity.set(handshake).is_ok()
    }

    /// Announced username, or [`UNKNOWN_USER`] before the handshake
    pub fn username(&self) -> &str {
        self.identity
            .get()
            .map_or(UNKNOWN_USER, |h| h.username.as_str())
    }

    /// Declared role; unidentified sessions are read-only
    pub fn role(&self) -> Role {
        self.identity.get().map_or(Role::ReadOnly, |h| h.role)
    }

    /// Mark inbound activity now
    pub fn touch(&self) {
        let elapsed = u64::try_from(self.created.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_activity_ms.store(elapsed, Ordering::Relaxed);
    }

    /// Time since the last inbound line (or since accept)
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_activity_ms.load(Ordering::Relaxed));
        self.created.elapsed().saturating_sub(last)
    }

    /// Cleared once [`Session::terminate`] has run
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Count one inbound message, returning the new total
    pub fn record_message(&self) -> u64 {
        self.messages_received.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Inbound lines counted so far
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// Upload payload bytes from this session
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Download payload bytes to this session
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub(crate) fn add_bytes_received(&self, bytes: u64) {
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn add_bytes_sent(&self, bytes: u64) {
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Write one line (newline appended) to the client
    pub async fn send_line(&self, line: &str) -> Result<()> {
        self.send_lines([line]).await
    }

    /// Write several lines back to back without interleaving other writers
    pub async fn send_lines<I, S>(&self, lines: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let closed = || Error::connection(format!("session {} is closed", self.id));
        let mut guard = self.writer.lock().await;
        if !self.is_connected() {
            return Err(closed());
        }
        let writer = guard.as_mut().ok_or_else(closed)?;

        for line in lines {
            writer.write_all(line.as_ref().as_bytes()).await?;
            writer.write_all(b"\n").await?;
        }
        writer.flush().await?;
        Ok(())
    }

    /// Terminate the session.
    ///
    /// Only the first call has any effect: it clears the connected flag,
    /// cancels the close token, writes `notice` if given and shuts down the
    /// write half. If another writer holds the sink past the notice timeout
    /// the notice is skipped and the sink closes when the session drops.
    /// Returns whether this call performed the termination.
    pub async fn terminate(&self, notice: Option<&str>) -> bool {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return false;
        }
        self.closed.cancel();

        let sink = match tokio::time::timeout(NOTICE_TIMEOUT, self.writer.lock()).await {
            Ok(mut guard) => guard.take(),
            Err(_) => {
                debug!(session_id = %self.id, "Writer busy, closing without notice");
                None
            }
        };
        if let Some(mut sink) = sink {
            if let Some(notice) = notice {
                let write = async {
                    sink.write_all(notice.as_bytes()).await?;
                    sink.write_all(b"\n").await?;
                    sink.flush().await
                };
                if let Err(e) = tokio::time::timeout(NOTICE_TIMEOUT, write)
                    .await
                    .unwrap_or_else(|_| Err(std::io::ErrorKind::TimedOut.into()))
                {
                    debug!(session_id = %self.id, error = %e, "Failed to deliver notice");
                }
            }
            let _ = sink.shutdown().await;
        }

        true
    }

    /// Resolves once the session has been terminated
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("username", &self.username())
            .field("role", &self.role())
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream};

    fn session() -> (Session, BufReader<DuplexStream>) {
        let (client, server) = tokio::io::duplex(4096);
        let session = Session::new(
            "00000001".to_string(),
            "127.0.0.1:4000".parse().unwrap(),
            Box::new(server),
            CancellationToken::new(),
        );
        (session, BufReader::new(client))
    }

    #[tokio::test]
    async fn test_identity_is_set_once() {
        let (session, _peer) = session();
        assert_eq!(session.username(), UNKNOWN_USER);
        assert_eq!(session.role(), Role::ReadOnly);

        assert!(session.identify(Handshake::new("alice", Role::Administrator)));
        assert!(!session.identify(Handshake::new("mallory", Role::ReadOnly)));

        assert_eq!(session.username(), "alice");
        assert_eq!(session.role(), Role::Administrator);
    }

    #[tokio::test]
    async fn test_send_lines() {
        let (session, mut peer) = session();
        session.send_lines(["one", "two"]).await.unwrap();

        let mut line = String::new();
        peer.read_line(&mut line).await.unwrap();
        assert_eq!(line, "one\n");
        line.clear();
        peer.read_line(&mut line).await.unwrap();
        assert_eq!(line, "two\n");
    }

    #[tokio::test]
    async fn test_terminate_once() {
        let (session, mut peer) = session();

        assert!(session.terminate(Some("TIMEOUT:bye")).await);
        assert!(!session.is_connected());
        assert!(!session.terminate(Some("TIMEOUT:again")).await);

        let mut out = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut peer, &mut out)
            .await
            .unwrap();
        assert_eq!(out, "TIMEOUT:bye\n");

        // Closed token resolves immediately
        session.closed().await;
        assert!(session.send_line("late").await.is_err());
    }

    #[tokio::test]
    async fn test_terminate_does_not_wait_on_stalled_writer() {
        let (client, server) = tokio::io::duplex(64);
        let session = Arc::new(Session::new(
            "00000002".to_string(),
            "127.0.0.1:4001".parse().unwrap(),
            Box::new(server),
            CancellationToken::new(),
        ));

        // Peer never reads, so this write blocks while holding the sink
        let big = "x".repeat(4096);
        let writer = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.send_line(&big).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!writer.is_finished());

        let terminated = tokio::time::timeout(
            Duration::from_secs(3),
            session.terminate(Some("TIMEOUT:bye")),
        )
        .await
        .unwrap();
        assert!(terminated);
        assert!(!session.is_connected());

        drop(client);
        assert!(writer.await.unwrap().is_err());
        assert!(session.send_line("late").await.is_err());
    }

    #[tokio::test]
    async fn test_idle_tracking() {
        let (session, _peer) = session();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(session.idle_for() >= Duration::from_millis(50));

        session.touch();
        assert!(session.idle_for() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_counters() {
        let (session, _peer) = session();
        assert_eq!(session.record_message(), 1);
        assert_eq!(session.record_message(), 2);
        session.add_bytes_received(10);
        session.add_bytes_sent(4);
        assert_eq!(session.messages_received(), 2);
        assert_eq!(session.bytes_received(), 10);
        assert_eq!(session.bytes_sent(), 4);
    }
}
