//! Per-connection reader
//!
//! A handler walks one session through `Handshaking → Serving → Terminated`.
//! While serving it only parses lines and enqueues them; replies come from
//! the dispatcher. Every read races the idle deadline and the session's close
//! token, so a terminated session never leaves a read pending. Lines are
//! decoded lossily: stray non-UTF-8 bytes reach the dispatcher as U+FFFD
//! and get an ordinary reply.

use crate::dispatcher::{Command, CommandQueues};
use crate::registry::SessionRegistry;
use crate::session::Session;
use filedock_core::{Handshake, TIMEOUT_NOTICE};
use futures::StreamExt;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, FramedRead};
use tracing::{debug, info, warn};

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// First line missing or not `HELLO <username> <role>`
    BadHandshake,
    /// No line within the idle timeout
    IdleTimeout,
    /// Peer closed the connection
    ClientClosed,
    /// Transport fault
    ReadError,
    /// Line exceeded the configured maximum length
    LineTooLong,
    /// Terminated elsewhere (idle scanner, reply timeout, shutdown)
    Closed,
    /// The dispatcher is gone
    DispatcherStopped,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            DisconnectReason::BadHandshake => "bad handshake",
            DisconnectReason::IdleTimeout => "idle timeout",
            DisconnectReason::ClientClosed => "client disconnected",
            DisconnectReason::ReadError => "read error",
            DisconnectReason::LineTooLong => "line too long",
            DisconnectReason::Closed => "closed by server",
            DisconnectReason::DispatcherStopped => "dispatcher stopped",
        };
        f.write_str(reason)
    }
}

enum Inbound {
    Line(String),
    Idle,
    Closed,
    Eof,
    Fault(AnyDelimiterCodecError),
}

/// Reader task for one session
pub struct ConnectionHandler<R> {
    session: Arc<Session>,
    lines: FramedRead<R, AnyDelimiterCodec>,
    queues: CommandQueues,
    registry: Arc<SessionRegistry>,
    idle_timeout: Duration,
}

impl<R> ConnectionHandler<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Handler reading `reader` on behalf of `session`
    pub fn new(
        session: Arc<Session>,
        reader: R,
        queues: CommandQueues,
        registry: Arc<SessionRegistry>,
        idle_timeout: Duration,
        max_line_length: usize,
    ) -> Self {
        Self {
            session,
            lines: FramedRead::new(
                reader,
                AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), Vec::new(), max_line_length),
            ),
            queues,
            registry,
            idle_timeout,
        }
    }

    /// Drive the session to completion and tear it down
    pub async fn run(mut self) -> DisconnectReason {
        let reason = match self.handshake().await {
            Ok(()) => self.serve().await,
            Err(reason) => reason,
        };

        self.teardown(reason).await;
        reason
    }

    async fn handshake(&mut self) -> Result<(), DisconnectReason> {
        let line = match self.next_line().await {
            Inbound::Line(line) => line,
            Inbound::Closed => return Err(DisconnectReason::Closed),
            Inbound::Idle | Inbound::Eof | Inbound::Fault(_) => {
                return Err(DisconnectReason::BadHandshake);
            }
        };

        let handshake = Handshake::parse(&line).map_err(|e| {
            warn!(
                event = "handshake_rejected",
                session_id = %self.session.id(),
                peer = %self.session.addr(),
                error = %e,
                "Rejecting malformed handshake"
            );
            DisconnectReason::BadHandshake
        })?;

        let welcome = handshake.welcome_line();
        info!(
            event = "handshake_completed",
            session_id = %self.session.id(),
            username = %handshake.username,
            role = %handshake.role,
            "Session identified"
        );
        self.session.identify(handshake);
        self.session.touch();

        self.session.send_line(&welcome).await.map_err(|e| {
            debug!(session_id = %self.session.id(), error = %e, "Failed to send welcome");
            DisconnectReason::ClientClosed
        })
    }

    async fn serve(&mut self) -> DisconnectReason {
        loop {
            match self.next_line().await {
                Inbound::Line(line) => {
                    self.session.touch();
                    self.session.record_message();

                    let command = Command::new(Arc::clone(&self.session), line);
                    if self.queues.submit(command).is_err() {
                        return DisconnectReason::DispatcherStopped;
                    }
                }
                Inbound::Idle => {
                    if self.session.terminate(Some(TIMEOUT_NOTICE)).await {
                        info!(
                            event = "idle_timeout",
                            session_id = %self.session.id(),
                            username = %self.session.username(),
                            timeout_secs = self.idle_timeout.as_secs(),
                            "Disconnecting idle session"
                        );
                    }
                    return DisconnectReason::IdleTimeout;
                }
                Inbound::Closed => return DisconnectReason::Closed,
                Inbound::Eof => return DisconnectReason::ClientClosed,
                Inbound::Fault(AnyDelimiterCodecError::MaxChunkLengthExceeded) => {
                    return DisconnectReason::LineTooLong;
                }
                Inbound::Fault(e) => {
                    debug!(session_id = %self.session.id(), error = %e, "Read failed");
                    return DisconnectReason::ReadError;
                }
            }
        }
    }

    async fn next_line(&mut self) -> Inbound {
        tokio::select! {
            biased;
            () = self.session.closed() => Inbound::Closed,
            () = tokio::time::sleep(self.idle_timeout) => Inbound::Idle,
            frame = self.lines.next() => match frame {
                Some(Ok(frame)) => Inbound::Line(decode_line(&frame)),
                Some(Err(e)) => Inbound::Fault(e),
                None => Inbound::Eof,
            },
        }
    }

    /// Close the connection and drop the session from the table.
    /// Safe against a concurrent termination by the idle scanner.
    async fn teardown(&self, reason: DisconnectReason) {
        self.session.terminate(None).await;

        if self.registry.unregister(self.session.id()).is_some() {
            info!(
                event = "session_closed",
                session_id = %self.session.id(),
                username = %self.session.username(),
                peer = %self.session.addr(),
                messages = self.session.messages_received(),
                reason = %reason,
                "Closed session"
            );
        }
    }
}

/// Decode one frame, replacing invalid UTF-8 and dropping a trailing `\r`
fn decode_line(frame: &[u8]) -> String {
    let frame = frame.strip_suffix(b"\r").unwrap_or(frame);
    String::from_utf8_lossy(frame).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{CommandContext, dispatcher};
    use crate::storage::Storage;
    use tempfile::TempDir;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
    use tokio::task::JoinHandle;
    use tokio_util::sync::CancellationToken;

    struct Harness {
        registry: Arc<SessionRegistry>,
        session: Arc<Session>,
        client_reader: BufReader<ReadHalf<DuplexStream>>,
        client_writer: WriteHalf<DuplexStream>,
        handler: JoinHandle<DisconnectReason>,
        shutdown: CancellationToken,
        _dir: TempDir,
    }

    impl Harness {
        async fn start(idle_timeout: Duration) -> Self {
            let dir = TempDir::new().unwrap();
            let storage = Arc::new(Storage::open(dir.path()).await.unwrap());
            let registry = Arc::new(SessionRegistry::new(4));
            let (queues, dispatcher) = dispatcher(
                CommandContext::new(storage, Arc::clone(&registry)),
                Duration::from_millis(5),
                Duration::from_secs(5),
            );
            let shutdown = CancellationToken::new();
            tokio::spawn(dispatcher.run(shutdown.clone()));

            let (client, server) = tokio::io::duplex(64 * 1024);
            let (server_read, server_write) = tokio::io::split(server);
            let (client_read, client_write) = tokio::io::split(client);

            let session = Arc::new(Session::new(
                registry.next_id(),
                "127.0.0.1:4000".parse().unwrap(),
                Box::new(server_write),
                shutdown.child_token(),
            ));
            registry.register(Arc::clone(&session));

            let handler = ConnectionHandler::new(
                Arc::clone(&session),
                server_read,
                queues,
                Arc::clone(&registry),
                idle_timeout,
                4096,
            );

            Self {
                registry,
                session,
                client_reader: BufReader::new(client_read),
                client_writer: client_write,
                handler: tokio::spawn(handler.run()),
                shutdown,
                _dir: dir,
            }
        }

        async fn send(&mut self, line: &str) {
            self.client_writer
                .write_all(format!("{line}\n").as_bytes())
                .await
                .unwrap();
        }

        async fn recv(&mut self) -> Option<String> {
            let mut line = String::new();
            let n = self.client_reader.read_line(&mut line).await.unwrap();
            (n > 0).then(|| line.trim_end().to_string())
        }
    }

    #[tokio::test]
    async fn test_handshake_and_command() {
        let mut h = Harness::start(Duration::from_secs(30)).await;

        h.send("HELLO alice admin").await;
        assert_eq!(h.recv().await.unwrap(), "WELCOME alice. Role=Administrator");

        h.send("/upload a.txt aGk=").await;
        assert_eq!(h.recv().await.unwrap(), "OK:Uploaded");
        h.send("/list").await;
        assert_eq!(h.recv().await.unwrap(), "a.txt");
        assert_eq!(h.session.messages_received(), 2);

        h.client_writer.shutdown().await.unwrap();
        drop(h.client_writer);
        assert_eq!(h.handler.await.unwrap(), DisconnectReason::ClientClosed);
        assert!(h.registry.is_empty());
        assert!(!h.session.is_connected());
        h.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_bad_handshake_closes_without_reply() {
        let mut h = Harness::start(Duration::from_secs(30)).await;

        h.send("/list").await;
        assert_eq!(h.recv().await, None);
        assert_eq!(h.handler.await.unwrap(), DisconnectReason::BadHandshake);
        assert!(h.registry.is_empty());
        h.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_early_close_is_bad_handshake() {
        let mut h = Harness::start(Duration::from_secs(30)).await;

        h.client_writer.shutdown().await.unwrap();
        drop(h.client_writer);
        assert_eq!(h.handler.await.unwrap(), DisconnectReason::BadHandshake);
        assert!(h.registry.is_empty());
        h.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_idle_timeout_sends_notice() {
        let mut h = Harness::start(Duration::from_millis(200)).await;

        h.send("HELLO bob readonly").await;
        assert_eq!(h.recv().await.unwrap(), "WELCOME bob. Role=ReadOnly");

        assert_eq!(h.recv().await.unwrap(), TIMEOUT_NOTICE);
        assert_eq!(h.recv().await, None);
        assert_eq!(h.handler.await.unwrap(), DisconnectReason::IdleTimeout);
        assert!(h.registry.is_empty());
        h.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_external_termination_stops_reader() {
        let mut h = Harness::start(Duration::from_secs(30)).await;
        h.send("HELLO carol admin").await;
        h.recv().await.unwrap();

        // What the idle scanner does
        assert!(h.session.terminate(Some(TIMEOUT_NOTICE)).await);

        assert_eq!(h.recv().await.unwrap(), TIMEOUT_NOTICE);
        assert_eq!(h.handler.await.unwrap(), DisconnectReason::Closed);
        assert!(h.registry.is_empty());
        h.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_invalid_utf8_keeps_session() {
        let mut h = Harness::start(Duration::from_secs(30)).await;
        h.send("HELLO erin admin").await;
        h.recv().await.unwrap();

        h.client_writer
            .write_all(b"/read caf\xe9.txt\r\n")
            .await
            .unwrap();
        assert_eq!(h.recv().await.unwrap(), "ERR:File not found");

        h.send("/list").await;
        assert_eq!(h.recv().await.unwrap(), "");
        assert!(h.session.is_connected());
        assert_eq!(h.session.messages_received(), 2);
        h.shutdown.cancel();
    }

    #[test]
    fn test_decode_line() {
        assert_eq!(decode_line(b"/list\r"), "/list");
        assert_eq!(decode_line(b"caf\xe9"), "caf\u{fffd}");
        assert_eq!(decode_line(b""), "");
    }

    #[tokio::test]
    async fn test_overlong_line_terminates() {
        let mut h = Harness::start(Duration::from_secs(30)).await;
        h.send("HELLO dave admin").await;
        h.recv().await.unwrap();

        let long = format!("/upload big.txt {}", "A".repeat(8192));
        h.send(&long).await;
        assert_eq!(h.handler.await.unwrap(), DisconnectReason::LineTooLong);
        h.shutdown.cancel();
    }
}
