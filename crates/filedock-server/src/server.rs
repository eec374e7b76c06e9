//! Filedock server: admission control and lifecycle
//!
//! The accept loop admits connections up to the configured capacity and
//! spawns a [`ConnectionHandler`] per session. The dispatcher, idle scanner
//! and stats aggregator run alongside it as background tasks. Cancelling the
//! shutdown token stops the accept loop, terminates every live session and
//! waits for the background tasks.

use crate::connection::ConnectionHandler;
use crate::dispatcher::{CommandContext, CommandQueues, Dispatcher, dispatcher};
use crate::monitor::{IdleScanner, StatsAggregator};
use crate::registry::SessionRegistry;
use crate::session::Session;
use crate::storage::Storage;
use crate::{Config, Error, Result};
use filedock_core::BUSY_REPLY;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Bound on the whole exchange with a refused connection
const REJECT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Filedock server
pub struct Server {
    config: Arc<Config>,
    listener: TcpListener,
    storage: Arc<Storage>,
    registry: Arc<SessionRegistry>,
    shutdown: CancellationToken,
}

impl Server {
    /// Validate the configuration, open the storage root and bind the listener
    pub async fn bind(config: Config) -> Result<Self> {
        config.validate()?;

        let storage = Arc::new(Storage::open(&config.root_dir).await?);
        let listener = TcpListener::bind(config.bind_addr()).await.map_err(|e| {
            Error::Connection(format!("Failed to bind {}: {}", config.bind_addr(), e))
        })?;
        let registry = Arc::new(SessionRegistry::new(config.max_connections));

        Ok(Self {
            config: Arc::new(config),
            listener,
            storage,
            registry,
            shutdown: CancellationToken::new(),
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Shared session table
    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Token that stops the server when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until the shutdown token is cancelled
    pub async fn run(self) -> Result<()> {
        let addr = self.local_addr()?;
        info!(
            event = "server_listening",
            address = %addr,
            root_dir = ?self.storage.root(),
            max_connections = self.config.max_connections,
            idle_timeout_secs = self.config.idle_timeout_secs,
            "Filedock server listening"
        );

        let (queues, dispatcher) = dispatcher(
            CommandContext::new(Arc::clone(&self.storage), Arc::clone(&self.registry)),
            self.config.dispatch_poll(),
            self.config.reply_timeout(),
        );
        let mut background = self.spawn_background(dispatcher);

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.admit(stream, peer, &queues),
                    Err(e) => {
                        warn!(event = "accept_failed", error = %e, "Failed to accept connection");
                    }
                },
                Some(finished) = background.join_next() => {
                    // Background tasks only return after shutdown
                    error!(
                        event = "background_task_exited",
                        result = ?finished,
                        "Background task exited early"
                    );
                    self.shutdown.cancel();
                    break;
                }
            }
        }

        self.shutdown.cancel();
        drop(queues);
        self.close_sessions().await;

        while let Some(result) = background.join_next().await {
            if let Err(e) = result {
                error!(event = "background_task_failed", error = %e, "Background task panicked");
            }
        }

        info!(event = "server_stopped", "Filedock server stopped");
        Ok(())
    }

    fn spawn_background(&self, dispatcher: Dispatcher) -> JoinSet<()> {
        let mut tasks = JoinSet::new();

        tasks.spawn(dispatcher.run(self.shutdown.clone()));
        tasks.spawn(
            IdleScanner::new(
                Arc::clone(&self.registry),
                self.config.idle_timeout(),
                self.config.scan_interval(),
            )
            .run(self.shutdown.clone()),
        );
        tasks.spawn(
            StatsAggregator::new(
                Arc::clone(&self.registry),
                self.config.stats_interval(),
                self.config.logging.format,
            )
            .run(self.shutdown.clone()),
        );

        tasks
    }

    /// Admission decision for one accepted socket
    fn admit(&self, stream: TcpStream, peer: SocketAddr, queues: &CommandQueues) {
        if !self.registry.has_capacity() {
            self.registry.record_rejected();
            warn!(
                event = "session_rejected",
                peer = %peer,
                active = self.registry.active_count(),
                max_connections = self.registry.capacity(),
                "Refused connection, server at capacity"
            );
            tokio::spawn(reject(stream, peer));
            return;
        }

        let (reader, writer) = stream.into_split();
        let session = Arc::new(Session::new(
            self.registry.next_id(),
            peer,
            Box::new(writer),
            self.shutdown.child_token(),
        ));
        self.registry.register(Arc::clone(&session));

        info!(
            event = "session_accepted",
            session_id = %session.id(),
            peer = %peer,
            active = self.registry.active_count(),
            "Accepted connection"
        );

        let handler = ConnectionHandler::new(
            session,
            reader,
            queues.clone(),
            Arc::clone(&self.registry),
            self.config.idle_timeout(),
            self.config.max_line_length,
        );
        tokio::spawn(handler.run());
    }

    async fn close_sessions(&self) {
        let sessions = self.registry.sessions();
        let count = sessions.len();

        for session in sessions {
            session.terminate(None).await;
            self.registry.unregister(session.id());
        }

        if count > 0 {
            info!(event = "sessions_closed", count, "Closed remaining sessions");
        }
    }
}

/// Tell a refused peer the server is busy, then close.
///
/// Input the peer already sent is drained until it hangs up, so the close
/// does not reset the connection before the BUSY line is read.
async fn reject(mut stream: TcpStream, peer: SocketAddr) {
    let exchange = async {
        stream.write_all(format!("{BUSY_REPLY}\n").as_bytes()).await?;
        stream.shutdown().await?;
        tokio::io::copy(&mut stream, &mut tokio::io::sink()).await?;
        Ok::<(), std::io::Error>(())
    };

    match tokio::time::timeout(REJECT_WRITE_TIMEOUT, exchange).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(peer = %peer, error = %e, "Failed to send BUSY reply"),
        Err(_) => debug!(peer = %peer, "Refused peer did not hang up in time"),
    }
}
