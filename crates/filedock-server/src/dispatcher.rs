//! Command dispatcher
//!
//! A single worker drains two queues, admin-priority first, and executes
//! every command against the storage root one at a time. Connection handlers
//! only enqueue; parsing, the permission check and execution all happen here.
//!
//! Each poll waits at most `poll_window` on the admin queue and then at most
//! `poll_window` on the standard queue. Admin commands therefore win whenever
//! both queues hold work at poll time; a standard command already taken is
//! never preempted.

use crate::registry::SessionRegistry;
use crate::session::Session;
use crate::storage::Storage;
use crate::{Error, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use filedock_core::protocol::{LIST_SEPARATOR, OK_DELETED, OK_UPLOADED, SEARCH_PREFIX};
use filedock_core::{READ_SENTINEL, Request, Verb, format_download};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// One inbound protocol line awaiting execution
#[derive(Debug)]
pub struct Command {
    session: Arc<Session>,
    line: String,
    enqueued_at: Instant,
}

impl Command {
    /// Queue entry for `line` from `session`, stamped now
    pub fn new(session: Arc<Session>, line: impl Into<String>) -> Self {
        Self {
            session,
            line: line.into(),
            enqueued_at: Instant::now(),
        }
    }
}

/// Producer side of the two command queues, cloned into every connection handler
#[derive(Debug, Clone)]
pub struct CommandQueues {
    admin: mpsc::UnboundedSender<Command>,
    standard: mpsc::UnboundedSender<Command>,
}

impl CommandQueues {
    /// Route a command to the admin or standard queue by the session's role
    pub fn submit(&self, command: Command) -> Result<()> {
        let queue = if command.session.role().is_admin() {
            &self.admin
        } else {
            &self.standard
        };

        queue
            .send(command)
            .map_err(|_| Error::connection("command dispatcher has stopped"))
    }
}

/// Everything a command needs to run
#[derive(Debug, Clone)]
pub struct CommandContext {
    storage: Arc<Storage>,
    registry: Arc<SessionRegistry>,
}

impl CommandContext {
    /// Context shared by every command
    pub fn new(storage: Arc<Storage>, registry: Arc<SessionRegistry>) -> Self {
        Self { storage, registry }
    }

    /// Parse, authorize and run one command line, returning the reply lines.
    ///
    /// The permission check uses only the verb's entry in the command table
    /// and runs before the arguments are parsed.
    pub async fn execute(&self, session: &Session, line: &str) -> Result<Vec<String>> {
        let (verb, args) = Verb::split(line)?;

        if !session.role().permits(verb.required_access()) {
            return Err(Error::PermissionDenied(verb.keyword().to_string()));
        }

        match Request::from_parts(verb, args)? {
            Request::List => {
                let names = self.storage.list().await?;
                Ok(vec![join_names(&names)])
            }
            Request::Read { name } => {
                let mut lines = self.storage.read_lines(&name).await?;
                lines.push(READ_SENTINEL.to_string());
                Ok(lines)
            }
            Request::Upload { name, payload } => {
                let bytes = STANDARD
                    .decode(payload.as_bytes())
                    .map_err(|e| Error::BadPayload(e.to_string()))?;
                self.storage.write(&name, &bytes).await?;
                self.registry.record_upload(session, bytes.len() as u64);
                Ok(vec![OK_UPLOADED.to_string()])
            }
            Request::Download { name } => {
                let bytes = self.storage.read(&name).await?;
                let encoded = STANDARD.encode(&bytes);
                self.registry.record_download(session, bytes.len() as u64);
                Ok(vec![format_download(&name, &encoded)])
            }
            Request::Delete { name } => {
                self.storage.delete(&name).await?;
                Ok(vec![OK_DELETED.to_string()])
            }
            Request::Search { keyword } => {
                let names = self.storage.search(&keyword).await?;
                Ok(vec![format!("{SEARCH_PREFIX}{}", join_names(&names))])
            }
            Request::Info { name } => {
                let info = self.storage.info(&name).await?;
                Ok(vec![info.reply_line()])
            }
            Request::Stats => Ok(vec![self.registry.snapshot().reply_line()]),
        }
    }
}

fn join_names(names: &[String]) -> String {
    names.join(&LIST_SEPARATOR.to_string())
}

/// Consumer side of the command queues
#[derive(Debug)]
pub struct Dispatcher {
    admin: mpsc::UnboundedReceiver<Command>,
    standard: mpsc::UnboundedReceiver<Command>,
    admin_open: bool,
    standard_open: bool,
    context: CommandContext,
    poll_window: Duration,
    reply_timeout: Duration,
}

enum Poll {
    Command(Command),
    Empty,
    Closed,
}

/// Create the queue pair and the dispatcher that drains it
pub fn dispatcher(
    context: CommandContext,
    poll_window: Duration,
    reply_timeout: Duration,
) -> (CommandQueues, Dispatcher) {
    let (admin_tx, admin_rx) = mpsc::unbounded_channel();
    let (standard_tx, standard_rx) = mpsc::unbounded_channel();

    let queues = CommandQueues {
        admin: admin_tx,
        standard: standard_tx,
    };
    let dispatcher = Dispatcher {
        admin: admin_rx,
        standard: standard_rx,
        admin_open: true,
        standard_open: true,
        context,
        poll_window,
        reply_timeout,
    };

    (queues, dispatcher)
}

impl Dispatcher {
    /// Run until `shutdown` fires or every producer is gone
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            event = "dispatcher_started",
            poll_window_ms = self.poll_window.as_millis() as u64,
            "Command dispatcher running"
        );

        loop {
            let poll = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                poll = self.poll() => poll,
            };

            match poll {
                Poll::Command(command) => self.dispatch(command).await,
                Poll::Empty => {}
                Poll::Closed => break,
            }
        }

        info!(event = "dispatcher_stopped", "Command dispatcher stopped");
    }

    async fn poll(&mut self) -> Poll {
        if self.admin_open {
            match timeout(self.poll_window, self.admin.recv()).await {
                Ok(Some(command)) => return Poll::Command(command),
                Ok(None) => self.admin_open = false,
                Err(_) => {}
            }
        }

        if self.standard_open {
            match timeout(self.poll_window, self.standard.recv()).await {
                Ok(Some(command)) => return Poll::Command(command),
                Ok(None) => self.standard_open = false,
                Err(_) => {}
            }
        }

        if self.admin_open || self.standard_open {
            Poll::Empty
        } else {
            Poll::Closed
        }
    }

    /// Execute one command and write its reply.
    ///
    /// Execution runs in its own task which is awaited before returning, so
    /// commands stay serialized while a panic only costs that one command.
    async fn dispatch(&self, command: Command) {
        let Command {
            session,
            line,
            enqueued_at,
        } = command;

        if !session.is_connected() {
            debug!(session_id = %session.id(), "Dropping command for closed session");
            return;
        }

        let verb = line.split_whitespace().next().unwrap_or_default().to_string();
        let queued_ms = enqueued_at.elapsed().as_millis() as u64;
        let started = Instant::now();

        let context = self.context.clone();
        let task_session = Arc::clone(&session);
        let outcome =
            tokio::spawn(async move { context.execute(&task_session, &line).await }).await;

        let lines = match outcome {
            Ok(Ok(lines)) => {
                debug!(
                    event = "command_completed",
                    session_id = %session.id(),
                    username = %session.username(),
                    verb = %verb,
                    queued_ms,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Command completed"
                );
                lines
            }
            Ok(Err(e)) => {
                if e.is_client_error() {
                    debug!(
                        event = "command_rejected",
                        session_id = %session.id(),
                        verb = %verb,
                        error = %e,
                        "Command rejected"
                    );
                } else {
                    warn!(
                        event = "command_failed",
                        session_id = %session.id(),
                        verb = %verb,
                        error = %e,
                        "Command failed"
                    );
                }
                vec![e.reply_line()]
            }
            Err(e) => {
                error!(
                    event = "command_panicked",
                    session_id = %session.id(),
                    verb = %verb,
                    error = %e,
                    "Command execution aborted"
                );
                vec![Error::Other(e.to_string()).reply_line()]
            }
        };

        match timeout(self.reply_timeout, session.send_lines(&lines)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(session_id = %session.id(), error = %e, "Reply dropped");
            }
            Err(_) => {
                warn!(
                    event = "reply_timeout",
                    session_id = %session.id(),
                    timeout_secs = self.reply_timeout.as_secs(),
                    "Client stopped reading replies, disconnecting"
                );
                session.terminate(None).await;
            }
        }
    }
}
