//! Periodic sweeps over the session table
//!
//! The idle scanner disconnects sessions that have been silent for longer
//! than the idle timeout. It races the connection handler's own deadline;
//! whichever fires first terminates the session and the other observes a
//! closed session. The stats aggregator only reads; its per-client detail
//! follows the configured log format.

use crate::config::LogFormat;
use crate::registry::SessionRegistry;
use crate::stats::StatsSnapshot;
use filedock_core::TIMEOUT_NOTICE;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Disconnects sessions idle past the timeout
#[derive(Debug, Clone)]
pub struct IdleScanner {
    registry: Arc<SessionRegistry>,
    idle_timeout: Duration,
    period: Duration,
}

impl IdleScanner {
    /// Scanner closing sessions silent for longer than `idle_timeout`
    pub fn new(registry: Arc<SessionRegistry>, idle_timeout: Duration, period: Duration) -> Self {
        Self {
            registry,
            idle_timeout,
            period,
        }
    }

    /// Sweep every `period` until `shutdown` fires
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let closed = self.scan_once().await;
                    if closed > 0 {
                        debug!(closed, "Idle scan disconnected sessions");
                    }
                }
            }
        }
    }

    /// One sweep; returns how many sessions this sweep disconnected
    pub async fn scan_once(&self) -> usize {
        let mut closed = 0;

        for session in self.registry.sessions() {
            if !session.is_connected() || session.idle_for() <= self.idle_timeout {
                continue;
            }

            if session.terminate(Some(TIMEOUT_NOTICE)).await {
                info!(
                    event = "idle_timeout",
                    session_id = %session.id(),
                    username = %session.username(),
                    peer = %session.addr(),
                    idle_secs = session.idle_for().as_secs(),
                    "Idle scan disconnecting session"
                );
                closed += 1;
            }
        }

        closed
    }
}

/// Logs a traffic report every period
#[derive(Debug, Clone)]
pub struct StatsAggregator {
    registry: Arc<SessionRegistry>,
    period: Duration,
    format: LogFormat,
}

impl StatsAggregator {
    /// Aggregator reporting every `period` with detail in `format`
    pub fn new(registry: Arc<SessionRegistry>, period: Duration, format: LogFormat) -> Self {
        Self {
            registry,
            period,
            format,
        }
    }

    /// Report every `period` until `shutdown` fires
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.report();
                }
            }
        }
    }

    /// Take a snapshot and log it
    pub fn report(&self) -> StatsSnapshot {
        let snapshot = self.registry.snapshot();

        info!(
            event = "stats_report",
            active_sessions = snapshot.active_sessions,
            bytes_received = snapshot.bytes_received,
            bytes_sent = snapshot.bytes_sent,
            connections_accepted = snapshot.connections_accepted,
            connections_rejected = snapshot.connections_rejected,
            "{}",
            snapshot.summary()
        );
        match self.detail(&snapshot) {
            Ok(detail) => info!(event = "stats_detail", "{detail}"),
            Err(e) => warn!(error = %e, "Failed to serialize stats report"),
        }

        snapshot
    }

    /// Per-client detail: the text report, or one line of JSON
    fn detail(&self, snapshot: &StatsSnapshot) -> serde_json::Result<String> {
        match self.format {
            LogFormat::Text => Ok(snapshot.render()),
            LogFormat::Json => snapshot.to_json(),
        }
    }
}
