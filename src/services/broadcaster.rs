//! Status Broadcaster (§4.6).
//!
//! A single shared 1 Hz ticker, armed only while the observer set is
//! non-empty, pushes a [`StatusSnapshot`] to every subscribed observer.
//! Grounded on the teacher's per-connection `on_upgrade` task idiom in
//! `api::oprf`: each observer is driven by its own task, here reading
//! ticks off a `tokio::sync::broadcast` channel rather than performing a
//! single request/response exchange.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::RelayConfig;
use crate::services::activity_log::{ActivityLog, LogEntry};
use crate::services::registry::{Registry, RegistryCounts};
use crate::services::router::SessionRouter;
use crate::{VERSION, metrics::Metrics};

/// Broadcast capacity; slow observers that fall behind this many ticks
/// simply miss frames rather than block the ticker (§5, "Backpressure").
const CHANNEL_CAPACITY: usize = 8;

/// Point-in-time status payload (§2 Glossary, "Snapshot").
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    /// Connection counts by role, plus distinct-user count.
    pub connections: RegistryCounts,
    /// Currently active edit sessions.
    pub edit_sessions_active: usize,
    /// Process metrics.
    pub metrics: crate::metrics::MetricsSnapshot,
    /// Recent activity log entries, newest-first.
    pub recent_activity: Vec<LogEntry>,
    /// Selected effective configuration values.
    pub config: StatusConfigSummary,
    /// Relay version string.
    pub version: &'static str,
}

/// The subset of configuration surfaced on `/status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusConfigSummary {
    /// Bidirectional endpoint path.
    pub websocket_endpoint: String,
    /// Heartbeat period, in milliseconds.
    pub heartbeat_interval_ms: u128,
    /// Whether rate limiting is enabled.
    pub rate_limiting_enabled: bool,
    /// Whether CRLF/CR normalization is enabled.
    pub normalize_line_endings: bool,
}

/// Shared state needed to build one [`StatusSnapshot`].
pub struct SnapshotSources {
    pub registry: Arc<Registry>,
    pub router: Arc<SessionRouter>,
    pub metrics: Arc<Metrics>,
    pub activity_log: Arc<ActivityLog>,
    pub config: Arc<RelayConfig>,
}

impl SnapshotSources {
    /// Builds one point-in-time [`StatusSnapshot`].
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            connections: self.registry.counts(),
            edit_sessions_active: self.router.active_count(),
            metrics: self.metrics.snapshot(),
            recent_activity: self.activity_log.recent(ActivityLogLimit::DEFAULT),
            config: StatusConfigSummary {
                websocket_endpoint: self.config.server.websocket_endpoint.clone(),
                heartbeat_interval_ms: self.config.server.heartbeat_interval.as_millis(),
                rate_limiting_enabled: self.config.security.rate_limiting.enabled,
                normalize_line_endings: self.config.normalize_line_endings,
            },
            version: VERSION,
        }
    }
}

struct ActivityLogLimit;
impl ActivityLogLimit {
    const DEFAULT: usize = 20;
}

/// The broadcaster: owns the arm/disarm state and the shared ticker task.
pub struct StatusBroadcaster {
    sender: broadcast::Sender<StatusSnapshot>,
    sources: Arc<SnapshotSources>,
}

impl StatusBroadcaster {
    /// Creates a broadcaster and spawns its ticker task.
    ///
    /// Every tick refreshes the connection-count and active-session gauges
    /// regardless of the observer set; building and broadcasting a full
    /// snapshot only happens while at least one observer is attached
    /// (§4.6).
    pub fn new(sources: Arc<SnapshotSources>, cancellation: CancellationToken) -> Self {
        let (sender, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        let task_sender = sender.clone();
        let ticker_sources = Arc::clone(&sources);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = cancellation.cancelled() => break,
                    _ = ticker.tick() => {
                        let counts = ticker_sources.registry.counts();
                        metrics::gauge!(crate::metrics::METRICS_ID_CONNECTIONS_BROWSER)
                            .set(counts.browsers as f64);
                        metrics::gauge!(crate::metrics::METRICS_ID_CONNECTIONS_DESKTOP)
                            .set(counts.desktops as f64);
                        metrics::gauge!(crate::metrics::METRICS_ID_CONNECTIONS_OBSERVER)
                            .set(counts.observers as f64);
                        metrics::gauge!(crate::metrics::METRICS_ID_EDIT_SESSIONS_ACTIVE)
                            .set(ticker_sources.router.active_count() as f64);

                        if !ticker_sources.registry.has_observers() {
                            continue;
                        }
                        let snapshot = ticker_sources.snapshot();
                        let _ = task_sender.send(snapshot);
                    }
                }
            }
        });
        Self { sender, sources }
    }

    /// Subscribes a new observer's connection task to the broadcast
    /// channel. Pair with [`StatusBroadcaster::snapshot`] to send the
    /// synchronous initial frame on `status_connect` (§4.6) before the next
    /// tick arrives.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusSnapshot> {
        self.sender.subscribe()
    }

    /// Builds a fresh snapshot on demand, independent of the 1 Hz ticker.
    pub fn snapshot(&self) -> StatusSnapshot {
        self.sources.snapshot()
    }
}
