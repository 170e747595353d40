//! Metrics definitions for the relay.
//!
//! Mirrors the teacher's `metrics.rs`: namespaced constant keys plus a
//! [`describe_metrics`] helper that registers metadata with the `metrics`
//! crate facade. This module adds a local [`Snapshot`] reader so `/status`
//! and `/debug` can expose counters without a separate metrics backend.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Metrics key for total connections accepted since start.
pub const METRICS_ID_CONNECTIONS_TOTAL: &str = "web_ide_bridge.relay.connections.total";
/// Metrics key for the number of live browser connections.
pub const METRICS_ID_CONNECTIONS_BROWSER: &str = "web_ide_bridge.relay.connections.browser";
/// Metrics key for the number of live desktop connections.
pub const METRICS_ID_CONNECTIONS_DESKTOP: &str = "web_ide_bridge.relay.connections.desktop";
/// Metrics key for the number of live status observers.
pub const METRICS_ID_CONNECTIONS_OBSERVER: &str = "web_ide_bridge.relay.connections.observer";
/// Metrics key for total edit sessions ever created.
pub const METRICS_ID_EDIT_SESSIONS_TOTAL: &str = "web_ide_bridge.relay.edit_sessions.total";
/// Metrics key for currently active edit sessions.
pub const METRICS_ID_EDIT_SESSIONS_ACTIVE: &str = "web_ide_bridge.relay.edit_sessions.active";
/// Metrics key for total messages processed.
pub const METRICS_ID_MESSAGES_PROCESSED: &str = "web_ide_bridge.relay.messages.processed";
/// Metrics key for total errors emitted.
pub const METRICS_ID_ERRORS_TOTAL: &str = "web_ide_bridge.relay.errors.total";
/// Metrics key for connections rejected by the rate limiter.
pub const METRICS_ID_RATE_LIMITED_TOTAL: &str = "web_ide_bridge.relay.rate_limited.total";

/// Registers metric metadata with the `metrics` crate facade.
pub fn describe_metrics() {
    metrics::describe_counter!(
        METRICS_ID_CONNECTIONS_TOTAL,
        metrics::Unit::Count,
        "Total connections accepted since process start"
    );
    metrics::describe_gauge!(
        METRICS_ID_CONNECTIONS_BROWSER,
        metrics::Unit::Count,
        "Currently live browser connections"
    );
    metrics::describe_gauge!(
        METRICS_ID_CONNECTIONS_DESKTOP,
        metrics::Unit::Count,
        "Currently live desktop connections"
    );
    metrics::describe_gauge!(
        METRICS_ID_CONNECTIONS_OBSERVER,
        metrics::Unit::Count,
        "Currently live status observers"
    );
    metrics::describe_counter!(
        METRICS_ID_EDIT_SESSIONS_TOTAL,
        metrics::Unit::Count,
        "Total edit sessions ever created"
    );
    metrics::describe_gauge!(
        METRICS_ID_EDIT_SESSIONS_ACTIVE,
        metrics::Unit::Count,
        "Currently active edit sessions"
    );
    metrics::describe_counter!(
        METRICS_ID_MESSAGES_PROCESSED,
        metrics::Unit::Count,
        "Total messages processed"
    );
    metrics::describe_counter!(
        METRICS_ID_ERRORS_TOTAL,
        metrics::Unit::Count,
        "Total errors encountered while handling messages"
    );
    metrics::describe_counter!(
        METRICS_ID_RATE_LIMITED_TOTAL,
        metrics::Unit::Count,
        "Connections rejected by the rate limiter"
    );
}

/// A process-local counter set, read by `/health`, `/status`, and `/debug`.
///
/// The `metrics` crate facade is for external recorders (Prometheus, etc);
/// this struct additionally keeps plain atomics so the HTTP surface can
/// read its own numbers without depending on a specific recorder being
/// installed.
#[derive(Debug)]
pub struct Metrics {
    started_at: Instant,
    connections_total: AtomicU64,
    edit_sessions_total: AtomicU64,
    messages_processed: AtomicU64,
    errors_total: AtomicU64,
    rate_limited_total: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Creates a fresh counter set with the clock starting now.
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            connections_total: AtomicU64::new(0),
            edit_sessions_total: AtomicU64::new(0),
            messages_processed: AtomicU64::new(0),
            errors_total: AtomicU64::new(0),
            rate_limited_total: AtomicU64::new(0),
        }
    }

    /// Records a newly accepted connection.
    pub fn record_connection(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(METRICS_ID_CONNECTIONS_TOTAL).increment(1);
    }

    /// Records a newly created edit session.
    pub fn record_edit_session_created(&self) {
        self.edit_sessions_total.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(METRICS_ID_EDIT_SESSIONS_TOTAL).increment(1);
    }

    /// Records one processed message.
    pub fn record_message(&self) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(METRICS_ID_MESSAGES_PROCESSED).increment(1);
    }

    /// Records one handler-level error.
    pub fn record_error(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(METRICS_ID_ERRORS_TOTAL).increment(1);
    }

    /// Records one rate-limit rejection.
    pub fn record_rate_limited(&self) {
        self.rate_limited_total.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(METRICS_ID_RATE_LIMITED_TOTAL).increment(1);
    }

    /// Time elapsed since this counter set (and thus the process) started.
    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// A point-in-time snapshot of the plain counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_seconds: self.uptime().as_secs(),
            connections_total: self.connections_total.load(Ordering::Relaxed),
            edit_sessions_total: self.edit_sessions_total.load(Ordering::Relaxed),
            messages_processed: self.messages_processed.load(Ordering::Relaxed),
            errors_total: self.errors_total.load(Ordering::Relaxed),
            rate_limited_total: self.rate_limited_total.load(Ordering::Relaxed),
        }
    }
}

/// Serializable snapshot of [`Metrics`], used by the HTTP surface.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Seconds since process start.
    pub uptime_seconds: u64,
    /// Total connections accepted since start.
    pub connections_total: u64,
    /// Total edit sessions ever created.
    pub edit_sessions_total: u64,
    /// Total messages processed.
    pub messages_processed: u64,
    /// Total errors encountered.
    pub errors_total: u64,
    /// Total connections rejected by the rate limiter.
    pub rate_limited_total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let metrics = Metrics::new();
        metrics.record_connection();
        metrics.record_connection();
        metrics.record_error();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connections_total, 2);
        assert_eq!(snapshot.errors_total, 1);
    }
}
