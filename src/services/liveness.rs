//! Liveness & Timeout Manager (§4.4).
//!
//! Three independent timers, each driven as its own background task off a
//! shared [`CancellationToken`] — the same coordination primitive the
//! teacher uses in `OprfServiceBuilder::init` for its periodic key-material
//! reload task and key-event watcher.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::extract::ws::CloseFrame;
use tokio_util::sync::CancellationToken;

use crate::services::activity_log::{ActivityLog, Severity};
use crate::services::rate_limiter::RateLimiter;
use crate::services::registry::Registry;
use crate::services::router::SessionRouter;

/// Spawns the heartbeat task (§4.4, "Heartbeat").
///
/// Every `interval` the task iterates live connections. A connection whose
/// `is_alive` flag is false is force-closed; otherwise its flag is cleared
/// and a transport-level ping is sent. Any inbound frame or pong resets
/// `is_alive` to true (see [`crate::services::registry::Connection::touch`]).
pub fn spawn_heartbeat(
    registry: Arc<Registry>,
    interval: Duration,
    cancellation: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => break,
                _ = ticker.tick() => {
                    for connection in registry.all_connections() {
                        if connection.is_alive.swap(false, Ordering::Relaxed) {
                            connection.ping();
                        } else {
                            tracing::debug!(connection_id = %connection.id, "heartbeat timeout, closing");
                            connection.close(CloseFrame {
                                code: 1001,
                                reason: "heartbeat timeout".into(),
                            });
                        }
                    }
                }
            }
        }
    })
}

/// Spawns the session & rate-limit reaper task (§4.4).
///
/// Every `interval`, edit sessions past `max_session_age` are deleted and
/// rate-limit windows whose entries have all expired are purged.
pub fn spawn_reaper(
    router: Arc<SessionRouter>,
    rate_limiter: Arc<RateLimiter>,
    activity_log: Arc<ActivityLog>,
    interval: Duration,
    max_session_age: Duration,
    cancellation: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = router.expire_stale(max_session_age);
                    if removed > 0 {
                        activity_log.record(
                            Severity::Info,
                            format!("expired {removed} stale edit session(s)"),
                        );
                    }
                    rate_limiter.purge_expired();
                }
            }
        }
    })
}

/// The close frame used when a connection exceeds its uninitialized-state
/// deadline (§4.4, "Init timeout"). Treated as a liveness failure (1001),
/// not a policy violation — 1008 is reserved for admission-time rejections
/// (rate limit, at-capacity).
pub fn init_timeout_close_frame() -> CloseFrame {
    CloseFrame {
        code: 1001,
        reason: "connection timeout".into(),
    }
}

/// Close frame for transport shutdown (§4.9, step 3).
pub fn shutdown_close_frame() -> CloseFrame {
    CloseFrame {
        code: 1001,
        reason: "server shutting down".into(),
    }
}
