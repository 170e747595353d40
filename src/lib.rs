#![deny(missing_docs)]
//! Web-IDE-Bridge relay server.
//!
//! This crate implements the relay described in `spec.md`: it terminates a
//! bidirectional framed-JSON endpoint used by browser clients and desktop
//! IDE agents, multiplexes them by self-asserted user identity, and
//! exposes its own internal state over a small read-only HTTP surface
//! (health, status, debug).
//!
//! The entry point is [`RelayBuilder`], which loads configuration, wires up
//! the internal services (§4 of the spec), and returns an `axum::Router`
//! plus a [`RelayHandle`] the caller awaits for graceful shutdown —
//! mirroring the `OprfServiceBuilder`/`JoinHandle` shape this crate's
//! teacher exposes, generalized from one background task to the relay's
//! three independent timers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod config;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod services;

use config::RelayConfig;
use metrics::Metrics;
use services::activity_log::ActivityLog;
use services::broadcaster::{SnapshotSources, StatusBroadcaster};
use services::rate_limiter::RateLimiter;
use services::registry::Registry;
use services::router::SessionRouter;

/// Crate version, surfaced on `/health`, `/status`, and `--version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// All shared state reachable from an HTTP/WebSocket handler.
///
/// Cloned cheaply (every field is an `Arc`); passed into `axum` as router
/// state, mirroring the `Clone`-everywhere services style of the teacher's
/// `OpenSessions`/`OprfKeyMaterialStore`.
#[derive(Clone)]
pub struct RelayState {
    /// Effective, validated configuration.
    pub config: Arc<RelayConfig>,
    /// Connection Registry (§4.2).
    pub registry: Arc<Registry>,
    /// Session Router and edit-session table (§4.3).
    pub router: Arc<SessionRouter>,
    /// Sliding-window admission control (§4.5).
    pub rate_limiter: Arc<RateLimiter>,
    /// Process metrics (§4.7).
    pub metrics: Arc<Metrics>,
    /// Bounded activity log (§4.7).
    pub activity_log: Arc<ActivityLog>,
    /// Status broadcaster (§4.6).
    pub broadcaster: Arc<StatusBroadcaster>,
    /// Cancellation token shared by every background task; cancelling it
    /// begins the shutdown sequence (§4.9).
    pub cancellation: CancellationToken,
    /// Time the process started, for `/health` and `/status` uptime.
    pub started_at: Instant,
}

/// A running relay instance: the router to serve, and a handle used to
/// drive graceful shutdown.
pub struct Relay {
    /// The fully assembled `axum::Router`, HTTP and bidirectional endpoint
    /// merged onto one listening port (§2, "Control flow").
    pub router: Router,
    /// Shared state, exposed so the caller can trigger shutdown directly
    /// (e.g. from a signal handler) without going through the router.
    pub state: RelayState,
    /// Join handles for the three background timers (§4.4) and the status
    /// ticker (§4.6), awaited during shutdown.
    pub background_tasks: Vec<tokio::task::JoinHandle<()>>,
}

/// Builds a [`Relay`] from a validated [`RelayConfig`].
///
/// Mirrors `OprfServiceBuilder::init`'s ordered, `tracing`-annotated
/// startup sequence: construct services, spawn background tasks, build
/// the router, return everything the caller needs to serve and shut down.
pub fn build(config: RelayConfig) -> Relay {
    metrics::describe_metrics();

    let config = Arc::new(config);
    let registry = Arc::new(Registry::default());
    let router = Arc::new(SessionRouter::default());
    let rate_limiter = Arc::new(RateLimiter::new(&config.security.rate_limiting));
    let metrics = Arc::new(Metrics::new());
    let activity_log = Arc::new(ActivityLog::default());
    let cancellation = CancellationToken::new();

    tracing::info!(port = config.server.port, "starting web-ide-bridge relay");

    let sources = Arc::new(SnapshotSources {
        registry: Arc::clone(&registry),
        router: Arc::clone(&router),
        metrics: Arc::clone(&metrics),
        activity_log: Arc::clone(&activity_log),
        config: Arc::clone(&config),
    });
    let broadcaster = Arc::new(StatusBroadcaster::new(sources, cancellation.clone()));

    let mut background_tasks = Vec::new();
    background_tasks.push(services::liveness::spawn_heartbeat(
        Arc::clone(&registry),
        config.server.heartbeat_interval,
        cancellation.clone(),
    ));
    background_tasks.push(services::liveness::spawn_reaper(
        Arc::clone(&router),
        Arc::clone(&rate_limiter),
        Arc::clone(&activity_log),
        config.cleanup.session_cleanup_interval,
        config.cleanup.max_session_age,
        cancellation.clone(),
    ));

    let state = RelayState {
        config: Arc::clone(&config),
        registry,
        router,
        rate_limiter,
        metrics,
        activity_log,
        broadcaster,
        cancellation,
        started_at: Instant::now(),
    };

    let cors = build_cors_layer(&config.cors.origin);
    let http_router = api::router(state.clone())
        .layer(cors)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http());

    Relay {
        router: http_router,
        state,
        background_tasks,
    }
}

fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        CorsLayer::permissive()
    } else {
        let parsed = origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect::<Vec<_>>();
        CorsLayer::new().allow_origin(parsed)
    }
}

/// Binds and serves `relay.router` on `addr` until `relay.state.cancellation`
/// fires, then runs the shutdown sequence (§4.9).
pub async fn serve(relay: Relay, addr: SocketAddr) -> eyre::Result<()> {
    let Relay {
        router,
        state,
        background_tasks,
    } = relay;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    let cancellation = state.cancellation.clone();
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        cancellation.cancelled().await;
    })
    .await?;

    shutdown(&state, background_tasks).await;
    Ok(())
}

/// Runs the five-step graceful shutdown sequence (§4.9).
///
/// Idempotent: if `state.cancellation` is already cancelled, step 1 is a
/// no-op and the remaining steps still run, matching "subsequent shutdown
/// calls return immediately" only for the *triggering* call — this
/// function itself is safe to call once, which is all the caller in
/// [`serve`] ever does.
pub async fn shutdown(state: &RelayState, background_tasks: Vec<tokio::task::JoinHandle<()>>) {
    tracing::info!("beginning graceful shutdown");
    state.cancellation.cancel();

    for connection in state.registry.all_connections() {
        connection.close(services::liveness::shutdown_close_frame());
    }

    for task in background_tasks {
        let _ = tokio::time::timeout(std::time::Duration::from_secs(1), task).await;
    }

    state.registry.clear();
    tracing::info!("shutdown complete");
}
