//! Debug endpoint (§4.8).
//!
//! `GET /web-ide-bridge/debug` dumps internal state verbatim: per-role
//! connection records, per-user session membership, active edit sessions,
//! recent activity, and the effective configuration. Gated on
//! `config.debug || environment == test` — returns `404` otherwise so its
//! presence isn't even observable in production (§4.8, "Non-goals").

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Json;
use serde::Serialize;

use crate::config::RelayConfig;
use crate::metrics::MetricsSnapshot;
use crate::services::activity_log::LogEntry;
use crate::services::registry::{ConnectionRecord, RegistryCounts, UserSessionRecord};
use crate::{RelayState, api};

/// Builds the `/web-ide-bridge/debug` route.
pub fn routes() -> Router<RelayState> {
    Router::new().route(&api::debug_path(), get(debug))
}

#[derive(Debug, Serialize)]
struct DebugResponse {
    connections: RegistryCounts,
    #[serde(rename = "connectionRecords")]
    connection_records: Vec<ConnectionRecord>,
    #[serde(rename = "userSessions")]
    user_sessions: Vec<UserSessionRecord>,
    edit_sessions: Vec<DebugEditSession>,
    rate_limiter_tracked_addresses: usize,
    metrics: MetricsSnapshot,
    recent_activity: Vec<LogEntry>,
    config: RelayConfig,
}

#[derive(Debug, Serialize)]
struct DebugEditSession {
    #[serde(rename = "userId")]
    user_id: String,
    #[serde(rename = "snippetId")]
    snippet_id: String,
    #[serde(rename = "browserConnectionId")]
    browser_connection_id: String,
    #[serde(rename = "desktopConnectionId")]
    desktop_connection_id: String,
    #[serde(rename = "ageSeconds")]
    age_seconds: u64,
}

async fn debug(State(state): State<RelayState>) -> impl IntoResponse {
    if !(state.config.debug || state.config.environment.is_test()) {
        return StatusCode::NOT_FOUND.into_response();
    }

    let edit_sessions = state
        .router
        .all_sessions()
        .into_iter()
        .map(|session| DebugEditSession {
            user_id: session.user_id,
            snippet_id: session.snippet_id,
            browser_connection_id: session.browser_connection_id,
            desktop_connection_id: session.desktop_connection_id,
            age_seconds: session.created_at.elapsed().as_secs(),
        })
        .collect();

    let mut config = (*state.config).clone();
    config.security.session_secret = "<redacted>".to_owned();

    Json(DebugResponse {
        connections: state.registry.counts(),
        connection_records: state.registry.connection_records(),
        user_sessions: state.registry.user_session_records(),
        edit_sessions,
        rate_limiter_tracked_addresses: state.rate_limiter.tracked_addresses(),
        metrics: state.metrics.snapshot(),
        recent_activity: state.activity_log.recent(state.activity_log.len()),
        config,
    })
    .into_response()
}
