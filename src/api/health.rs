//! Health endpoint (§4.8).
//!
//! `GET /web-ide-bridge/health` — always returns `200 OK` with a JSON body.
//! Grounded on the teacher's `api::info::routes`: a small `Router` with a
//! `Cache-Control: no-cache` header applied via `SetResponseHeaderLayer`.

use axum::extract::State;
use axum::http::{HeaderValue, header};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::{RelayState, VERSION, api};

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime: u64,
    timestamp: u64,
}

/// Builds the `/web-ide-bridge/health` route.
pub fn routes() -> Router<RelayState> {
    Router::new()
        .route(&api::health_path(), get(health))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache"),
        ))
}

async fn health(State(state): State<RelayState>) -> impl IntoResponse {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    Json(HealthResponse {
        status: "healthy",
        version: VERSION,
        uptime: state.started_at.elapsed().as_secs(),
        timestamp,
    })
}
