//! HTTP and bidirectional-endpoint surface for the relay (§4.8).
//!
//! Organizes the routes named in `spec.md` §6 into submodules:
//!
//! - [`health`] – `GET /web-ide-bridge/health`.
//! - [`status`] – `GET /web-ide-bridge/status`, content-negotiated.
//! - [`debug`] – `GET /web-ide-bridge/debug`.
//! - [`assets`] – static asset prefix.
//! - [`bridge`] – the bidirectional endpoint itself.

pub mod assets;
pub mod bridge;
pub mod debug;
pub mod health;
pub mod status;

use axum::Router;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;

use crate::RelayState;

const PREFIX: &str = "/web-ide-bridge";

/// Builds the full router: health, status, debug, assets, the bidirectional
/// endpoint, and a `/` redirect to status — all sharing one listening port
/// (§2, "Control flow").
pub fn router(state: RelayState) -> Router {
    let websocket_path = state.config.server.websocket_endpoint.clone();
    Router::new()
        .route(
            "/",
            get(|| async {
                (
                    StatusCode::FOUND,
                    [(header::LOCATION, format!("{PREFIX}/status"))],
                )
                    .into_response()
            }),
        )
        .merge(health::routes())
        .merge(status::routes())
        .merge(debug::routes())
        .merge(assets::routes())
        .merge(bridge::routes(&websocket_path))
        .with_state(state)
}

/// Health endpoint path, kept as a constant so `/` and `/status`'s HTML
/// dashboard can reference it without repeating the literal.
pub fn health_path() -> String {
    format!("{PREFIX}/health")
}

/// Status endpoint path.
pub fn status_path() -> String {
    format!("{PREFIX}/status")
}

/// Debug endpoint path.
pub fn debug_path() -> String {
    format!("{PREFIX}/debug")
}

/// Static asset prefix.
pub fn assets_path(name: &str) -> String {
    format!("{PREFIX}/assets/{name}")
}
