//! Static asset prefix (§4.8).
//!
//! The relay ships no external asset directory — everything the status
//! dashboard needs is inlined in [`crate::api::status`]. This module only
//! serves the one asset a browser tab requests unprompted: the favicon,
//! under the documented `/web-ide-bridge/assets/*` prefix.

use axum::Router;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;

use crate::RelayState;
use crate::api;

const FAVICON: &[u8] = include_bytes!("../../assets/favicon.svg");

/// Builds the static asset routes.
pub fn routes() -> Router<RelayState> {
    Router::new().route(&api::assets_path("favicon.ico"), get(favicon))
}

async fn favicon() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "image/svg+xml")], FAVICON)
}
