//! Status endpoint (§4.8).
//!
//! `GET /web-ide-bridge/status` is content-negotiated: a JSON-requesting
//! `Accept` header or a programmatic `User-Agent` (curl, or a known test
//! agent substring) gets the JSON snapshot equivalent to what the
//! broadcaster sends observers; everyone else gets a self-contained HTML
//! dashboard that opens its own connection to the bidirectional endpoint
//! and sends `status_connect`.

use axum::Router;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{Html, IntoResponse, Json};
use axum::routing::get;

use crate::{RelayState, api};
use crate::services::broadcaster::SnapshotSources;

/// Builds the `/web-ide-bridge/status` route.
pub fn routes() -> Router<RelayState> {
    Router::new().route(&api::status_path(), get(status))
}

async fn status(State(state): State<RelayState>, headers: HeaderMap) -> impl IntoResponse {
    let sources = SnapshotSources {
        registry: state.registry.clone(),
        router: state.router.clone(),
        metrics: state.metrics.clone(),
        activity_log: state.activity_log.clone(),
        config: state.config.clone(),
    };
    let snapshot = sources.snapshot();

    if wants_json(&headers) {
        Json(snapshot).into_response()
    } else {
        Html(render_dashboard(&state.config.server.websocket_endpoint)).into_response()
    }
}

/// Programmatic `User-Agent` substrings treated as API callers (§4.8).
const PROGRAMMATIC_USER_AGENTS: &[&str] = &["curl", "httpie", "wget", "web-ide-bridge-test-agent"];

fn wants_json(headers: &HeaderMap) -> bool {
    if let Some(accept) = headers.get(axum::http::header::ACCEPT)
        && let Ok(accept) = accept.to_str()
        && accept.contains("application/json")
    {
        return true;
    }
    if let Some(user_agent) = headers.get(axum::http::header::USER_AGENT)
        && let Ok(user_agent) = user_agent.to_str()
    {
        let lower = user_agent.to_ascii_lowercase();
        return PROGRAMMATIC_USER_AGENTS
            .iter()
            .any(|needle| lower.contains(needle));
    }
    false
}

fn render_dashboard(websocket_path: &str) -> String {
    format!(
        r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Web-IDE-Bridge Relay Status</title>
<style>
body {{ font-family: system-ui, sans-serif; margin: 2rem; color: #222; }}
pre {{ background: #f4f4f4; padding: 1rem; border-radius: 6px; overflow-x: auto; }}
</style>
</head>
<body>
<h1>Web-IDE-Bridge Relay</h1>
<p>Live status, updated once per second over the bidirectional endpoint.</p>
<pre id="status">connecting...</pre>
<script>
(function () {{
  var proto = location.protocol === "https:" ? "wss:" : "ws:";
  var ws = new WebSocket(proto + "//" + location.host + "{websocket_path}");
  var el = document.getElementById("status");
  ws.onopen = function () {{
    ws.send(JSON.stringify({{ type: "status_connect", connectionId: "dashboard-" + Date.now() }}));
  }};
  ws.onmessage = function (event) {{
    try {{
      var msg = JSON.parse(event.data);
      if (msg.type === "status") {{
        el.textContent = JSON.stringify(msg, null, 2);
      }}
    }} catch (err) {{ /* ignore malformed frame */ }}
  }};
  ws.onclose = function () {{
    el.textContent = "disconnected";
  }};
}})();
</script>
</body>
</html>
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn accept_json_header_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::ACCEPT,
            HeaderValue::from_static("application/json"),
        );
        assert!(wants_json(&headers));
    }

    #[test]
    fn curl_user_agent_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::USER_AGENT,
            HeaderValue::from_static("curl/8.4.0"),
        );
        assert!(wants_json(&headers));
    }

    #[test]
    fn browser_user_agent_gets_html() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::USER_AGENT,
            HeaderValue::from_static("Mozilla/5.0"),
        );
        assert!(!wants_json(&headers));
    }
}
