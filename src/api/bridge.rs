//! The bidirectional endpoint itself (§4.1-§4.4).
//!
//! One `axum` WebSocket handler drives every peer kind — browser, desktop,
//! status observer — through a single connection task. Role is not known
//! until the peer's first role-establishing frame arrives, so the
//! [`services::registry::Connection`] is only constructed (and registered)
//! once that frame is parsed; everything before that point is handled off
//! the raw `mpsc` sender alone.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

use axum::extract::ConnectInfo;
use axum::extract::State;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::Instrument;

use crate::RelayState;
use crate::protocol::{self, ClientMessage, ServerMessage};
use crate::services::activity_log;
use crate::services::broadcaster::StatusSnapshot;
use crate::services::liveness;
use crate::services::registry::{Connection, DeregisterOutcome, Outbound, Role};

/// Builds the bidirectional-endpoint route. Kept separate from
/// [`crate::api::router`] so the path stays driven entirely by
/// configuration rather than a literal here.
pub fn routes(path: &str) -> Router<RelayState> {
    Router::new().route(path, get(upgrade))
}

async fn upgrade(
    State(state): State<RelayState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, addr.ip()))
}

async fn handle_socket(socket: WebSocket, state: RelayState, addr: IpAddr) {
    let span_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!("bridge_connection", %span_id, %addr);
    handle_socket_inner(socket, state, addr).instrument(span).await;
}

async fn handle_socket_inner(socket: WebSocket, state: RelayState, addr: IpAddr) {
    if !state.rate_limiter.try_admit(addr) {
        state.metrics.record_rate_limited();
        close_immediately(socket, close_code::POLICY, "rate limit exceeded").await;
        return;
    }
    if state.registry.counts().total() >= state.config.server.max_connections {
        close_immediately(socket, close_code::POLICY, "at capacity").await;
        return;
    }

    state.metrics.record_connection();

    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();

    let writer = tokio::spawn(async move {
        while let Some(item) = outbound_rx.recv().await {
            let stop_after = matches!(item, Outbound::Close(_));
            let message = match item {
                Outbound::Message(msg) => match serde_json::to_string(&msg) {
                    Ok(text) => Message::Text(text.into()),
                    Err(err) => {
                        tracing::warn!(%err, "failed to serialize outbound frame");
                        continue;
                    }
                },
                Outbound::Raw(text) => Message::Text(text.into()),
                Outbound::Ping => Message::Ping(Vec::new().into()),
                Outbound::Close(frame) => Message::Close(Some(frame)),
            };
            if sink.send(message).await.is_err() || stop_after {
                break;
            }
        }
    });

    let mut connection: Option<Arc<Connection>> = None;
    let deadline = tokio::time::sleep(state.config.server.connection_timeout);
    tokio::pin!(deadline);

    loop {
        let uninitialized = connection
            .as_ref()
            .map(|conn| *conn.role.lock() == Role::Uninitialized)
            .unwrap_or(true);

        tokio::select! {
            () = &mut deadline, if uninitialized => {
                tracing::debug!(%addr, "connection timed out before establishing a role");
                let _ = outbound_tx.send(Outbound::Close(liveness::init_timeout_close_frame()));
                break;
            }
            () = state.cancellation.cancelled() => {
                let _ = outbound_tx.send(Outbound::Close(liveness::shutdown_close_frame()));
                break;
            }
            frame = stream.next() => {
                match frame {
                    None | Some(Err(_)) => break,
                    Some(Ok(Message::Close(_))) => break,
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        if let Some(conn) = &connection {
                            conn.touch();
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        state.metrics.record_error();
                        let _ = outbound_tx.send(Outbound::Message(ServerMessage::Error {
                            message: "binary frames are not supported".to_owned(),
                            code: "UNSUPPORTED_FRAME",
                        }));
                    }
                    Some(Ok(Message::Text(text))) => {
                        if let Some(conn) = &connection {
                            conn.touch();
                        }
                        handle_frame(&state, &mut connection, &outbound_tx, addr, &text).await;
                    }
                }
            }
        }
    }

    if let Some(conn) = connection.take()
        && let Some(outcome) = state.registry.deregister(&conn.id)
    {
        state.activity_log.record(
            activity_log::Severity::Info,
            format!("{:?} disconnected", outcome.role).to_lowercase(),
        );
        notify_deregister(outcome);
    }

    drop(outbound_tx);
    let _ = writer.await;
}

async fn close_immediately(mut socket: WebSocket, code: u16, reason: &'static str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
}

/// Parses and dispatches one inbound text frame.
async fn handle_frame(
    state: &RelayState,
    connection: &mut Option<Arc<Connection>>,
    outbound_tx: &mpsc::UnboundedSender<Outbound>,
    addr: IpAddr,
    raw: &str,
) {
    state.metrics.record_message();

    let parsed = match protocol::parse_frame(raw) {
        Ok(msg) => msg,
        Err(reason) => {
            state.metrics.record_error();
            reply_error(outbound_tx, "MALFORMED_FRAME", reason);
            return;
        }
    };

    if let Some(conn) = connection.as_ref()
        && parsed.connection_id() != conn.id
    {
        state.metrics.record_error();
        reply_error(
            outbound_tx,
            "CONNECTION_ID_MISMATCH",
            "connectionId does not match the id established on this connection".to_owned(),
        );
        return;
    }

    match parsed {
        ClientMessage::ConnectionInit { connection_id } => {
            let conn = identify(state, connection, outbound_tx, addr, connection_id);
            conn.send(ServerMessage::ConnectionAck {
                connection_id: conn.id.clone(),
                status: "ok",
                role: "uninitialized",
            });
        }
        ClientMessage::BrowserConnect {
            connection_id,
            user_id,
        } => {
            let conn = identify(state, connection, outbound_tx, addr, connection_id);
            *conn.role.lock() = Role::Browser;
            *conn.user_id.lock() = Some(user_id.clone());
            let outcome = state.registry.register_browser(Arc::clone(conn), &user_id);
            state.activity_log.record(
                activity_log::Severity::Success,
                format!("browser connected for user {user_id}"),
            );
            conn.send(ServerMessage::ConnectionAck {
                connection_id: conn.id.clone(),
                status: "ok",
                role: "browser",
            });
            conn.send(ServerMessage::DesktopConnectedUpdate {
                desktop_connected: outcome.desktop.is_some(),
            });
            if let Some(desktop) = &outcome.desktop {
                desktop.send(ServerMessage::BrowserConnectedUpdate {
                    browser_connected: true,
                });
            }
        }
        ClientMessage::DesktopConnect {
            connection_id,
            user_id,
        } => {
            let conn = identify(state, connection, outbound_tx, addr, connection_id);
            *conn.role.lock() = Role::Desktop;
            *conn.user_id.lock() = Some(user_id.clone());
            let outcome = state.registry.register_desktop(Arc::clone(conn), &user_id);
            state.activity_log.record(
                activity_log::Severity::Success,
                format!("desktop connected for user {user_id}"),
            );
            conn.send(ServerMessage::ConnectionAck {
                connection_id: conn.id.clone(),
                status: "ok",
                role: "desktop",
            });
            conn.send(ServerMessage::BrowserConnectedUpdate {
                browser_connected: !outcome.browsers.is_empty(),
            });
            for browser in &outcome.browsers {
                browser.send(ServerMessage::DesktopConnectedUpdate {
                    desktop_connected: true,
                });
            }
            if let Some(replaced) = outcome.replaced_desktop {
                replaced.send(ServerMessage::Error {
                    message: "replaced by a newer desktop connection for this user".to_owned(),
                    code: "DESKTOP_REPLACED",
                });
                replaced.close(CloseFrame {
                    code: close_code::NORMAL,
                    reason: "replaced".into(),
                });
            }
        }
        ClientMessage::StatusConnect { connection_id } => {
            let conn = identify(state, connection, outbound_tx, addr, connection_id);
            state.registry.register_observer(Arc::clone(conn));
            conn.send(ServerMessage::ConnectionAck {
                connection_id: conn.id.clone(),
                status: "ok",
                role: "status_observer",
            });
            conn.send_raw(status_frame_json(&state.broadcaster.snapshot()));
            spawn_status_forwarder(state, conn);
        }
        ClientMessage::EditRequest {
            user_id,
            snippet_id,
            code,
            file_type,
            ..
        } => {
            let Some(conn) = connection.as_ref() else {
                reply_error(outbound_tx, "NOT_INITIALIZED", "connection not yet identified".to_owned());
                return;
            };
            let code = if state.config.normalize_line_endings {
                protocol::normalize_line_endings(&code)
            } else {
                code
            };
            if state.config.debug {
                state.activity_log.record(
                    activity_log::Severity::Info,
                    format!(
                        "edit_request {user_id}/{snippet_id}: {}",
                        activity_log::elide_code_for_log(&code)
                    ),
                );
            }
            use crate::services::router::RouteOutcome;
            match state.router.route_edit_request(
                &state.registry,
                &state.metrics,
                &conn.id,
                &user_id,
                &snippet_id,
                &code,
                &file_type,
            ) {
                RouteOutcome::Delivered => {}
                RouteOutcome::SenderError { code: err_code, message } => {
                    state.metrics.record_error();
                    conn.send(ServerMessage::Error {
                        message,
                        code: err_code,
                    });
                }
                RouteOutcome::SenderInfo { snippet_id, message } => {
                    conn.send(ServerMessage::Info { snippet_id, message });
                }
            }
        }
        ClientMessage::CodeUpdate {
            user_id,
            snippet_id,
            code,
            ..
        } => {
            let Some(conn) = connection.as_ref() else {
                reply_error(outbound_tx, "NOT_INITIALIZED", "connection not yet identified".to_owned());
                return;
            };
            let code = if state.config.normalize_line_endings {
                protocol::normalize_line_endings(&code)
            } else {
                code
            };
            if state.config.debug {
                state.activity_log.record(
                    activity_log::Severity::Info,
                    format!(
                        "code_update {user_id}/{snippet_id}: {}",
                        activity_log::elide_code_for_log(&code)
                    ),
                );
            }
            use crate::services::router::RouteOutcome;
            match state
                .router
                .route_code_update(&state.registry, &user_id, &snippet_id, &code)
            {
                RouteOutcome::Delivered => {}
                RouteOutcome::SenderError { code: err_code, message } => {
                    state.metrics.record_error();
                    conn.send(ServerMessage::Error {
                        message,
                        code: err_code,
                    });
                }
                RouteOutcome::SenderInfo { snippet_id, message } => {
                    conn.send(ServerMessage::Info { snippet_id, message });
                }
            }
        }
        ClientMessage::Info {
            user_id,
            snippet_id,
            message,
            ..
        } => {
            if connection.is_none() {
                reply_error(outbound_tx, "NOT_INITIALIZED", "connection not yet identified".to_owned());
                return;
            }
            crate::services::router::forward_info_to_desktop(
                &state.registry,
                &user_id,
                &snippet_id,
                &message,
            );
        }
        ClientMessage::Ping { timestamp, .. } => {
            let Some(conn) = connection.as_ref() else {
                reply_error(outbound_tx, "NOT_INITIALIZED", "connection not yet identified".to_owned());
                return;
            };
            crate::services::router::handle_ping(conn, timestamp);
        }
    }
}

/// Returns the established connection, constructing and remembering it on
/// the first role-establishing frame.
fn identify<'a>(
    _state: &RelayState,
    connection: &'a mut Option<Arc<Connection>>,
    outbound_tx: &mpsc::UnboundedSender<Outbound>,
    addr: IpAddr,
    connection_id: String,
) -> &'a Arc<Connection> {
    connection.get_or_insert_with(|| {
        Arc::new(Connection {
            id: connection_id,
            role: Mutex::new(Role::Uninitialized),
            user_id: Mutex::new(None),
            addr,
            connected_at: Instant::now(),
            last_activity: Mutex::new(Instant::now()),
            is_alive: AtomicBool::new(true),
            sender: outbound_tx.clone(),
        })
    })
}

fn reply_error(outbound_tx: &mpsc::UnboundedSender<Outbound>, code: &'static str, message: String) {
    let _ = outbound_tx.send(Outbound::Message(ServerMessage::Error { message, code }));
}

fn notify_deregister(outcome: DeregisterOutcome) {
    match outcome.role {
        Role::Browser => {
            if outcome.browsers_exhausted
                && let Some(desktop) = outcome.remaining_desktop
            {
                desktop.send(ServerMessage::BrowserConnectedUpdate {
                    browser_connected: false,
                });
            }
        }
        Role::Desktop => {
            for browser in outcome.remaining_browsers {
                browser.send(ServerMessage::DesktopConnectedUpdate {
                    desktop_connected: false,
                });
            }
        }
        Role::StatusObserver | Role::Uninitialized => {}
    }
}

/// Spawns the per-observer task that forwards the shared 1 Hz broadcast
/// onto this connection's outbound channel until the observer disconnects.
fn spawn_status_forwarder(state: &RelayState, conn: &Arc<Connection>) {
    let mut receiver = state.broadcaster.subscribe();
    let sender = conn.sender.clone();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(snapshot) => {
                    let _ = sender.send(Outbound::Raw(status_frame_json(&snapshot)));
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

fn status_frame_json(snapshot: &StatusSnapshot) -> String {
    #[derive(Serialize)]
    struct Frame<'a> {
        r#type: &'static str,
        #[serde(flatten)]
        snapshot: &'a StatusSnapshot,
    }
    serde_json::to_string(&Frame {
        r#type: "status",
        snapshot,
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome_browser(browsers_exhausted: bool, remaining_desktop: Option<Arc<Connection>>) -> DeregisterOutcome {
        DeregisterOutcome {
            role: Role::Browser,
            user_id: Some("alice".to_owned()),
            remaining_browsers: Vec::new(),
            remaining_desktop,
            browsers_exhausted,
            was_last_observer: false,
        }
    }

    fn connection(id: &str) -> Arc<Connection> {
        let (tx, _rx) = mpsc::unbounded_channel::<Outbound>();
        Arc::new(Connection {
            id: id.to_owned(),
            role: Mutex::new(Role::Uninitialized),
            user_id: Mutex::new(None),
            addr: "127.0.0.1".parse().unwrap(),
            connected_at: Instant::now(),
            last_activity: Mutex::new(Instant::now()),
            is_alive: AtomicBool::new(true),
            sender: tx,
        })
    }

    #[test]
    fn last_browser_leaving_notifies_desktop() {
        let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
        let desktop = Arc::new(Connection {
            id: "d1".to_owned(),
            role: Mutex::new(Role::Desktop),
            user_id: Mutex::new(Some("alice".to_owned())),
            addr: "127.0.0.1".parse().unwrap(),
            connected_at: Instant::now(),
            last_activity: Mutex::new(Instant::now()),
            is_alive: AtomicBool::new(true),
            sender: tx,
        });
        notify_deregister(outcome_browser(true, Some(desktop)));
        match rx.try_recv().unwrap() {
            Outbound::Message(ServerMessage::BrowserConnectedUpdate { browser_connected }) => {
                assert!(!browser_connected);
            }
            _ => panic!("unexpected outbound item"),
        }
    }

    #[test]
    fn non_last_browser_leaving_does_not_notify() {
        let desktop = connection("d1");
        notify_deregister(outcome_browser(false, Some(desktop)));
    }
}
