//! Session Router and Edit Session table (§4.3, §3 "Edit Session").
//!
//! Grounded on the teacher's request/response turn-taking in
//! `api::oprf::partial_oprf`, generalized from a single linear two-phase
//! exchange into a routing table keyed by `(user, snippet)` that survives
//! across requests and peer disconnects.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::metrics::Metrics;
use crate::protocol::ServerMessage;
use crate::services::registry::{Connection, Registry};

/// The routing record for one in-flight edit (§3 "Edit Session").
#[derive(Clone)]
pub struct EditSession {
    /// User identity.
    pub user_id: String,
    /// Snippet identifier.
    pub snippet_id: String,
    /// The browser connection id that originated the current edit.
    pub browser_connection_id: String,
    /// The desktop connection id it was routed to at origination.
    pub desktop_connection_id: String,
    /// Time this session was created.
    pub created_at: Instant,
    /// Time of the most recent routing activity for this pair.
    pub last_activity: Instant,
}

/// Key type for the edit-session table: `(user, snippet)`.
pub type EditSessionKey = (String, String);

/// Reply produced by the router for the sender of an `edit_request` or
/// `code_update`, distinguishing the no-op "delivered fine" case from the
/// cases that need a reply frame sent back to the originator.
pub enum RouteOutcome {
    /// The message was routed successfully; no reply needed.
    Delivered,
    /// Reply `message` to the original sender as an `error` frame.
    SenderError { code: &'static str, message: String },
    /// Reply `message` to the original sender as an `info` frame.
    SenderInfo {
        snippet_id: String,
        message: String,
    },
}

/// Maintains the `(user, snippet) -> edit session` table and implements
/// the routing rules of §4.3.
#[derive(Default)]
pub struct SessionRouter {
    sessions: Mutex<HashMap<EditSessionKey, EditSession>>,
}

impl SessionRouter {
    /// Handles an `edit_request` arriving from a browser (§4.3, steps 1-3).
    pub fn route_edit_request(
        &self,
        registry: &Registry,
        metrics: &Metrics,
        browser_id: &str,
        user_id: &str,
        snippet_id: &str,
        code: &str,
        file_type: &str,
    ) -> RouteOutcome {
        let Some(desktop) = registry.desktop_for_user(user_id) else {
            return RouteOutcome::SenderError {
                code: "NO_DESKTOP",
                message: "no desktop application connected".to_owned(),
            };
        };

        let now = Instant::now();
        {
            let mut sessions = self.sessions.lock();
            sessions.insert(
                (user_id.to_owned(), snippet_id.to_owned()),
                EditSession {
                    user_id: user_id.to_owned(),
                    snippet_id: snippet_id.to_owned(),
                    browser_connection_id: browser_id.to_owned(),
                    desktop_connection_id: desktop.id.clone(),
                    created_at: now,
                    last_activity: now,
                },
            );
        }
        metrics.record_edit_session_created();

        desktop.send(ServerMessage::EditRequest {
            user_id: user_id.to_owned(),
            snippet_id: snippet_id.to_owned(),
            code: code.to_owned(),
            file_type: file_type.to_owned(),
        });
        RouteOutcome::Delivered
    }

    /// Handles a `code_update` arriving from a desktop (§4.3, steps 1-4).
    pub fn route_code_update(
        &self,
        registry: &Registry,
        user_id: &str,
        snippet_id: &str,
        code: &str,
    ) -> RouteOutcome {
        let key = (user_id.to_owned(), snippet_id.to_owned());
        let browser_connection_id = {
            let mut sessions = self.sessions.lock();
            let Some(session) = sessions.get_mut(&key) else {
                return RouteOutcome::SenderInfo {
                    snippet_id: snippet_id.to_owned(),
                    message: "edit session expired".to_owned(),
                };
            };
            session.last_activity = Instant::now();
            session.browser_connection_id.clone()
        };

        match registry.browser(&browser_connection_id) {
            Some(browser) => {
                browser.send(ServerMessage::CodeUpdate {
                    snippet_id: snippet_id.to_owned(),
                    code: code.to_owned(),
                });
                RouteOutcome::Delivered
            }
            None => RouteOutcome::SenderInfo {
                snippet_id: snippet_id.to_owned(),
                message: "the originating web page is no longer connected".to_owned(),
            },
        }
    }

    /// Re-pins `key` to a new browser connection when a `code_update`'s
    /// pinned browser is still the live recipient; used only via
    /// `route_edit_request` overwriting the record. Present for callers
    /// that need a direct lookup (tests, `/debug`).
    pub fn session_for(&self, user_id: &str, snippet_id: &str) -> Option<EditSession> {
        self.sessions
            .lock()
            .get(&(user_id.to_owned(), snippet_id.to_owned()))
            .cloned()
    }

    /// Number of currently tracked edit sessions.
    pub fn active_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Removes sessions whose last activity exceeds `max_age`. Returns the
    /// number of sessions removed (§4.4, "session & rate-limit reaper").
    pub fn expire_stale(&self, max_age: std::time::Duration) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, session| now.duration_since(session.last_activity) < max_age);
        before - sessions.len()
    }

    /// All tracked sessions, for `/debug`.
    pub fn all_sessions(&self) -> Vec<EditSession> {
        self.sessions.lock().values().cloned().collect()
    }
}

/// Forwards an `info` frame from a browser to that user's desktop, if
/// present, preserving `snippetId` and `message` verbatim (§4.3).
pub fn forward_info_to_desktop(
    registry: &Registry,
    user_id: &str,
    snippet_id: &str,
    message: &str,
) {
    if let Some(desktop) = registry.desktop_for_user(user_id) {
        desktop.send(ServerMessage::Info {
            snippet_id: snippet_id.to_owned(),
            message: message.to_owned(),
        });
    }
}

/// Answers a `ping` with a `pong` carrying the original timestamp. Refreshes
/// connection liveness but not edit-session activity (§4.3).
pub fn handle_ping(connection: &Arc<Connection>, timestamp: serde_json::Value) {
    connection.send(ServerMessage::Pong { timestamp });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::registry::{Outbound, Role};
    use std::sync::atomic::AtomicBool;
    use tokio::sync::mpsc;

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
    fn edit_request_without_desktop_errors_and_creates_no_session() {
        let registry = Registry::default();
        let router = SessionRouter::default();
        let metrics = Metrics::default();
        let outcome =
            router.route_edit_request(&registry, &metrics, "b1", "alice", "t1", "x=1", "js");
        assert!(matches!(outcome, RouteOutcome::SenderError { .. }));
        assert_eq!(router.active_count(), 0);
    }

    #[test]
    fn re_edit_repins_to_latest_browser() {
        let registry = Registry::default();
        let router = SessionRouter::default();
        let metrics = Metrics::default();
        registry.register_desktop(connection("d1"), "alice");
        registry.register_browser(connection("b1"), "alice");
        registry.register_browser(connection("b2"), "alice");

        router.route_edit_request(&registry, &metrics, "b1", "alice", "t1", "x=1", "js");
        assert_eq!(
            router.session_for("alice", "t1").unwrap().browser_connection_id,
            "b1"
        );

        router.route_edit_request(&registry, &metrics, "b2", "alice", "t1", "y=3", "js");
        assert_eq!(
            router.session_for("alice", "t1").unwrap().browser_connection_id,
            "b2"
        );
    }

    #[test]
    fn code_update_for_unknown_session_yields_info() {
        let registry = Registry::default();
        let router = SessionRouter::default();
        let outcome = router.route_code_update(&registry, "alice", "missing", "x=1");
        assert!(matches!(outcome, RouteOutcome::SenderInfo { .. }));
    }

    #[test]
    fn code_update_to_disconnected_browser_yields_info_and_keeps_session() {
        let registry = Registry::default();
        let router = SessionRouter::default();
        let metrics = Metrics::default();
        registry.register_desktop(connection("d1"), "alice");
        registry.register_browser(connection("b1"), "alice");
        router.route_edit_request(&registry, &metrics, "b1", "alice", "t1", "x=1", "js");
        registry.deregister("b1");

        let outcome = router.route_code_update(&registry, "alice", "t1", "x=2");
        assert!(matches!(outcome, RouteOutcome::SenderInfo { .. }));
        assert!(router.session_for("alice", "t1").is_some());
    }

    #[test]
    fn expire_stale_removes_old_sessions_only() {
        let router = SessionRouter::default();
        router.sessions.lock().insert(
            ("alice".to_owned(), "t1".to_owned()),
            EditSession {
                user_id: "alice".to_owned(),
                snippet_id: "t1".to_owned(),
                browser_connection_id: "b1".to_owned(),
                desktop_connection_id: "d1".to_owned(),
                created_at: Instant::now() - std::time::Duration::from_secs(1000),
                last_activity: Instant::now() - std::time::Duration::from_secs(1000),
            },
        );
        let removed = router.expire_stale(std::time::Duration::from_secs(10));
        assert_eq!(removed, 1);
        assert_eq!(router.active_count(), 0);
    }
}
