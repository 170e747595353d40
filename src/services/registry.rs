//! Connection Registry (§4.2).
//!
//! Tracks every live peer connection, its role, its self-asserted user
//! identity, and liveness metadata. Grounded on the teacher's
//! `OpenSessions` (`services/open_sessions.rs`): a single
//! `parking_lot::Mutex` guarding a plain collection, generalized here from
//! one `HashSet<Uuid>` to the three role-partitioned maps plus per-user
//! session records `spec.md` §3 requires.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use axum::extract::ws::CloseFrame;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::protocol::ServerMessage;

/// An item pushed through a [`Connection`]'s outbound channel: either a
/// framed JSON message, or a request to close the transport outright.
///
/// Kept as one channel (rather than a message channel plus a separate
/// "please close" flag) so the connection task only ever needs to drain a
/// single receiver to know everything it must send before it exits.
pub enum Outbound {
    /// Serialize and send as a `Message::Text` frame.
    Message(ServerMessage),
    /// Send already-serialized text verbatim as a `Message::Text` frame.
    /// Used for frames (like status snapshots) assembled outside
    /// [`ServerMessage`] to avoid a dependency from the wire protocol
    /// module onto the broadcaster's snapshot types.
    Raw(String),
    /// Send a transport-level `Message::Ping` control frame (heartbeat
    /// probe). The peer's transport answers with a `Message::Pong`, handled
    /// by the read loop rather than this channel.
    Ping,
    /// Send as a `Message::Close` frame, then stop driving the socket.
    Close(CloseFrame),
}

/// The role a connection has adopted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// No role-establishing message has arrived yet.
    Uninitialized,
    /// A browser tab editing on behalf of a user.
    Browser,
    /// A desktop agent serving a user.
    Desktop,
    /// A status dashboard subscriber.
    StatusObserver,
}

/// A live peer attachment (§3, "Connection").
pub struct Connection {
    /// Peer-chosen connection id, asserted on the first frame.
    pub id: String,
    /// Current role.
    pub role: Mutex<Role>,
    /// Self-asserted user identity; absent for status observers.
    pub user_id: Mutex<Option<String>>,
    /// Source network address.
    pub addr: IpAddr,
    /// Time the transport was accepted.
    pub connected_at: Instant,
    /// Time of the most recent inbound frame or transport pong.
    pub last_activity: Mutex<Instant>,
    /// Heartbeat liveness flag; cleared on ping, set on any activity.
    pub is_alive: AtomicBool,
    /// Channel used to push outbound frames to this peer's connection task
    /// without holding the registry lock across a send.
    pub sender: mpsc::UnboundedSender<Outbound>,
}

impl Connection {
    /// Marks this connection as alive and bumps its last-activity clock.
    pub fn touch(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_activity.lock() = Instant::now();
    }

    /// Sends a message to this peer. Errors (peer gone) are ignored by
    /// callers; the transport-close path will clean up the registry.
    pub fn send(&self, message: ServerMessage) {
        let _ = self.sender.send(Outbound::Message(message));
    }

    /// Requests that this peer's connection task close the transport with
    /// `frame` after draining any already-queued messages.
    pub fn close(&self, frame: CloseFrame) {
        let _ = self.sender.send(Outbound::Close(frame));
    }

    /// Sends pre-serialized JSON text verbatim.
    pub fn send_raw(&self, text: String) {
        let _ = self.sender.send(Outbound::Raw(text));
    }

    /// Sends a transport-level ping (heartbeat probe).
    pub fn ping(&self) {
        let _ = self.sender.send(Outbound::Ping);
    }
}

/// Per-user record: all attached browsers, and at most one desktop.
#[derive(Default)]
struct UserSession {
    browser_ids: HashSet<String>,
    desktop_id: Option<String>,
}

#[derive(Default)]
struct RegistryInner {
    browsers: HashMap<String, Arc<Connection>>,
    desktops: HashMap<String, Arc<Connection>>,
    observers: HashMap<String, Arc<Connection>>,
    users: HashMap<String, UserSession>,
}

/// Outcome of registering a connection in a concrete role, used to decide
/// which compensating `status_update`s to emit.
pub struct RegisterOutcome {
    /// The user's desktop connection, if any, after this registration.
    pub desktop: Option<Arc<Connection>>,
    /// The user's browser connections after this registration.
    pub browsers: Vec<Arc<Connection>>,
    /// The desktop connection that was replaced by a new `desktop_connect`,
    /// if any (last-writer-wins).
    pub replaced_desktop: Option<Arc<Connection>>,
}

/// Outcome of removing a connection, used to decide which compensating
/// `status_update`s to emit to the user's surviving peers.
pub struct DeregisterOutcome {
    /// The role the removed connection held.
    pub role: Role,
    /// The user identity the connection belonged to, if any.
    pub user_id: Option<String>,
    /// Surviving browser connections for that user, if any.
    pub remaining_browsers: Vec<Arc<Connection>>,
    /// Surviving desktop connection for that user, if any.
    pub remaining_desktop: Option<Arc<Connection>>,
    /// True if, after removing a browser, that user has no browsers left
    /// (only meaningful when `role` is [`Role::Browser`]).
    pub browsers_exhausted: bool,
    /// True if this was the last status observer to leave.
    pub was_last_observer: bool,
}

/// The connection registry: one coarse-grained lock guarding three
/// role-partitioned maps and the per-user session index.
#[derive(Default)]
pub struct Registry {
    inner: Mutex<RegistryInner>,
}

impl Registry {
    /// Registers `connection` as a browser for `user_id`.
    pub fn register_browser(&self, connection: Arc<Connection>, user_id: &str) -> RegisterOutcome {
        let mut inner = self.inner.lock();
        inner
            .browsers
            .insert(connection.id.clone(), Arc::clone(&connection));
        let user = inner.users.entry(user_id.to_owned()).or_default();
        user.browser_ids.insert(connection.id.clone());
        let desktop = user
            .desktop_id
            .as_ref()
            .and_then(|id| inner.desktops.get(id))
            .cloned();
        let browsers = user
            .browser_ids
            .iter()
            .filter_map(|id| inner.browsers.get(id))
            .cloned()
            .collect();
        RegisterOutcome {
            desktop,
            browsers,
            replaced_desktop: None,
        }
    }

    /// Registers `connection` as the desktop for `user_id`, replacing any
    /// prior desktop for that user (last-writer-wins).
    pub fn register_desktop(&self, connection: Arc<Connection>, user_id: &str) -> RegisterOutcome {
        let mut inner = self.inner.lock();
        inner
            .desktops
            .insert(connection.id.clone(), Arc::clone(&connection));
        let user = inner.users.entry(user_id.to_owned()).or_default();
        let previous_id = user.desktop_id.replace(connection.id.clone());
        let replaced_desktop = previous_id
            .filter(|id| id != &connection.id)
            .and_then(|id| inner.desktops.remove(&id));
        let browsers = user
            .browser_ids
            .iter()
            .filter_map(|id| inner.browsers.get(id))
            .cloned()
            .collect();
        RegisterOutcome {
            desktop: Some(connection),
            browsers,
            replaced_desktop,
        }
    }

    /// Registers `connection` as a status observer. Returns `true` if this
    /// is the first observer (the caller should arm the shared ticker).
    pub fn register_observer(&self, connection: Arc<Connection>) -> bool {
        let mut inner = self.inner.lock();
        let was_empty = inner.observers.is_empty();
        inner.observers.insert(connection.id.clone(), connection);
        was_empty
    }

    /// Removes `id` from whichever collection holds it. No-op if unknown.
    pub fn deregister(&self, id: &str) -> Option<DeregisterOutcome> {
        let mut inner = self.inner.lock();
        if inner.observers.remove(id).is_some() {
            return Some(DeregisterOutcome {
                role: Role::StatusObserver,
                user_id: None,
                remaining_browsers: Vec::new(),
                remaining_desktop: None,
                browsers_exhausted: false,
                was_last_observer: inner.observers.is_empty(),
            });
        }
        if let Some(connection) = inner.browsers.remove(id) {
            let user_id = connection.user_id.lock().clone();
            let mut remaining_desktop = None;
            let mut browsers_exhausted = true;
            if let Some(user_id) = &user_id {
                if let Some(user) = inner.users.get_mut(user_id) {
                    user.browser_ids.remove(id);
                    remaining_desktop = user
                        .desktop_id
                        .as_ref()
                        .and_then(|id| inner.desktops.get(id))
                        .cloned();
                    browsers_exhausted = user.browser_ids.is_empty();
                    if user.browser_ids.is_empty() && user.desktop_id.is_none() {
                        inner.users.remove(user_id);
                    }
                }
            }
            return Some(DeregisterOutcome {
                role: Role::Browser,
                user_id,
                remaining_browsers: Vec::new(),
                remaining_desktop,
                browsers_exhausted,
                was_last_observer: false,
            });
        }
        if let Some(connection) = inner.desktops.remove(id) {
            let user_id = connection.user_id.lock().clone();
            let mut remaining_browsers = Vec::new();
            if let Some(user_id) = &user_id {
                if let Some(user) = inner.users.get_mut(user_id) {
                    if user.desktop_id.as_deref() == Some(id) {
                        user.desktop_id = None;
                    }
                    remaining_browsers = user
                        .browser_ids
                        .iter()
                        .filter_map(|id| inner.browsers.get(id))
                        .cloned()
                        .collect();
                    if user.browser_ids.is_empty() && user.desktop_id.is_none() {
                        inner.users.remove(user_id);
                    }
                }
            }
            return Some(DeregisterOutcome {
                role: Role::Desktop,
                user_id,
                remaining_browsers,
                remaining_desktop: None,
                browsers_exhausted: false,
                was_last_observer: false,
            });
        }
        None
    }

    /// Looks up a live browser connection by id.
    pub fn browser(&self, id: &str) -> Option<Arc<Connection>> {
        self.inner.lock().browsers.get(id).cloned()
    }

    /// Looks up a live desktop connection by id.
    pub fn desktop(&self, id: &str) -> Option<Arc<Connection>> {
        self.inner.lock().desktops.get(id).cloned()
    }

    /// Looks up the desktop connection currently serving `user_id`.
    pub fn desktop_for_user(&self, user_id: &str) -> Option<Arc<Connection>> {
        let inner = self.inner.lock();
        let desktop_id = inner.users.get(user_id)?.desktop_id.as_ref()?;
        inner.desktops.get(desktop_id).cloned()
    }

    /// All connections currently known to the registry, across all roles.
    pub fn all_connections(&self) -> Vec<Arc<Connection>> {
        let inner = self.inner.lock();
        inner
            .browsers
            .values()
            .chain(inner.desktops.values())
            .chain(inner.observers.values())
            .cloned()
            .collect()
    }

    /// All status observers, for the broadcaster.
    pub fn observers(&self) -> Vec<Arc<Connection>> {
        self.inner.lock().observers.values().cloned().collect()
    }

    /// True if at least one status observer is attached.
    pub fn has_observers(&self) -> bool {
        !self.inner.lock().observers.is_empty()
    }

    /// A point-in-time count snapshot, for `/status` and `/debug`.
    pub fn counts(&self) -> RegistryCounts {
        let inner = self.inner.lock();
        RegistryCounts {
            browsers: inner.browsers.len(),
            desktops: inner.desktops.len(),
            observers: inner.observers.len(),
            users: inner.users.len(),
        }
    }

    /// Clears every collection. Used during shutdown (§4.9 step 5).
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.browsers.clear();
        inner.desktops.clear();
        inner.observers.clear();
        inner.users.clear();
    }

    /// A point-in-time per-connection dump, for `/debug` (§4.8).
    pub fn connection_records(&self) -> Vec<ConnectionRecord> {
        let inner = self.inner.lock();
        inner
            .browsers
            .values()
            .chain(inner.desktops.values())
            .chain(inner.observers.values())
            .map(|conn| ConnectionRecord {
                id: conn.id.clone(),
                role: *conn.role.lock(),
                user_id: conn.user_id.lock().clone(),
                addr: conn.addr,
                connected_seconds: conn.connected_at.elapsed().as_secs(),
                idle_seconds: conn.last_activity.lock().elapsed().as_secs(),
                is_alive: conn.is_alive.load(Ordering::Relaxed),
            })
            .collect()
    }

    /// A point-in-time per-user session dump, for `/debug` (§4.8).
    pub fn user_session_records(&self) -> Vec<UserSessionRecord> {
        let inner = self.inner.lock();
        inner
            .users
            .iter()
            .map(|(user_id, session)| UserSessionRecord {
                user_id: user_id.clone(),
                browser_ids: session.browser_ids.iter().cloned().collect(),
                desktop_id: session.desktop_id.clone(),
            })
            .collect()
    }
}

/// Serializable per-connection record (§3, "Connection"), for `/debug`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConnectionRecord {
    /// Peer-chosen connection id.
    pub id: String,
    /// Current role.
    pub role: Role,
    /// Self-asserted user identity, if any.
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
    /// Source network address.
    pub addr: IpAddr,
    /// Seconds since the transport was accepted.
    #[serde(rename = "connectedSeconds")]
    pub connected_seconds: u64,
    /// Seconds since the last inbound frame or transport pong.
    #[serde(rename = "idleSeconds")]
    pub idle_seconds: u64,
    /// Current heartbeat liveness flag.
    #[serde(rename = "isAlive")]
    pub is_alive: bool,
}

/// Serializable per-user session record (§3, "User Session"), for `/debug`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct UserSessionRecord {
    /// The user identity.
    #[serde(rename = "userId")]
    pub user_id: String,
    /// Connection ids of every browser currently attached.
    #[serde(rename = "browserIds")]
    pub browser_ids: Vec<String>,
    /// Connection id of the attached desktop, if any.
    #[serde(rename = "desktopId")]
    pub desktop_id: Option<String>,
}

/// Point-in-time connection counts by role.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct RegistryCounts {
    /// Live browser connections.
    pub browsers: usize,
    /// Live desktop connections.
    pub desktops: usize,
    /// Live status observers.
    pub observers: usize,
    /// Distinct user identities with at least one attached connection.
    pub users: usize,
}

impl RegistryCounts {
    /// Total live connections across all roles.
    pub fn total(&self) -> usize {
        self.browsers + self.desktops + self.observers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn browser_and_desktop_partitioned() {
        let registry = Registry::default();
        registry.register_browser(connection("b1"), "alice");
        registry.register_desktop(connection("d1"), "alice");
        assert!(registry.browser("b1").is_some());
        assert!(registry.desktop("d1").is_some());
        assert!(registry.browser("d1").is_none());
        assert_eq!(registry.desktop_for_user("alice").unwrap().id, "d1");
    }

    #[test]
    fn desktop_connect_replaces_prior_desktop() {
        let registry = Registry::default();
        registry.register_desktop(connection("d1"), "alice");
        let outcome = registry.register_desktop(connection("d2"), "alice");
        assert_eq!(outcome.replaced_desktop.unwrap().id, "d1");
        assert_eq!(registry.desktop_for_user("alice").unwrap().id, "d2");
        assert!(registry.desktop("d1").is_none());
    }

    #[test]
    fn deregister_last_browser_and_no_desktop_drops_user() {
        let registry = Registry::default();
        registry.register_browser(connection("b1"), "alice");
        let outcome = registry.deregister("b1").unwrap();
        assert!(outcome.remaining_desktop.is_none());
        assert!(registry.desktop_for_user("alice").is_none());
        assert_eq!(registry.counts().users, 0);
    }

    #[test]
    fn observer_set_tracks_first_and_last() {
        let registry = Registry::default();
        assert!(registry.register_observer(connection("o1")));
        assert!(!registry.register_observer(connection("o2")));
        let outcome = registry.deregister("o1").unwrap();
        assert!(!outcome.was_last_observer);
        let outcome = registry.deregister("o2").unwrap();
        assert!(outcome.was_last_observer);
    }

    #[test]
    fn ping_sends_transport_level_probe_not_an_application_frame() {
        let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
        let conn = Connection {
            id: "d1".to_owned(),
            role: Mutex::new(Role::Uninitialized),
            user_id: Mutex::new(None),
            addr: "127.0.0.1".parse().unwrap(),
            connected_at: Instant::now(),
            last_activity: Mutex::new(Instant::now()),
            is_alive: AtomicBool::new(true),
            sender: tx,
        };
        conn.ping();
        assert!(matches!(rx.try_recv().unwrap(), Outbound::Ping));
    }

    #[test]
    fn connection_records_and_user_sessions_reflect_registered_peers() {
        let registry = Registry::default();
        registry.register_browser(connection("b1"), "alice");
        registry.register_desktop(connection("d1"), "alice");

        let records = registry.connection_records();
        assert_eq!(records.len(), 2);
        assert!(records.iter().any(|r| r.id == "b1" && r.role == Role::Browser));
        assert!(records.iter().any(|r| r.id == "d1" && r.role == Role::Desktop));

        let sessions = registry.user_session_records();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].user_id, "alice");
        assert_eq!(sessions[0].browser_ids, vec!["b1".to_owned()]);
        assert_eq!(sessions[0].desktop_id.as_deref(), Some("d1"));
    }
}
