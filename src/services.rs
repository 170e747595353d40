//! Core services that make up the relay.
//!
//! Each service encapsulates one responsibility from `spec.md` §4 and is
//! used by the HTTP/WebSocket API layer.
//!
//! # Services overview
//!
//! - [`registry`] – the Connection Registry (§4.2).
//! - [`router`] – the Session Router and edit-session table (§4.3).
//! - [`liveness`] – heartbeat, init-timeout, and reaper tasks (§4.4).
//! - [`rate_limiter`] – sliding-window admission control (§4.5).
//! - [`broadcaster`] – the status broadcaster (§4.6).
//! - [`activity_log`] – the bounded activity log (§4.7).

pub mod activity_log;
pub mod broadcaster;
pub mod liveness;
pub mod rate_limiter;
pub mod registry;
pub mod router;
