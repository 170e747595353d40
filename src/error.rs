//! Error types shared across the relay.
//!
//! Mirrors the split used throughout the service: fallible internal
//! operations return a `thiserror`-derived enum, while process wiring
//! (config load, listener bind) uses [`eyre::Result`] with `.context(...)`.
//! The bidirectional endpoint itself never constructs a `thiserror` enum for
//! per-frame failures — `protocol::parse_frame` returns a plain `String`
//! description, turned directly into an `error` reply frame, since every
//! failure there maps to the same consequence (reply, keep the socket open).

/// Errors that can abort startup before the relay ever binds a listener.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// No configuration file was found and the environment is production.
    #[error("no configuration file found and environment is production")]
    MissingProductionConfig,

    /// A configuration value failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
