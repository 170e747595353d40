//! Configuration types, CLI parsing, and config-file loading for the relay.
//!
//! Loading order of precedence (highest wins): CLI flags, environment
//! variables, a TOML config file (see [`ConfigPath::resolve`]), then the
//! built-in [`RelayConfig::default`]. File values are deep-merged one level
//! over the defaults, matching `spec.md` §4.9.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::StartupError;

/// The environment the relay is running in.
///
/// Mirrors the teacher's `Environment` type: the main use is asserting
/// production-only invariants (a real session secret, a present config
/// file) rather than gating feature availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Production environment: strict validation, config file required.
    #[default]
    Production,
    /// Development environment: lenient validation, good defaults.
    Development,
    /// Test environment: debug endpoints enabled unconditionally.
    Test,
}

impl Environment {
    /// True when running in [`Environment::Production`].
    pub fn is_production(self) -> bool {
        matches!(self, Environment::Production)
    }

    /// True when running in [`Environment::Test`].
    pub fn is_test(self) -> bool {
        matches!(self, Environment::Test)
    }
}

/// Command-line surface of the relay binary.
///
/// `--port`/`-p` and `--config`/`-c` override the corresponding config
/// values after file and environment merging; `clap` derives `--help`/`-h`
/// automatically.
#[derive(Debug, Parser)]
#[command(name = "web-ide-bridge-relay", version, about)]
pub struct Cli {
    /// TCP port to listen on (overrides config file and environment).
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Path to a TOML configuration file.
    #[arg(short, long, env = "WEB_IDE_BRIDGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Runtime environment.
    #[arg(long, env = "WEB_IDE_BRIDGE_ENV", default_value = "production")]
    pub environment: Environment,

    /// Enable debug endpoint and verbose code logging.
    #[arg(long, env = "DEBUG")]
    pub debug: bool,
}

/// Server-level network and timing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP port.
    pub port: u16,
    /// Bind address.
    pub host: IpAddr,
    /// Path of the bidirectional endpoint.
    pub websocket_endpoint: String,
    /// Heartbeat period, in milliseconds.
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,
    /// Hard cap on concurrent peers.
    pub max_connections: usize,
    /// Uninitialized-state deadline, in milliseconds.
    #[serde(with = "humantime_serde")]
    pub connection_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8071,
            host: IpAddr::from([0, 0, 0, 0]),
            websocket_endpoint: "/web-ide-bridge/ws".to_owned(),
            heartbeat_interval: Duration::from_secs(30),
            max_connections: 1000,
            connection_timeout: Duration::from_secs(300),
        }
    }
}

/// Rate-limiting configuration (§4.5).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Gate admission control on or off.
    pub enabled: bool,
    /// Sliding window length, in milliseconds.
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    /// Max accepted connections per source address per window.
    pub max_requests: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window: Duration::from_secs(15 * 60),
            max_requests: 100,
        }
    }
}

/// CORS configuration, applied to every HTTP response.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Allowed origins. Empty means "reflect none" (same-origin only).
    pub origin: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self { origin: Vec::new() }
    }
}

/// Security-related configuration, grouping rate limiting and headers.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Sliding-window connection admission control.
    pub rate_limiting: RateLimitConfig,
    /// Session secret, used only to assert it was changed in production.
    pub session_secret: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            rate_limiting: RateLimitConfig::default(),
            session_secret: BUILTIN_SECRET_PLACEHOLDER.to_owned(),
        }
    }
}

/// The built-in placeholder session secret. Production deployments must
/// override this (see [`RelayConfig::validate`]).
pub const BUILTIN_SECRET_PLACEHOLDER: &str = "change-me-web-ide-bridge";

/// Reaper configuration for edit-session and rate-limit cleanup (§4.4).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Reaper period, in milliseconds.
    #[serde(with = "humantime_serde")]
    pub session_cleanup_interval: Duration,
    /// Edit-session TTL, in milliseconds.
    #[serde(with = "humantime_serde")]
    pub max_session_age: Duration,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            session_cleanup_interval: Duration::from_secs(5 * 60),
            max_session_age: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// The fully merged, validated configuration for one relay instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Runtime environment; not itself part of the file schema, but carried
    /// alongside it for convenience once CLI/env have been applied.
    #[serde(skip)]
    pub environment: Environment,
    /// Server network/timing settings.
    pub server: ServerConfig,
    /// Whether inbound `code` fields are CRLF/CR-normalized to LF.
    pub normalize_line_endings: bool,
    /// CORS settings.
    pub cors: CorsConfig,
    /// Security settings (rate limiting, session secret).
    pub security: SecurityConfig,
    /// Reaper settings.
    pub cleanup: CleanupConfig,
    /// Enables the `/debug` endpoint and verbose `code` logging.
    #[serde(skip)]
    pub debug: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            server: ServerConfig::default(),
            normalize_line_endings: true,
            cors: CorsConfig::default(),
            security: SecurityConfig::default(),
            cleanup: CleanupConfig::default(),
            debug: false,
        }
    }
}

/// Resolves which config file path (if any) to load, per the precedence in
/// `spec.md` §4.9: an explicitly-specified path, then `/etc/<name>.conf`,
/// then an in-repo default path.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let etc_path = PathBuf::from("/etc/web-ide-bridge-relay.conf");
    if etc_path.exists() {
        return Some(etc_path);
    }
    let in_repo = PathBuf::from("config/default.toml");
    if in_repo.exists() {
        return Some(in_repo);
    }
    None
}

impl RelayConfig {
    /// Loads and validates the effective configuration.
    ///
    /// `cli.config` takes precedence; if absent, falls back to
    /// [`resolve_config_path`]. If no file is found and `environment` is
    /// [`Environment::Production`], returns [`StartupError::MissingProductionConfig`].
    pub fn load(cli: &Cli) -> eyre::Result<Self> {
        let path = resolve_config_path(cli.config.as_deref());
        let mut config = match &path {
            Some(path) => {
                tracing::info!(path = %path.display(), "loading configuration file");
                let contents = std::fs::read_to_string(path)
                    .map_err(|err| eyre::eyre!("reading {}: {err}", path.display()))?;
                let file_config: RelayConfig = toml::from_str(&contents)
                    .map_err(|err| eyre::eyre!("parsing {}: {err}", path.display()))?;
                file_config
            }
            None if cli.environment.is_production() => {
                return Err(StartupError::MissingProductionConfig.into());
            }
            None => {
                tracing::info!("no configuration file found, using built-in defaults");
                RelayConfig::default()
            }
        };

        config.environment = cli.environment;
        config.debug = cli.debug || config.debug || cli.environment.is_test();
        if let Some(port) = cli.port {
            config.server.port = port;
        }
        if let Ok(port) = std::env::var("WEB_IDE_BRIDGE_PORT")
            && let Ok(port) = port.parse()
        {
            config.server.port = port;
        }
        if let Ok(secret) = std::env::var("WEB_IDE_BRIDGE_SECRET") {
            config.security.session_secret = secret;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the merged configuration per `spec.md` §4.9.
    pub fn validate(&self) -> eyre::Result<()> {
        if !self.server.websocket_endpoint.starts_with('/') {
            return Err(
                StartupError::InvalidConfig("server.websocketEndpoint must begin with /".into())
                    .into(),
            );
        }
        if self.server.heartbeat_interval < Duration::from_secs(1) {
            return Err(
                StartupError::InvalidConfig("server.heartbeatInterval must be >= 1s".into())
                    .into(),
            );
        }
        if self.server.max_connections < 1 {
            return Err(
                StartupError::InvalidConfig("server.maxConnections must be >= 1".into()).into(),
            );
        }
        if self.server.connection_timeout < Duration::from_secs(1) {
            return Err(
                StartupError::InvalidConfig("server.connectionTimeout must be >= 1s".into())
                    .into(),
            );
        }
        if self.environment.is_production()
            && self.security.session_secret == BUILTIN_SECRET_PLACEHOLDER
        {
            return Err(StartupError::InvalidConfig(
                "security.sessionSecret must be changed in production".into(),
            )
            .into());
        }
        if self.security.rate_limiting.enabled
            && (self.security.rate_limiting.max_requests == 0
                || self.security.rate_limiting.window.is_zero())
        {
            return Err(StartupError::InvalidConfig(
                "security.rateLimiting parameters must be positive when enabled".into(),
            )
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_in_dev() {
        let config = RelayConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn placeholder_secret_rejected_in_production() {
        let mut config = RelayConfig::default();
        config.environment = Environment::Production;
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_endpoint_path_rejected() {
        let mut config = RelayConfig::default();
        config.server.websocket_endpoint = "ws".to_owned();
        assert!(config.validate().is_err());
    }

    #[test]
    fn resolve_config_path_prefers_explicit() {
        let explicit = PathBuf::from("/tmp/some-explicit-path.toml");
        assert_eq!(
            resolve_config_path(Some(&explicit)),
            Some(explicit)
        );
    }
}
