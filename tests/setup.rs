//! Shared harness for the integration test suite.
//!
//! Mirrors the teacher's `tests/setup.rs`: a config builder plus a
//! `TestServer` constructed with a real transport (required for the `ws`
//! feature to drive actual WebSocket upgrades rather than mocked requests).

use axum_test::TestServer;
use web_ide_bridge_relay::config::{Environment, RelayConfig};

/// A `RelayConfig` suitable for tests: test environment (so `/debug` is
/// always enabled), rate limiting off by default, and a non-placeholder
/// session secret so validation never fails.
pub fn test_config() -> RelayConfig {
    let mut config = RelayConfig::default();
    config.environment = Environment::Test;
    config.debug = true;
    config.security.session_secret = "test-only-secret".to_owned();
    config.security.rate_limiting.enabled = false;
    config
}

/// Builds a running test server from `config`.
pub fn test_server(config: RelayConfig) -> TestServer {
    let relay = web_ide_bridge_relay::build(config);
    TestServer::builder()
        .http_transport()
        .build(relay.router)
        .expect("test server with a real transport")
}
