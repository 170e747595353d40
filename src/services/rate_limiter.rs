//! Sliding-window per-source-address admission control (§4.5).
//!
//! Grounded on the "admission control at connection time, conservative
//! defaults, fully configurable" idiom from
//! `other_examples/60474c54_AmakeSashaDev-maker_web__src-limits.rs`,
//! implemented here as a list of accept timestamps per source address
//! behind a single `parking_lot::Mutex`, matching the lock granularity the
//! teacher uses throughout (`services/open_sessions.rs`).

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::RateLimitConfig;

/// Sliding-window rate limiter, one window per source address.
pub struct RateLimiter {
    enabled: bool,
    window: Duration,
    max_requests: usize,
    windows: Mutex<HashMap<IpAddr, Vec<Instant>>>,
}

impl RateLimiter {
    /// Builds a limiter from the effective [`RateLimitConfig`].
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            enabled: config.enabled,
            window: config.window,
            max_requests: config.max_requests,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Attempts to admit a new connection from `addr`.
    ///
    /// Returns `true` if the connection is admitted; if admitted, the
    /// attempt is recorded against the window. When rate limiting is
    /// disabled, always returns `true` without recording anything.
    pub fn try_admit(&self, addr: IpAddr) -> bool {
        if !self.enabled {
            return true;
        }
        let now = Instant::now();
        let mut windows = self.windows.lock();
        let timestamps = windows.entry(addr).or_default();
        timestamps.retain(|t| now.duration_since(*t) < self.window);
        if timestamps.len() >= self.max_requests {
            false
        } else {
            timestamps.push(now);
            true
        }
    }

    /// Purges source-address records whose window has fully elapsed.
    /// Called periodically by the reaper (§4.4).
    pub fn purge_expired(&self) {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        windows.retain(|_, timestamps| {
            timestamps.retain(|t| now.duration_since(*t) < self.window);
            !timestamps.is_empty()
        });
    }

    /// Number of source addresses currently tracked. Used by `/debug`.
    pub fn tracked_addresses(&self) -> usize {
        self.windows.lock().len()
    }
}
