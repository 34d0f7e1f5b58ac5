//! Fixed-window request rate limiting.
//!
//! Counts requests in discrete, non-overlapping windows per
//! `(client key, endpoint)` pair. A window is created on first observation
//! and replaced wholesale once its reset time passes; the limiter never
//! slides. Named presets cover the portal's endpoint classes (auth, generic
//! API, password reset, command execution, report generation).
//!
//! The limiter holds its windows behind a mutex and takes `&self`, so a
//! single instance is shared across request threads via `Arc`. Expired
//! windows are removed by [`RateLimiter::sweep_expired`], driven by the
//! background sweeper.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Configuration and presets
// ---------------------------------------------------------------------------

/// Window length and request budget for one endpoint class.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub window_ms: i64,
    pub max_requests: u32,
}

impl RateLimitConfig {
    pub const fn new(window_ms: i64, max_requests: u32) -> Self {
        RateLimitConfig {
            window_ms,
            max_requests,
        }
    }

    /// Login and token endpoints: 5 requests per 15 minutes.
    pub const fn auth() -> Self {
        Self::new(15 * 60 * 1000, 5)
    }

    /// Generic API endpoints: 100 requests per minute.
    pub const fn api() -> Self {
        Self::new(60 * 1000, 100)
    }

    /// Password reset: 3 requests per hour.
    pub const fn password_reset() -> Self {
        Self::new(60 * 60 * 1000, 3)
    }

    /// Terminal command execution: 60 requests per minute.
    pub const fn command_execution() -> Self {
        Self::new(60 * 1000, 60)
    }

    /// Report generation: 10 requests per hour.
    pub const fn report_generation() -> Self {
        Self::new(60 * 60 * 1000, 10)
    }
}

/// Outcome of a single rate check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateDecision {
    pub allowed: bool,
    /// Requests left in the current window (0 when denied).
    pub remaining: u32,
    /// When the current window ends.
    pub reset_at: DateTime<Utc>,
    /// Whole seconds until the window resets, set only on denial.
    pub retry_after_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// Limiter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct RateWindow {
    count: u32,
    reset_at: DateTime<Utc>,
    blocked: bool,
}

/// Shared fixed-window limiter over all endpoint classes.
pub struct RateLimiter {
    windows: Mutex<HashMap<String, RateWindow>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        RateLimiter {
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Record one request and decide whether it is within budget.
    pub fn check(&self, client_key: &str, endpoint: &str, cfg: &RateLimitConfig) -> RateDecision {
        self.check_at(client_key, endpoint, cfg, Utc::now())
    }

    /// [`check`](Self::check) with an explicit clock, for deterministic tests.
    pub fn check_at(
        &self,
        client_key: &str,
        endpoint: &str,
        cfg: &RateLimitConfig,
        now: DateTime<Utc>,
    ) -> RateDecision {
        let key = format!("{client_key}:{endpoint}");
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            // A poisoned lock means a panic mid-update; the window state is
            // still structurally sound, so keep serving.
            Err(poisoned) => poisoned.into_inner(),
        };

        let window = windows.entry(key).or_insert_with(|| RateWindow {
            count: 0,
            reset_at: now + Duration::milliseconds(cfg.window_ms),
            blocked: false,
        });

        if now > window.reset_at {
            *window = RateWindow {
                count: 0,
                reset_at: now + Duration::milliseconds(cfg.window_ms),
                blocked: false,
            };
        }

        window.count += 1;

        if window.count > cfg.max_requests {
            // Log once per window, on the allowed-to-blocked transition.
            let first_denial = !window.blocked;
            window.blocked = true;
            let reset_at = window.reset_at;
            let millis_left = (reset_at - now).num_milliseconds().max(0);
            let retry_after = ((millis_left + 999) / 1000) as u64;
            drop(windows);
            if first_denial {
                warn!(
                    client = %client_key,
                    endpoint = %endpoint,
                    retry_after_secs = retry_after,
                    "rate limit exceeded"
                );
            }
            return RateDecision {
                allowed: false,
                remaining: 0,
                reset_at,
                retry_after_secs: Some(retry_after),
            };
        }

        RateDecision {
            allowed: true,
            remaining: cfg.max_requests - window.count,
            reset_at: window.reset_at,
            retry_after_secs: None,
        }
    }

    /// Drop windows whose reset time has passed. Returns the number removed.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = windows.len();
        windows.retain(|_, w| now <= w.reset_at);
        let removed = before - windows.len();
        if removed > 0 {
            debug!(removed, "swept expired rate windows");
        }
        removed
    }

    /// Number of live `(client, endpoint)` windows.
    pub fn active_windows(&self) -> usize {
        match self.windows.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

// ---------------------------------------------------------------------------
// Client key resolution
// ---------------------------------------------------------------------------

/// Resolve the identity a rate window is keyed by.
///
/// Precedence: explicit override, then the first `x-forwarded-for` entry,
/// then `x-real-ip`, then `cf-connecting-ip`, then the literal `"unknown"`.
/// Header names are matched case-insensitively.
pub fn resolve_client_key(
    explicit: Option<&str>,
    headers: &HashMap<String, String>,
) -> String {
    if let Some(key) = explicit {
        if !key.is_empty() {
            return key.to_string();
        }
    }

    let header = |name: &str| -> Option<&String> {
        headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    };

    if let Some(forwarded) = header("x-forwarded-for") {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    if let Some(real_ip) = header("x-real-ip") {
        if !real_ip.is_empty() {
            return real_ip.clone();
        }
    }
    if let Some(cf_ip) = header("cf-connecting-ip") {
        if !cf_ip.is_empty() {
            return cf_ip.clone();
        }
    }
    "unknown".to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
