//! Progressive login lockout.
//!
//! Tracks failed login attempts per caller-supplied identifier (username or
//! IP) and escalates lockout duration across tiers: every
//! `max_attempts`-th failure locks the identifier for the next rung of the
//! duration ladder (1 min, 5 min, 15 min, 1 hour by default). Once the tier
//! passes the end of the ladder, no further lockouts engage; the counter
//! keeps advancing. The counter resets after an hour of quiet; a successful
//! login deletes the record entirely. Failures recorded while a lockout is
//! active do not advance the counter.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Lockout tuning, TOML-loadable as part of [`crate::config::GuardConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockoutConfig {
    /// Failures per lockout tier.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Escalating lockout durations, one per tier. Tiers beyond the ladder
    /// do not lock.
    #[serde(default = "default_ladder_secs")]
    pub ladder_secs: Vec<u64>,
    /// Quiet period after which the failure count starts over.
    #[serde(default = "default_reset_after_secs")]
    pub reset_after_secs: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_ladder_secs() -> Vec<u64> {
    vec![60, 5 * 60, 15 * 60, 60 * 60]
}

fn default_reset_after_secs() -> u64 {
    60 * 60
}

impl Default for LockoutConfig {
    fn default() -> Self {
        LockoutConfig {
            max_attempts: default_max_attempts(),
            ladder_secs: default_ladder_secs(),
            reset_after_secs: default_reset_after_secs(),
        }
    }
}

/// Current lockout state for one identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockoutStatus {
    pub locked: bool,
    /// Seconds until the active lockout expires (0 when unlocked).
    pub remaining_secs: u64,
    /// Failures left before the next lockout tier triggers.
    pub attempts_remaining: u32,
}

#[derive(Debug, Clone)]
struct AttemptRecord {
    count: u32,
    last_attempt: DateTime<Utc>,
    lockout_until: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Per-identifier progressive lockout state machine.
pub struct LoginLockout {
    records: Mutex<HashMap<String, AttemptRecord>>,
    config: LockoutConfig,
}

impl Default for LoginLockout {
    fn default() -> Self {
        Self::new(LockoutConfig::default())
    }
}

impl LoginLockout {
    pub fn new(config: LockoutConfig) -> Self {
        LoginLockout {
            records: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Record one failed login attempt.
    pub fn record_failure(&self, identifier: &str) -> LockoutStatus {
        self.record_failure_at(identifier, Utc::now())
    }

    /// [`record_failure`](Self::record_failure) with an explicit clock.
    pub fn record_failure_at(&self, identifier: &str, now: DateTime<Utc>) -> LockoutStatus {
        let mut records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let record = records
            .entry(identifier.to_string())
            .or_insert_with(|| AttemptRecord {
                count: 0,
                last_attempt: now,
                lockout_until: None,
            });

        // An active lockout absorbs further failures without counting them.
        if let Some(until) = record.lockout_until {
            if now < until {
                return LockoutStatus {
                    locked: true,
                    remaining_secs: remaining_secs(until, now),
                    attempts_remaining: 0,
                };
            }
        }

        let quiet = now.signed_duration_since(record.last_attempt);
        if quiet > Duration::seconds(self.config.reset_after_secs as i64) {
            record.count = 0;
            record.lockout_until = None;
        }

        record.count += 1;
        record.last_attempt = now;

        let max = self.config.max_attempts.max(1);
        let tier = (record.count - 1) / max;

        if record.count % max == 0 {
            if let Some(&duration_secs) = self.config.ladder_secs.get(tier as usize) {
                let until = now + Duration::seconds(duration_secs as i64);
                record.lockout_until = Some(until);
                let count = record.count;
                drop(records);
                warn!(
                    identifier = %identifier,
                    tier,
                    duration_secs,
                    failures = count,
                    "login lockout engaged"
                );
                return LockoutStatus {
                    locked: true,
                    remaining_secs: duration_secs,
                    attempts_remaining: 0,
                };
            }
        }

        LockoutStatus {
            locked: false,
            remaining_secs: 0,
            attempts_remaining: max - (record.count % max),
        }
    }

    /// Non-mutating read of the current lockout state.
    pub fn is_locked_out(&self, identifier: &str) -> LockoutStatus {
        self.is_locked_out_at(identifier, Utc::now())
    }

    /// [`is_locked_out`](Self::is_locked_out) with an explicit clock.
    pub fn is_locked_out_at(&self, identifier: &str, now: DateTime<Utc>) -> LockoutStatus {
        let records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let max = self.config.max_attempts.max(1);

        match records.get(identifier) {
            Some(record) => {
                if let Some(until) = record.lockout_until {
                    if now < until {
                        return LockoutStatus {
                            locked: true,
                            remaining_secs: remaining_secs(until, now),
                            attempts_remaining: 0,
                        };
                    }
                }
                LockoutStatus {
                    locked: false,
                    remaining_secs: 0,
                    attempts_remaining: max - (record.count % max),
                }
            }
            None => LockoutStatus {
                locked: false,
                remaining_secs: 0,
                attempts_remaining: max,
            },
        }
    }

    /// Successful login: forget the identifier entirely.
    pub fn reset_attempts(&self, identifier: &str) {
        let mut records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        records.remove(identifier);
    }

    /// Number of identifiers currently tracked.
    pub fn tracked_identifiers(&self) -> usize {
        match self.records.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

fn remaining_secs(until: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (until - now).num_milliseconds().max(0);
    ((millis + 999) / 1000) as u64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
