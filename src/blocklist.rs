//! Time-boxed IP deny list.
//!
//! A standalone keyed store with no escalation logic: callers decide when
//! and for how long to block (for example after a lockout tier engages).
//! Expired entries are evicted lazily on read and by the background sweep.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct BlockEntry {
    until: DateTime<Utc>,
    reason: String,
}

/// Result of a block lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockStatus {
    pub blocked: bool,
    pub reason: Option<String>,
    /// Milliseconds until the block expires (0 when not blocked).
    pub remaining_ms: i64,
}

impl BlockStatus {
    fn clear() -> Self {
        BlockStatus {
            blocked: false,
            reason: None,
            remaining_ms: 0,
        }
    }
}

/// Shared deny list keyed by IP string.
pub struct IpBlocklist {
    entries: Mutex<HashMap<String, BlockEntry>>,
}

impl Default for IpBlocklist {
    fn default() -> Self {
        Self::new()
    }
}

impl IpBlocklist {
    pub fn new() -> Self {
        IpBlocklist {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Block `ip` for `duration` from now. Re-blocking overwrites the
    /// existing entry.
    pub fn block(&self, ip: &str, duration: Duration, reason: &str) {
        self.block_at(ip, duration, reason, Utc::now());
    }

    /// [`block`](Self::block) with an explicit clock.
    pub fn block_at(&self, ip: &str, duration: Duration, reason: &str, now: DateTime<Utc>) {
        let until = now + duration;
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.insert(
            ip.to_string(),
            BlockEntry {
                until,
                reason: reason.to_string(),
            },
        );
        drop(entries);
        warn!(ip = %ip, reason = %reason, until = %until, "ip blocked");
    }

    /// Look up `ip`, lazily evicting an expired entry.
    pub fn is_blocked(&self, ip: &str) -> BlockStatus {
        self.is_blocked_at(ip, Utc::now())
    }

    /// [`is_blocked`](Self::is_blocked) with an explicit clock.
    pub fn is_blocked_at(&self, ip: &str, now: DateTime<Utc>) -> BlockStatus {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match entries.get(ip) {
            Some(entry) if now < entry.until => BlockStatus {
                blocked: true,
                reason: Some(entry.reason.clone()),
                remaining_ms: (entry.until - now).num_milliseconds(),
            },
            Some(_) => {
                entries.remove(ip);
                BlockStatus::clear()
            }
            None => BlockStatus::clear(),
        }
    }

    /// Remove a block explicitly, before it expires.
    pub fn unblock(&self, ip: &str) {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.remove(ip);
    }

    /// Drop expired entries. Returns the number removed.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = entries.len();
        entries.retain(|_, e| now < e.until);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "swept expired ip blocks");
        }
        removed
    }

    /// Number of live block entries.
    pub fn active_blocks(&self) -> usize {
        match self.entries.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_then_lookup() {
        let bl = IpBlocklist::new();
        let now = Utc::now();
        bl.block_at("10.0.0.1", Duration::minutes(10), "lockout escalation", now);
        let s = bl.is_blocked_at("10.0.0.1", now + Duration::minutes(1));
        assert!(s.blocked);
        assert_eq!(s.reason.as_deref(), Some("lockout escalation"));
        assert!(s.remaining_ms > 0 && s.remaining_ms <= 10 * 60 * 1000);
    }

    #[test]
    fn test_expired_entry_evicted_on_read() {
        let bl = IpBlocklist::new();
        let now = Utc::now();
        bl.block_at("10.0.0.2", Duration::seconds(30), "test", now);
        let s = bl.is_blocked_at("10.0.0.2", now + Duration::seconds(31));
        assert!(!s.blocked);
        assert_eq!(s.remaining_ms, 0);
        assert_eq!(bl.active_blocks(), 0);
    }

    #[test]
    fn test_unblock_removes_before_expiry() {
        let bl = IpBlocklist::new();
        let now = Utc::now();
        bl.block_at("10.0.0.3", Duration::hours(1), "abuse", now);
        bl.unblock("10.0.0.3");
        assert!(!bl.is_blocked_at("10.0.0.3", now).blocked);
    }

    #[test]
    fn test_reblock_overwrites() {
        let bl = IpBlocklist::new();
        let now = Utc::now();
        bl.block_at("10.0.0.4", Duration::seconds(10), "first", now);
        bl.block_at("10.0.0.4", Duration::hours(1), "second", now);
        let s = bl.is_blocked_at("10.0.0.4", now + Duration::minutes(5));
        assert!(s.blocked);
        assert_eq!(s.reason.as_deref(), Some("second"));
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let bl = IpBlocklist::new();
        let now = Utc::now();
        bl.block_at("a", Duration::seconds(5), "short", now);
        bl.block_at("b", Duration::hours(5), "long", now);
        let removed = bl.sweep_expired(now + Duration::seconds(10));
        assert_eq!(removed, 1);
        assert!(bl.is_blocked_at("b", now + Duration::seconds(10)).blocked);
    }

    #[test]
    fn test_unknown_ip_not_blocked() {
        let bl = IpBlocklist::new();
        assert!(!bl.is_blocked("203.0.113.9").blocked);
    }
}
