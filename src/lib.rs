//! # labguard
//!
//! Integrity and abuse-defense core for the lab portal. The host web layer
//! calls into this crate per request; the crate owns no HTTP surface, no
//! database and no UI. It provides:
//!
//! - [`sanitize`] — a pure threat pattern classifier/sanitizer for untrusted
//!   input (markup, query, command, path, email, username, JSON).
//! - [`rate_limit`] — a fixed-window request limiter keyed by client and
//!   endpoint, with named presets per endpoint class.
//! - [`lockout`] — a progressive login lockout with an escalating duration
//!   ladder.
//! - [`blocklist`] — a time-boxed IP deny list.
//! - [`anomaly`] — a behavioral anomaly engine scoring student command
//!   history for suspected cheating.
//! - [`audit`] — suspicion alert records and the sink the host persists
//!   them through.
//! - [`sweeper`] — a background thread that expires stale rate-limit and
//!   block entries.
//!
//! All stateful services take `&self` and are safe to share across request
//! threads via `Arc`. History retrieval and alert persistence are the host's
//! responsibility; nothing here blocks on network or disk in the hot path.

pub mod anomaly;
pub mod audit;
pub mod blocklist;
pub mod config;
pub mod lockout;
pub mod rate_limit;
pub mod sanitize;
pub mod sweeper;

pub use anomaly::{
    detect_ip_change, AnomalyEngine, CommandEvent, CommandHistoryProvider, CompletionSnapshot,
    IpChange, SuspicionLevel, SuspicionVerdict,
};
pub use audit::{emit_alert, AlertRecord, AlertSink, JsonLinesAlertSink};
pub use blocklist::{BlockStatus, IpBlocklist};
pub use config::GuardConfig;
pub use lockout::{LockoutConfig, LockoutStatus, LoginLockout};
pub use rate_limit::{resolve_client_key, RateDecision, RateLimitConfig, RateLimiter};
pub use sanitize::{
    classify_and_sanitize, InputKind, SanitizeOutcome, Sanitizer, ThreatCategory, ThreatFinding,
};
pub use sweeper::Sweeper;
