//! Behavioral anomaly detection for student terminal activity.
//!
//! The engine is stateless: every evaluation receives a bounded, newest-first
//! window of the student's recent [`CommandEvent`]s from the host (which owns
//! persistence) and returns a fresh [`SuspicionVerdict`]. Verdicts are
//! advisory — `is_suspected` creates an alert for human review and never
//! blocks anything automatically.

pub mod engine;
pub mod sequences;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use engine::AnomalyEngine;
pub use sequences::{sequence_match_ratio, SolutionCatalogue, SolutionSequence};

// ---------------------------------------------------------------------------
// History window contract
// ---------------------------------------------------------------------------

/// How far back the history window reaches.
pub const HISTORY_WINDOW_MINUTES: i64 = 30;
/// Maximum events per history window.
pub const HISTORY_MAX_EVENTS: usize = 50;

/// One already-executed terminal command, as recorded by the host.
/// Immutable input; the engine never writes these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEvent {
    pub student_id: String,
    pub session_id: String,
    pub command_text: String,
    /// Whether the simulator accepted the command.
    pub is_valid: bool,
    pub execution_time_ms: i64,
    pub created_at: DateTime<Utc>,
}

/// Read-only history access the host supplies. Implementations must return
/// events newest-first, limited to the last [`HISTORY_WINDOW_MINUTES`] and
/// at most [`HISTORY_MAX_EVENTS`] entries.
pub trait CommandHistoryProvider {
    fn recent_commands(
        &self,
        student_id: &str,
        session_id: &str,
    ) -> anyhow::Result<Vec<CommandEvent>>;
}

// ---------------------------------------------------------------------------
// Verdicts
// ---------------------------------------------------------------------------

/// Graded suspicion level derived from the summed heuristic score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuspicionLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl SuspicionLevel {
    /// Level thresholds on the summed 0–100 score.
    pub fn from_score(score: u32) -> Self {
        match score {
            0..=39 => SuspicionLevel::Low,
            40..=59 => SuspicionLevel::Medium,
            60..=79 => SuspicionLevel::High,
            _ => SuspicionLevel::Critical,
        }
    }
}

/// Score at or above which a verdict is flagged for human review.
pub const SUSPECT_THRESHOLD: u32 = 50;

/// Outcome of one anomaly evaluation. Produced fresh per call; the host
/// persists it (as an [`crate::audit::AlertRecord`]) only when
/// `is_suspected` is true.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspicionVerdict {
    pub is_suspected: bool,
    pub level: SuspicionLevel,
    /// Summed heuristic score, clamped to 0–100.
    pub score: u32,
    /// One explanation per triggered heuristic, in heuristic order.
    pub reasons: Vec<String>,
}

impl SuspicionVerdict {
    pub(crate) fn from_points(points: u32, reasons: Vec<String>) -> Self {
        let score = points.min(100);
        SuspicionVerdict {
            is_suspected: score >= SUSPECT_THRESHOLD,
            level: SuspicionLevel::from_score(score),
            score,
            reasons,
        }
    }
}

/// Summary of one completed lab, for the per-completion analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionSnapshot {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub hints_used: u32,
    /// Number of success criteria the lab defines.
    pub success_criteria_count: u32,
}

// ---------------------------------------------------------------------------
// IP change detection
// ---------------------------------------------------------------------------

/// Result of comparing the previous event's IP with the current request IP.
/// Carries no score and never blocks — audit flag only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpChange {
    pub changed: bool,
    pub previous: String,
}

/// Compare the IP of the immediately preceding event for this
/// student/session against the current request IP.
pub fn detect_ip_change(previous_ip: &str, current_ip: &str) -> IpChange {
    IpChange {
        changed: previous_ip != current_ip,
        previous: previous_ip.to_string(),
    }
}
