//! Anomaly scoring engine.
//!
//! Six independent additive heuristics over a command-history window, plus a
//! separate per-completion analysis. Points are cumulative within one
//! evaluation; the summed score is clamped to 100 and graded by
//! [`SuspicionLevel::from_score`](super::SuspicionLevel::from_score). Every
//! triggered heuristic contributes a human-readable reason so instructors
//! can review verdicts without reading code.

use chrono::Duration;
use tracing::debug;

use super::sequences::SolutionCatalogue;
use super::{CommandEvent, CompletionSnapshot, SuspicionVerdict};

// Command heuristics.
const RAPID_SAMPLE: usize = 5;
const RAPID_MEAN_MS: f64 = 500.0;
const RAPID_POINTS: u32 = 25;
const PASTE_LENGTH: usize = 50;
const PASTE_POINTS: u32 = 15;
const DUPLICATE_THRESHOLD: usize = 10;
const DUPLICATE_POINTS: u32 = 20;
const FAST_EXEC_MS: i64 = 100;
const FAST_EXEC_POINTS: u32 = 10;
const STREAK_SAMPLE: usize = 10;
const STREAK_POINTS: u32 = 30;
const SEQUENCE_SAMPLE: usize = 5;
const SEQUENCE_POINTS: u32 = 40;

// Completion heuristics.
const FAST_COMPLETION_SECS: i64 = 5 * 60;
const FAST_COMPLETION_POINTS: u32 = 50;
const FLAWLESS_MIN_COMMANDS: usize = 10;
const FLAWLESS_POINTS: u32 = 30;
const NO_HINT_COMPLETION_SECS: i64 = 10 * 60;
const NO_HINT_POINTS: u32 = 20;
const SPARSE_COMMAND_POINTS: u32 = 25;

/// Stateless scorer over caller-supplied history windows. Holds only the
/// solution catalogue (configuration data), so one instance is shared
/// freely across threads.
pub struct AnomalyEngine {
    catalogue: SolutionCatalogue,
}

impl Default for AnomalyEngine {
    fn default() -> Self {
        Self::new(SolutionCatalogue::default())
    }
}

impl AnomalyEngine {
    pub fn new(catalogue: SolutionCatalogue) -> Self {
        AnomalyEngine { catalogue }
    }

    /// Score one just-executed command against the student's recent window.
    ///
    /// `history` is newest-first, bounded per the
    /// [`CommandHistoryProvider`](super::CommandHistoryProvider) contract,
    /// and does not include the command being evaluated unless the host has
    /// already recorded it.
    pub fn evaluate_command(
        &self,
        student_id: &str,
        session_id: &str,
        command: &str,
        execution_time_ms: i64,
        history: &[CommandEvent],
    ) -> SuspicionVerdict {
        let mut points = 0u32;
        let mut reasons = Vec::new();

        // 1. Rapid execution: mean inter-arrival of the newest 5 events.
        if history.len() >= RAPID_SAMPLE {
            if let Some(mean_ms) = mean_interarrival_ms(&history[..RAPID_SAMPLE]) {
                if mean_ms < RAPID_MEAN_MS {
                    points += RAPID_POINTS;
                    reasons.push(format!(
                        "rapid command execution: mean interval {mean_ms:.0}ms over the last {RAPID_SAMPLE} commands"
                    ));
                }
            }
        }

        // 2. Paste-length command.
        if command.chars().count() > PASTE_LENGTH {
            points += PASTE_POINTS;
            reasons.push(format!(
                "unusually long command ({} characters) suggests pasting",
                command.chars().count()
            ));
        }

        // 3. Duplicate command spam.
        let duplicates = history
            .iter()
            .filter(|e| e.command_text == command)
            .count();
        if duplicates > DUPLICATE_THRESHOLD {
            points += DUPLICATE_POINTS;
            reasons.push(format!(
                "identical command repeated {duplicates} times in the recent window"
            ));
        }

        // 4. Implausibly fast execution.
        if execution_time_ms < FAST_EXEC_MS {
            points += FAST_EXEC_POINTS;
            reasons.push(format!(
                "command completed in {execution_time_ms}ms, below the {FAST_EXEC_MS}ms floor"
            ));
        }

        // 5. No-failure streak across the newest 10 events.
        if history.len() >= STREAK_SAMPLE && history[..STREAK_SAMPLE].iter().all(|e| e.is_valid) {
            points += STREAK_POINTS;
            reasons.push(format!(
                "last {STREAK_SAMPLE} commands all succeeded with no failures"
            ));
        }

        // 6. Known-solution sequence replay. The newest events are reversed
        // into chronological order before matching.
        let sample: Vec<&str> = history
            .iter()
            .take(SEQUENCE_SAMPLE)
            .rev()
            .map(|e| e.command_text.as_str())
            .collect();
        if let Some(sequence) = self.catalogue.first_match(&sample) {
            points += SEQUENCE_POINTS;
            reasons.push(format!(
                "recent commands replay the known solution for '{}'",
                sequence.name
            ));
        }

        let verdict = SuspicionVerdict::from_points(points, reasons);
        debug!(
            student = %student_id,
            session = %session_id,
            score = verdict.score,
            suspected = verdict.is_suspected,
            "command anomaly evaluated"
        );
        verdict
    }

    /// Score one lab completion. Runs once per completion event, not per
    /// command; `commands` is the full command list for the lab attempt.
    pub fn evaluate_completion(
        &self,
        progress: &CompletionSnapshot,
        commands: &[CommandEvent],
    ) -> SuspicionVerdict {
        let mut points = 0u32;
        let mut reasons = Vec::new();

        let duration = progress
            .completed_at
            .signed_duration_since(progress.started_at);
        let total = commands.len();
        let failures = commands.iter().filter(|e| !e.is_valid).count();

        if duration < Duration::seconds(FAST_COMPLETION_SECS) {
            points += FAST_COMPLETION_POINTS;
            reasons.push(format!(
                "lab completed in {} minutes, faster than the {}-minute floor",
                duration.num_minutes(),
                FAST_COMPLETION_SECS / 60
            ));
        }

        if total > FLAWLESS_MIN_COMMANDS && failures == 0 {
            points += FLAWLESS_POINTS;
            reasons.push(format!(
                "zero failed commands across {total} total commands"
            ));
        }

        if duration < Duration::seconds(NO_HINT_COMPLETION_SECS) && progress.hints_used == 0 {
            points += NO_HINT_POINTS;
            reasons.push(format!(
                "completed in under {} minutes without using any hints",
                NO_HINT_COMPLETION_SECS / 60
            ));
        }

        let expected_floor = 2 * progress.success_criteria_count as usize;
        if total < expected_floor {
            points += SPARSE_COMMAND_POINTS;
            reasons.push(format!(
                "only {total} commands for a lab with {} success criteria",
                progress.success_criteria_count
            ));
        }

        SuspicionVerdict::from_points(points, reasons)
    }
}

/// Mean gap in milliseconds between consecutive events of a newest-first
/// slice. `None` when there are fewer than two events.
fn mean_interarrival_ms(newest_first: &[CommandEvent]) -> Option<f64> {
    if newest_first.len() < 2 {
        return None;
    }
    let total: i64 = newest_first
        .windows(2)
        .map(|pair| {
            pair[0]
                .created_at
                .signed_duration_since(pair[1].created_at)
                .num_milliseconds()
                .max(0)
        })
        .sum();
    Some(total as f64 / (newest_first.len() - 1) as f64)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn engine() -> AnomalyEngine {
        AnomalyEngine::default()
    }

    /// Newest-first history of `commands`, spaced `gap_ms` apart, all valid,
    /// each taking 500ms to execute.
    fn history(commands: &[&str], gap_ms: i64) -> Vec<CommandEvent> {
        let base = Utc::now();
        commands
            .iter()
            .enumerate()
            .map(|(i, c)| event(c, true, base - Duration::milliseconds(gap_ms * i as i64)))
            .collect()
    }

    fn event(command: &str, is_valid: bool, created_at: DateTime<Utc>) -> CommandEvent {
        CommandEvent {
            student_id: "s1".into(),
            session_id: "sess1".into(),
            command_text: command.into(),
            is_valid,
            execution_time_ms: 500,
            created_at,
        }
    }

    fn eval(e: &AnomalyEngine, command: &str, exec_ms: i64, h: &[CommandEvent]) -> SuspicionVerdict {
        e.evaluate_command("s1", "sess1", command, exec_ms, h)
    }

    // --- Heuristic 1: rapid execution ---

    #[test]
    fn test_rapid_execution_scores() {
        // 5 identical-looking events 300ms apart.
        let h = history(&["pwd", "ls", "cd /tmp", "ls", "pwd"], 300);
        let v = eval(&engine(), "ls", 500, &h);
        assert!(v.score >= 25, "score {} should include rapid points", v.score);
        assert!(v.reasons.iter().any(|r| r.contains("rapid")));
    }

    #[test]
    fn test_five_commands_within_two_seconds_flagged_rapid() {
        // 5 events inside a 2-second span (mean 400ms).
        let h = history(&["make", "make", "make", "make", "make"], 400);
        let v = eval(&engine(), "make", 500, &h);
        assert!(v.score >= 25);
        assert!(v.reasons.iter().any(|r| r.contains("rapid")));
    }

    #[test]
    fn test_slow_pace_not_rapid() {
        let h = history(&["pwd", "ls", "cat a", "ls", "pwd"], 5_000);
        let v = eval(&engine(), "ls", 500, &h);
        assert!(!v.reasons.iter().any(|r| r.contains("rapid")));
    }

    #[test]
    fn test_fewer_than_five_events_never_rapid() {
        let h = history(&["a", "b", "c", "d"], 10);
        let v = eval(&engine(), "e", 500, &h);
        assert!(!v.reasons.iter().any(|r| r.contains("rapid")));
    }

    // --- Heuristic 2: paste length ---

    #[test]
    fn test_long_command_flagged_as_paste() {
        let long = "find / -type f -name '*.conf' -exec grep -l timeout {} \\;";
        assert!(long.len() > 50);
        let v = eval(&engine(), long, 500, &[]);
        assert_eq!(v.score, 15);
        assert!(v.reasons.iter().any(|r| r.contains("long command")));
    }

    #[test]
    fn test_boundary_fifty_characters_not_flagged() {
        let cmd = "a".repeat(50);
        let v = eval(&engine(), &cmd, 500, &[]);
        assert_eq!(v.score, 0);
    }

    // --- Heuristic 3: duplicate command ---

    #[test]
    fn test_duplicate_command_spam() {
        let cmds: Vec<&str> = std::iter::repeat("ls -la").take(11).collect();
        let h = history(&cmds, 5_000);
        let v = eval(&engine(), "ls -la", 500, &h);
        assert!(v.reasons.iter().any(|r| r.contains("repeated 11 times")));
        assert!(v.score >= 20);
    }

    #[test]
    fn test_ten_duplicates_not_enough() {
        let cmds: Vec<&str> = std::iter::repeat("ls -la").take(10).collect();
        let h = history(&cmds, 5_000);
        let v = eval(&engine(), "ls -la", 500, &h);
        assert!(!v.reasons.iter().any(|r| r.contains("repeated")));
    }

    // --- Heuristic 4: too-fast execution ---

    #[test]
    fn test_fast_execution_flagged() {
        let v = eval(&engine(), "ls", 40, &[]);
        assert_eq!(v.score, 10);
        assert!(v.reasons.iter().any(|r| r.contains("40ms")));
    }

    #[test]
    fn test_hundred_ms_execution_not_flagged() {
        let v = eval(&engine(), "ls", 100, &[]);
        assert_eq!(v.score, 0);
    }

    // --- Heuristic 5: no-failure streak ---

    #[test]
    fn test_ten_event_success_streak() {
        let cmds: Vec<&str> = (0..10).map(|_| "ok").collect();
        let h = history(&cmds, 60_000);
        let v = eval(&engine(), "ok", 500, &h);
        assert!(v.reasons.iter().any(|r| r.contains("no failures")));
    }

    #[test]
    fn test_streak_broken_by_one_failure() {
        let base = Utc::now();
        let mut h: Vec<CommandEvent> = (0..10)
            .map(|i| event("ok", true, base - Duration::seconds(60 * i as i64)))
            .collect();
        h[3].is_valid = false;
        let v = eval(&engine(), "ok", 500, &h);
        assert!(!v.reasons.iter().any(|r| r.contains("no failures")));
    }

    #[test]
    fn test_streak_needs_ten_events() {
        let cmds: Vec<&str> = (0..9).map(|_| "ok").collect();
        let h = history(&cmds, 60_000);
        let v = eval(&engine(), "ok", 500, &h);
        assert!(!v.reasons.iter().any(|r| r.contains("no failures")));
    }

    // --- Heuristic 6: solution sequence replay ---

    #[test]
    fn test_solution_replay_scores_forty() {
        // Newest-first: the walkthrough replayed in order means the history
        // is stored in reverse.
        let h = history(
            &[
                "stat report.txt",
                "chown student report.txt",
                "chmod +x run.sh",
                "chmod 644 report.txt",
                "ls -l",
            ],
            60_000,
        );
        let v = eval(&engine(), "stat report.txt", 500, &h);
        assert!(v.score >= 40);
        assert!(v
            .reasons
            .iter()
            .any(|r| r.contains("file-permissions-lab")));
    }

    // --- Combined ---

    #[test]
    fn test_empty_history_short_slow_command_scores_zero() {
        let v = eval(&engine(), "ls", 500, &[]);
        assert_eq!(v.score, 0);
        assert!(!v.is_suspected);
        assert!(v.reasons.is_empty());
        assert_eq!(v.level, super::super::SuspicionLevel::Low);
    }

    #[test]
    fn test_heuristics_are_cumulative() {
        // Rapid (25) + streak (30) needs 10 rapid successes; score 55 → Medium,
        // suspected.
        let cmds: Vec<&str> = (0..10).map(|_| "ok").collect();
        let h = history(&cmds, 100);
        let v = eval(&engine(), "ok", 500, &h);
        assert!(v.score >= 55, "got {}", v.score);
        assert!(v.is_suspected);
        assert!(v.reasons.len() >= 2);
    }

    // --- Completion analysis ---

    fn snapshot(duration_secs: i64, hints: u32, criteria: u32) -> CompletionSnapshot {
        let end = Utc::now();
        CompletionSnapshot {
            started_at: end - Duration::seconds(duration_secs),
            completed_at: end,
            hints_used: hints,
            success_criteria_count: criteria,
        }
    }

    #[test]
    fn test_completion_too_fast_is_critical() {
        // 3 minutes, no hints, 4 commands for 6 criteria:
        // 50 + 20 + 25 = 95 → Critical.
        let cmds = history(&["a", "b", "c", "d"], 30_000);
        let v = engine().evaluate_completion(&snapshot(3 * 60, 0, 6), &cmds);
        assert_eq!(v.score, 95);
        assert_eq!(v.level, super::super::SuspicionLevel::Critical);
        assert!(v.is_suspected);
    }

    #[test]
    fn test_completion_flawless_long_run() {
        // 40 minutes, hints used, 12 commands all valid: only the
        // zero-failures heuristic fires.
        let cmds: Vec<&str> = (0..12).map(|_| "ok").collect();
        let v = engine().evaluate_completion(&snapshot(40 * 60, 2, 5), &history(&cmds, 60_000));
        assert_eq!(v.score, 30);
        assert!(!v.is_suspected);
    }

    #[test]
    fn test_completion_honest_run_scores_zero() {
        let base = Utc::now();
        let mut cmds: Vec<CommandEvent> = (0..14)
            .map(|i| event("work", true, base - Duration::seconds(90 * i as i64)))
            .collect();
        cmds[2].is_valid = false;
        cmds[7].is_valid = false;
        let v = engine().evaluate_completion(&snapshot(25 * 60, 1, 5), &cmds);
        assert_eq!(v.score, 0);
        assert!(!v.is_suspected);
    }

    #[test]
    fn test_completion_sparse_commands_only() {
        // 15 minutes, hints used, 5 commands with failures, 4 criteria →
        // only the sparse-command heuristic (5 < 8).
        let base = Utc::now();
        let mut cmds: Vec<CommandEvent> = (0..5)
            .map(|i| event("work", true, base - Duration::seconds(120 * i as i64)))
            .collect();
        cmds[1].is_valid = false;
        let v = engine().evaluate_completion(&snapshot(15 * 60, 1, 4), &cmds);
        assert_eq!(v.score, 25);
    }

    // --- mean_interarrival_ms ---

    #[test]
    fn test_mean_interarrival_requires_two_events() {
        let h = history(&["a"], 100);
        assert!(mean_interarrival_ms(&h).is_none());
    }

    #[test]
    fn test_mean_interarrival_value() {
        let h = history(&["a", "b", "c"], 200);
        let mean = mean_interarrival_ms(&h).unwrap();
        assert!((mean - 200.0).abs() < 1.0);
    }
}
