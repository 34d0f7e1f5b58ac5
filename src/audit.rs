//! Suspicion alert records and sinks.
//!
//! When an evaluation comes back suspected, the host turns the verdict into
//! an [`AlertRecord`] and hands it to an [`AlertSink`] for durable storage.
//! Sink failures are logged and swallowed by [`emit_alert`]: the student's
//! request already succeeded or failed on its own merits, and the security
//! layer must never turn a persistence problem into a rejection.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::anomaly::{SuspicionLevel, SuspicionVerdict};

/// A persisted suspicion alert, one JSON line per record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub alert_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub student_id: String,
    pub session_id: String,
    /// Request IP at evaluation time, when the host knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// Which evaluation produced this alert: `"command"` or `"completion"`.
    pub source: String,
    pub level: SuspicionLevel,
    pub score: u32,
    pub reasons: Vec<String>,
}

impl AlertRecord {
    /// Build an alert from a verdict. The caller is expected to do this only
    /// when `verdict.is_suspected` is true.
    pub fn from_verdict(
        student_id: &str,
        session_id: &str,
        ip: Option<&str>,
        source: &str,
        verdict: &SuspicionVerdict,
    ) -> Self {
        AlertRecord {
            alert_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            student_id: student_id.to_string(),
            session_id: session_id.to_string(),
            ip: ip.map(str::to_string),
            source: source.to_string(),
            level: verdict.level,
            score: verdict.score,
            reasons: verdict.reasons.clone(),
        }
    }
}

/// Durable storage for alerts, implemented by the host (database, queue) or
/// by [`JsonLinesAlertSink`] for simple deployments.
pub trait AlertSink: Send + Sync {
    fn record(&self, alert: &AlertRecord) -> Result<()>;
}

/// Persist `alert`, logging and swallowing any sink failure.
pub fn emit_alert(sink: &dyn AlertSink, alert: &AlertRecord) {
    if let Err(e) = sink.record(alert) {
        warn!(
            alert_id = %alert.alert_id,
            student = %alert.student_id,
            error = %e,
            "failed to persist suspicion alert"
        );
    }
}

/// Append-only JSON-lines file sink.
pub struct JsonLinesAlertSink {
    writer: Mutex<BufWriter<File>>,
}

impl JsonLinesAlertSink {
    /// Open (or create) the alert log at `path` in append mode.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating alert log directory {}", parent.display()))?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening alert log {}", path.display()))?;
        Ok(JsonLinesAlertSink {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }
}

impl AlertSink for JsonLinesAlertSink {
    fn record(&self, alert: &AlertRecord) -> Result<()> {
        let json = serde_json::to_string(alert)?;
        let mut writer = match self.writer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        writeln!(writer, "{json}")?;
        // Alert volume is human-review scale; flush per record so reviewers
        // see alerts immediately.
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::SuspicionVerdict;
    use std::io::BufRead;

    fn verdict() -> SuspicionVerdict {
        SuspicionVerdict {
            is_suspected: true,
            level: SuspicionLevel::High,
            score: 65,
            reasons: vec!["rapid command execution".into()],
        }
    }

    #[test]
    fn test_alert_from_verdict_copies_fields() {
        let a = AlertRecord::from_verdict("s1", "sess1", Some("1.2.3.4"), "command", &verdict());
        assert_eq!(a.student_id, "s1");
        assert_eq!(a.score, 65);
        assert_eq!(a.level, SuspicionLevel::High);
        assert_eq!(a.ip.as_deref(), Some("1.2.3.4"));
        assert_eq!(a.reasons.len(), 1);
    }

    #[test]
    fn test_jsonl_sink_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.jsonl");
        let sink = JsonLinesAlertSink::open(&path).unwrap();

        let a = AlertRecord::from_verdict("s1", "sess1", None, "completion", &verdict());
        sink.record(&a).unwrap();
        sink.record(&a).unwrap();

        let file = std::fs::File::open(&path).unwrap();
        let lines: Vec<String> = std::io::BufReader::new(file)
            .lines()
            .map(|l| l.unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        let parsed: AlertRecord = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(parsed.alert_id, a.alert_id);
        assert_eq!(parsed.source, "completion");
    }

    #[test]
    fn test_emit_alert_swallows_sink_failure() {
        struct FailingSink;
        impl AlertSink for FailingSink {
            fn record(&self, _alert: &AlertRecord) -> Result<()> {
                anyhow::bail!("database unavailable")
            }
        }
        let a = AlertRecord::from_verdict("s1", "sess1", None, "command", &verdict());
        // Must not panic or propagate.
        emit_alert(&FailingSink, &a);
    }

    #[test]
    fn test_sink_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/dir/alerts.jsonl");
        let sink = JsonLinesAlertSink::open(&path).unwrap();
        let a = AlertRecord::from_verdict("s1", "sess1", None, "command", &verdict());
        sink.record(&a).unwrap();
        assert!(path.exists());
    }
}
