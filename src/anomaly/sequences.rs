//! Known-solution command sequences.
//!
//! Each lab with a published walkthrough has a reference command sequence.
//! A student's recent commands are compared against the catalogue by
//! substring containment: a sequence matches when at least 80% of its
//! reference entries, scanned in order, are contained in some sampled
//! command. The matching is deliberately fuzzy and can whitelist by
//! coincidence, which is why the catalogue is configuration data (built-in
//! defaults plus an optional TOML file) rather than hard-coded literals,
//! and why a match only contributes points to an advisory score.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Fraction of reference entries that must be contained in the sample.
pub const SEQUENCE_MATCH_THRESHOLD: f64 = 0.8;

/// A reference solution for one lab.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolutionSequence {
    /// Lab identifier reported in the verdict reason.
    pub name: String,
    /// Reference commands in walkthrough order.
    pub commands: Vec<String>,
}

/// Top-level structure of the catalogue TOML file.
#[derive(Debug, Deserialize)]
struct CatalogueFile {
    #[serde(default)]
    sequence: Vec<SolutionSequence>,
}

/// The set of known solution sequences.
pub struct SolutionCatalogue {
    sequences: Vec<SolutionSequence>,
}

impl Default for SolutionCatalogue {
    fn default() -> Self {
        SolutionCatalogue {
            sequences: builtin_sequences(),
        }
    }
}

impl SolutionCatalogue {
    /// Built-in sequences plus any loaded from `path`.
    pub fn with_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let file: CatalogueFile = toml::from_str(&contents)?;
        let mut sequences = builtin_sequences();
        sequences.extend(file.sequence);
        Ok(SolutionCatalogue { sequences })
    }

    /// Only the sequences from `path`, no built-ins.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let file: CatalogueFile = toml::from_str(&contents)?;
        Ok(SolutionCatalogue {
            sequences: file.sequence,
        })
    }

    /// First sequence whose match ratio reaches the threshold, if any.
    /// `sample` must be in chronological order.
    pub fn first_match(&self, sample: &[&str]) -> Option<&SolutionSequence> {
        self.sequences
            .iter()
            .find(|seq| sequence_match_ratio(&seq.commands, sample) >= SEQUENCE_MATCH_THRESHOLD)
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }
}

/// Fraction of `reference` entries contained in some sample command.
///
/// Reference commands are scanned in order; any sample command may satisfy
/// any one reference entry (containment, not equality; samples are not
/// consumed).
pub fn sequence_match_ratio(reference: &[String], sample: &[&str]) -> f64 {
    if reference.is_empty() {
        return 0.0;
    }
    let matched = reference
        .iter()
        .filter(|r| sample.iter().any(|s| s.contains(r.as_str())))
        .count();
    matched as f64 / reference.len() as f64
}

fn seq(name: &str, commands: &[&str]) -> SolutionSequence {
    SolutionSequence {
        name: name.into(),
        commands: commands.iter().map(|c| c.to_string()).collect(),
    }
}

/// Reference sequences for the labs that ship with the portal.
fn builtin_sequences() -> Vec<SolutionSequence> {
    vec![
        seq(
            "file-permissions-lab",
            &["ls -l", "chmod 644", "chmod +x", "chown", "stat"],
        ),
        seq(
            "networking-basics-lab",
            &["ping -c", "ip addr", "netstat -tuln", "curl", "traceroute"],
        ),
        seq(
            "log-analysis-lab",
            &["cd /var/log", "grep -i error", "tail -n 50", "awk", "wc -l"],
        ),
        seq(
            "user-management-lab",
            &["useradd", "passwd", "usermod -aG", "groups", "id"],
        ),
        seq(
            "process-control-lab",
            &["ps aux", "top", "kill -9", "nice -n", "jobs"],
        ),
    ]
}
