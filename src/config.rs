//! Crate settings, loaded from a TOML file by the host at startup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::anomaly::{AnomalyEngine, SolutionCatalogue};
use crate::lockout::LockoutConfig;
use crate::sanitize::Sanitizer;

/// Top-level configuration for the integrity core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Login lockout tuning.
    #[serde(default)]
    pub lockout: LockoutConfig,

    /// Background expiry sweep settings.
    #[serde(default)]
    pub sweeper: SweeperSettings,

    /// Anomaly engine settings.
    #[serde(default)]
    pub anomaly: AnomalySettings,

    /// Sanitizer settings.
    #[serde(default)]
    pub sanitize: SanitizeSettings,

    /// Where the JSON-lines alert sink writes, if the host uses it.
    #[serde(default = "default_alert_log_path")]
    pub alert_log_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperSettings {
    /// Seconds between expiry sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,
}

fn default_sweep_interval_secs() -> u64 {
    5 * 60
}

impl Default for SweeperSettings {
    fn default() -> Self {
        SweeperSettings {
            interval_secs: default_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnomalySettings {
    /// Optional TOML file with additional known-solution sequences,
    /// appended to the built-in catalogue.
    #[serde(default)]
    pub catalogue_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SanitizeSettings {
    /// Optional TOML file with additional threat signatures, appended to
    /// the built-in catalogue.
    #[serde(default)]
    pub signatures_path: Option<PathBuf>,
}

fn default_alert_log_path() -> PathBuf {
    PathBuf::from("alerts.jsonl")
}

impl Default for GuardConfig {
    fn default() -> Self {
        GuardConfig {
            lockout: LockoutConfig::default(),
            sweeper: SweeperSettings::default(),
            anomaly: AnomalySettings::default(),
            sanitize: SanitizeSettings::default(),
            alert_log_path: default_alert_log_path(),
        }
    }
}

impl GuardConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: GuardConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Sweep interval as a std `Duration`.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweeper.interval_secs)
    }

    /// Build the anomaly engine, merging any configured catalogue file into
    /// the built-in sequences.
    pub fn anomaly_engine(&self) -> Result<AnomalyEngine> {
        let catalogue = match &self.anomaly.catalogue_path {
            Some(path) => SolutionCatalogue::with_file(path)?,
            None => SolutionCatalogue::default(),
        };
        Ok(AnomalyEngine::new(catalogue))
    }

    /// Build the sanitizer, merging any configured signature file into the
    /// built-in catalogue.
    pub fn sanitizer(&self) -> Result<Sanitizer> {
        match &self.sanitize.signatures_path {
            Some(path) => Sanitizer::with_signature_file(path),
            None => Ok(Sanitizer::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let c = GuardConfig::default();
        assert_eq!(c.sweeper.interval_secs, 300);
        assert_eq!(c.lockout.max_attempts, 5);
        assert_eq!(c.lockout.ladder_secs, vec![60, 300, 900, 3600]);
        assert_eq!(c.alert_log_path, PathBuf::from("alerts.jsonl"));
        assert!(c.anomaly.catalogue_path.is_none());
    }

    #[test]
    fn test_load_partial_toml_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guard.toml");
        {
            let mut f = std::fs::File::create(&path).unwrap();
            write!(
                f,
                r#"
alert_log_path = "/var/log/portal/alerts.jsonl"

[lockout]
max_attempts = 3

[sweeper]
interval_secs = 60
"#
            )
            .unwrap();
        }
        let c = GuardConfig::load_from_file(&path).unwrap();
        assert_eq!(c.lockout.max_attempts, 3);
        // Unspecified lockout fields keep their defaults.
        assert_eq!(c.lockout.ladder_secs, vec![60, 300, 900, 3600]);
        assert_eq!(c.sweep_interval(), Duration::from_secs(60));
        assert_eq!(
            c.alert_log_path,
            PathBuf::from("/var/log/portal/alerts.jsonl")
        );
    }

    #[test]
    fn test_builders_with_defaults() {
        let c = GuardConfig::default();
        assert!(c.anomaly_engine().is_ok());
        assert!(c.sanitizer().is_ok());
    }
}
