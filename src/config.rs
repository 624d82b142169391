//! Configuration module for WebCanary.
//!
//! Process-level settings come from environment variables with sensible
//! defaults. The monitored target set and alarm policies come from a JSON
//! file that is re-read at the start of every cycle, so edits take effect
//! without a restart.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::alarm::{AlarmPolicies, PolicyError};

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read target file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse target file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid alarm policy: {0}")]
    Policy(#[from] PolicyError),
}

/// Process configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct CanaryConfig {
    /// Path to the JSON file listing monitored targets (default: "sites.json")
    pub targets_path: PathBuf,
    /// Path to the SQLite alarm event database (default: "webcanary.db")
    pub db_path: String,
    /// Probe cycle interval (default: 300 seconds)
    pub interval: Duration,
    /// Maximum number of concurrent probes per cycle (default: 16)
    pub probe_concurrency: usize,
}

impl Default for CanaryConfig {
    fn default() -> Self {
        Self {
            targets_path: PathBuf::from("sites.json"),
            db_path: "webcanary.db".to_string(),
            interval: Duration::from_secs(300),
            probe_concurrency: 16,
        }
    }
}

impl CanaryConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `WEBCANARY_TARGETS_PATH`: target list file (default: "sites.json")
    /// - `WEBCANARY_DB_PATH`: event database path (default: "webcanary.db")
    /// - `WEBCANARY_INTERVAL_SECS`: cycle interval in seconds (default: 300)
    /// - `WEBCANARY_PROBE_CONCURRENCY`: concurrent probe limit (default: 16)
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Ok(path) = env::var("WEBCANARY_TARGETS_PATH") {
            cfg.targets_path = PathBuf::from(path);
        }

        if let Ok(db_path) = env::var("WEBCANARY_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Ok(secs_str) = env::var("WEBCANARY_INTERVAL_SECS") {
            if let Ok(secs) = secs_str.parse::<u64>() {
                if secs > 0 {
                    cfg.interval = Duration::from_secs(secs);
                }
            }
        }

        if let Ok(limit_str) = env::var("WEBCANARY_PROBE_CONCURRENCY") {
            if let Ok(limit) = limit_str.parse::<usize>() {
                if limit > 0 {
                    cfg.probe_concurrency = limit;
                }
            }
        }

        cfg
    }
}

/// One monitored endpoint. Immutable for the duration of a cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub name: String,
    pub url: String,
    /// Per-probe deadline.
    pub timeout: Duration,
    /// Status codes counted as a successful check.
    pub expected_statuses: Vec<u16>,
}

impl Target {
    /// Build a target from a bare URL with default overrides.
    pub fn from_url(url: &str) -> Self {
        let url = normalize_url(url);
        Self {
            name: display_name(&url),
            url,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            expected_statuses: vec![200],
        }
    }
}

const DEFAULT_TIMEOUT_MS: u64 = 10_000;

fn normalize_url(url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{}", url)
    }
}

fn display_name(url: &str) -> String {
    url.trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/')
        .to_string()
}

/// Raw target entry as it appears in the JSON file.
#[derive(Debug, Deserialize)]
struct RawTarget {
    url: String,
    name: Option<String>,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
    #[serde(default = "default_statuses")]
    expected_statuses: Vec<u16>,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_statuses() -> Vec<u16> {
    vec![200]
}

impl RawTarget {
    /// Validate and convert into a [`Target`].
    fn into_target(self) -> Result<Target, String> {
        if self.url.is_empty() {
            return Err("url must not be empty".to_string());
        }
        if self.timeout_ms == 0 {
            return Err(format!("{}: timeout_ms must be positive", self.url));
        }
        if self.expected_statuses.is_empty() {
            return Err(format!("{}: expected_statuses must not be empty", self.url));
        }
        if let Some(code) = self
            .expected_statuses
            .iter()
            .find(|c| !(100..=599).contains(*c))
        {
            return Err(format!("{}: invalid status code {}", self.url, code));
        }

        let url = normalize_url(&self.url);
        let name = self.name.unwrap_or_else(|| display_name(&url));
        Ok(Target {
            name,
            url,
            timeout: Duration::from_millis(self.timeout_ms),
            expected_statuses: self.expected_statuses,
        })
    }
}

/// Top-level shape of the target file.
///
/// Accepts either a bare JSON array (each entry a URL string or a target
/// object) or an object with `targets` and an optional `alarms` section.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TargetFile {
    List(Vec<serde_json::Value>),
    Document {
        targets: Vec<serde_json::Value>,
        #[serde(default)]
        alarms: Option<AlarmPolicies>,
    },
}

fn parse_entries(entries: Vec<serde_json::Value>) -> Vec<Target> {
    let mut targets = Vec::with_capacity(entries.len());

    for entry in entries {
        let raw = match entry {
            serde_json::Value::String(url) => {
                targets.push(Target::from_url(&url));
                continue;
            }
            other => serde_json::from_value::<RawTarget>(other),
        };

        // A malformed entry disables that target only; the rest keep running.
        match raw {
            Ok(raw) => match raw.into_target() {
                Ok(target) => targets.push(target),
                Err(reason) => {
                    tracing::warn!("Skipping invalid target ({})", reason);
                }
            },
            Err(e) => {
                tracing::warn!("Skipping unparseable target entry: {}", e);
            }
        }
    }

    targets
}

/// Source of the monitored target set, read at the start of each cycle.
pub trait TargetSource: Send + Sync {
    fn load(&self) -> Result<Vec<Target>, ConfigError>;
}

/// Target source backed by a JSON file on disk.
pub struct FileTargetSource {
    path: PathBuf,
}

impl FileTargetSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl TargetSource for FileTargetSource {
    fn load(&self) -> Result<Vec<Target>, ConfigError> {
        let text = std::fs::read_to_string(&self.path)?;
        let file: TargetFile = serde_json::from_str(&text)?;
        let entries = match file {
            TargetFile::List(entries) => entries,
            TargetFile::Document { targets, .. } => targets,
        };
        Ok(parse_entries(entries))
    }
}

/// Fixed in-memory target set, mainly for tests and embedding.
pub struct StaticTargets(pub Vec<Target>);

impl TargetSource for StaticTargets {
    fn load(&self) -> Result<Vec<Target>, ConfigError> {
        Ok(self.0.clone())
    }
}

/// Load alarm policies from the target file's `alarms` section.
///
/// A missing section falls back to [`AlarmPolicies::default`]. A present but
/// invalid policy is rejected here, before any evaluation starts.
pub fn load_alarm_policies<P: AsRef<Path>>(path: P) -> Result<AlarmPolicies, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    let file: TargetFile = serde_json::from_str(&text)?;
    let policies = match file {
        TargetFile::Document {
            alarms: Some(policies),
            ..
        } => policies,
        _ => AlarmPolicies::default(),
    };
    policies.validate()?;
    Ok(policies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_file(contents: &str) -> NamedTempFile {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(contents.as_bytes()).unwrap();
        tmp
    }

    #[test]
    fn test_default_config() {
        let cfg = CanaryConfig::default();
        assert_eq!(cfg.interval, Duration::from_secs(300));
        assert_eq!(cfg.db_path, "webcanary.db");
        assert_eq!(cfg.probe_concurrency, 16);
    }

    #[test]
    fn test_bare_url_list() {
        let tmp = write_file(r#"["https://example.com", "example.org"]"#);
        let targets = FileTargetSource::new(tmp.path()).load().unwrap();

        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].url, "https://example.com");
        assert_eq!(targets[0].name, "example.com");
        assert_eq!(targets[1].url, "https://example.org");
        assert_eq!(targets[0].timeout, Duration::from_millis(10_000));
        assert_eq!(targets[0].expected_statuses, vec![200]);
    }

    #[test]
    fn test_target_overrides() {
        let tmp = write_file(
            r#"[{"url": "https://api.example.com/health",
                 "name": "API",
                 "timeout_ms": 2500,
                 "expected_statuses": [200, 204]}]"#,
        );
        let targets = FileTargetSource::new(tmp.path()).load().unwrap();

        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].name, "API");
        assert_eq!(targets[0].timeout, Duration::from_millis(2500));
        assert_eq!(targets[0].expected_statuses, vec![200, 204]);
    }

    #[test]
    fn test_invalid_entry_skipped_others_survive() {
        let tmp = write_file(
            r#"[{"url": "https://good.example.com"},
                {"url": "https://bad.example.com", "timeout_ms": 0},
                {"url": "https://also-good.example.com"}]"#,
        );
        let targets = FileTargetSource::new(tmp.path()).load().unwrap();

        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].url, "https://good.example.com");
        assert_eq!(targets[1].url, "https://also-good.example.com");
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let tmp = write_file("not json");
        assert!(FileTargetSource::new(tmp.path()).load().is_err());
    }

    #[test]
    fn test_document_form_with_alarms() {
        let tmp = write_file(
            r#"{"targets": ["https://example.com"],
                "alarms": {
                  "availability": {"comparator": "<", "threshold": 1.0,
                                   "window": 5, "breach_count": 1},
                  "latency": {"comparator": ">", "threshold": 2000.0,
                              "window": 5, "breach_count": 3}
                }}"#,
        );

        let targets = FileTargetSource::new(tmp.path()).load().unwrap();
        assert_eq!(targets.len(), 1);

        let policies = load_alarm_policies(tmp.path()).unwrap();
        assert_eq!(policies.latency.threshold, 2000.0);
        assert_eq!(policies.latency.breach_count, 3);
    }

    #[test]
    fn test_invalid_policy_rejected_at_load() {
        let tmp = write_file(
            r#"{"targets": [],
                "alarms": {
                  "availability": {"comparator": "<", "threshold": 1.0,
                                   "window": 2, "breach_count": 5},
                  "latency": {"comparator": ">", "threshold": 1500.0,
                              "window": 5, "breach_count": 3}
                }}"#,
        );
        assert!(load_alarm_policies(tmp.path()).is_err());
    }
}
