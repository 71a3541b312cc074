//! Configuration loading and management.
//!
//! The default configuration file is `oxidized-ash.toml` in the current
//! working directory. Every section is optional:
//!
//! ```toml
//! project_name = "payments"
//! severity_threshold = "HIGH"
//! fail_on_findings = true
//!
//! [execution]
//! strategy = "sequential"
//! max_workers = 4
//! timeout_secs = 600
//!
//! [[ignore_paths]]
//! path = "vendor"
//! reason = "Third-party code is audited upstream"
//!
//! [scanners]
//! excluded = ["grype"]
//!
//! [scanners.plugins.semgrep]
//! severity_threshold = "CRITICAL"
//!
//! [[suppressions]]
//! rule_id = "B605"
//! path = "scripts/*.py"
//! reason = "Shell invocation is intentional here"
//! expiration = "2027-01-01"
//! ```
//!
//! Loading is the only step the core does not own: once [`Config::load`] and
//! [`Config::validate`] succeed, the resolved value is frozen inside the
//! [`ExecutionContext`](crate::context::ExecutionContext).

use crate::error::ValidationError;
use crate::finding::Severity;
use crate::suppression::SuppressionRule;
use std::collections::BTreeMap;
use std::path::Path;

/// File looked up in the working directory when no explicit path is given.
pub const DEFAULT_CONFIG_FILE: &str = "oxidized-ash.toml";

/// Default per-operation timeout, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 900;

/// Main configuration for a scan run.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct Config {
    /// Recorded in the report metadata.
    pub project_name: String,
    /// Minimum severity that fails a scanner and counts as actionable.
    pub severity_threshold: Severity,
    /// Exit with code 2 when actionable findings remain.
    pub fail_on_findings: bool,
    /// Scanners must not reach the network.
    pub offline: bool,
    /// Source-relative paths or globs no scanner or converter reads.
    pub ignore_paths: Vec<IgnorePath>,
    pub execution: ExecutionConfig,
    pub scanners: ScannersConfig,
    /// Per-converter toggles, keyed by converter name.
    pub converters: BTreeMap<String, PluginToggle>,
    /// Per-reporter toggles, keyed by reporter name.
    pub reporters: BTreeMap<String, PluginToggle>,
    pub suppressions: Vec<SuppressionRule>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            project_name: "ash".to_string(),
            severity_threshold: Severity::Medium,
            fail_on_findings: true,
            offline: false,
            ignore_paths: Vec::new(),
            execution: ExecutionConfig::default(),
            scanners: ScannersConfig::default(),
            converters: BTreeMap::new(),
            reporters: BTreeMap::new(),
            suppressions: Vec::new(),
        }
    }
}

/// A source-relative path or glob excluded from every scan.
///
/// A plain directory name such as `"vendor"` also covers everything below it.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct IgnorePath {
    pub path: String,
    #[serde(default)]
    pub reason: String,
}

impl IgnorePath {
    pub fn new(path: &str, reason: &str) -> Self {
        IgnorePath {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }

    /// The glob patterns this entry expands to: itself and its subtree.
    pub fn patterns(&self) -> [String; 2] {
        let base = self.path.trim_end_matches('/');
        [base.to_string(), format!("{base}/**")]
    }
}

/// How scanner tasks are scheduled.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStrategy {
    /// Bounded worker pool, one task per (scanner, target).
    #[default]
    Parallel,
    /// One thread, registration order.
    Sequential,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub strategy: ExecutionStrategy,
    /// Worker pool size. Defaults to `min(32, cpus + 4)`.
    pub max_workers: Option<usize>,
    /// Per-operation timeout. Values below the engine floor are raised to it.
    pub timeout_secs: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            strategy: ExecutionStrategy::Parallel,
            max_workers: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl ExecutionConfig {
    pub fn resolved_max_workers(&self) -> usize {
        self.max_workers.unwrap_or_else(|| {
            let cpus = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1);
            (cpus + 4).min(32)
        })
    }
}

/// Include/exclude lists plus per-scanner settings.
///
/// An empty `enabled` list means every registered scanner. Names in
/// `excluded` always win over `enabled`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct ScannersConfig {
    pub enabled: Vec<String>,
    pub excluded: Vec<String>,
    pub plugins: BTreeMap<String, PluginToggle>,
}

/// Settings for a single plugin. Unset fields fall back to the plugin's
/// registered defaults.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct PluginToggle {
    pub enabled: Option<bool>,
    pub severity_threshold: Option<Severity>,
}

impl Config {
    /// Loads configuration from a TOML file.
    ///
    /// Resolution order:
    /// 1. If `path` is `Some`, load from that file (error if missing).
    /// 2. Otherwise try [`DEFAULT_CONFIG_FILE`] in the current directory.
    /// 3. If that file does not exist either, return [`Config::default()`].
    ///
    /// The loaded value is validated before it is returned.
    pub fn load(path: Option<&Path>) -> Result<Config, ValidationError> {
        let config_path = match path {
            Some(p) if p.exists() => Some(p.to_path_buf()),
            Some(p) => {
                return Err(ValidationError::new(format!(
                    "config file not found: {}",
                    p.display()
                )))
            }
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                default_path.exists().then(|| default_path.to_path_buf())
            }
        };

        let config = match config_path {
            Some(path) => {
                let content = std::fs::read_to_string(&path).map_err(|e| {
                    ValidationError::new(format!("failed to read {}: {e}", path.display()))
                })?;
                tracing::debug!(path = %path.display(), "loaded configuration");
                Self::from_toml(&content).map_err(|e| {
                    ValidationError::new(format!("{}: {}", path.display(), e.message))
                })?
            }
            None => Config::default(),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Config, ValidationError> {
        toml::from_str(content).map_err(|e| ValidationError::new(e.to_string()))
    }

    /// Rejects values no run could use.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.execution.max_workers == Some(0) {
            return Err(ValidationError::new("execution.max_workers must be at least 1"));
        }
        for (i, ignore) in self.ignore_paths.iter().enumerate() {
            if ignore.path.trim().is_empty() {
                return Err(ValidationError::new(format!(
                    "ignore_paths[{i}]: path must not be empty"
                )));
            }
            if let Err(e) = globset::Glob::new(&ignore.path) {
                return Err(ValidationError::new(format!(
                    "ignore_paths[{i}]: invalid glob `{}`: {e}",
                    ignore.path
                )));
            }
        }
        for (i, rule) in self.suppressions.iter().enumerate() {
            if rule.rule_id.trim().is_empty() {
                return Err(ValidationError::new(format!(
                    "suppressions[{i}]: rule_id must not be empty"
                )));
            }
            if rule.path.trim().is_empty() {
                return Err(ValidationError::new(format!(
                    "suppressions[{i}]: path must not be empty"
                )));
            }
            if let (Some(start), Some(end)) = (rule.line_start, rule.line_end) {
                if start > end {
                    return Err(ValidationError::new(format!(
                        "suppressions[{i}]: line_start {start} is after line_end {end}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Applies the per-scanner toggle, or `default` when none is set.
    pub fn is_scanner_enabled(&self, name: &str, default: bool) -> bool {
        self.scanners
            .plugins
            .get(name)
            .and_then(|t| t.enabled)
            .unwrap_or(default)
    }

    pub fn is_converter_enabled(&self, name: &str, default: bool) -> bool {
        self.converters
            .get(name)
            .and_then(|t| t.enabled)
            .unwrap_or(default)
    }

    pub fn is_reporter_enabled(&self, name: &str, default: bool) -> bool {
        self.reporters
            .get(name)
            .and_then(|t| t.enabled)
            .unwrap_or(default)
    }

    /// Severity at which `scanner` reports FAILED.
    pub fn threshold_for(&self, scanner: &str) -> Severity {
        self.scanners
            .plugins
            .get(scanner)
            .and_then(|t| t.severity_threshold)
            .unwrap_or(self.severity_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.severity_threshold, Severity::Medium);
        assert!(config.fail_on_findings);
    }

    #[test]
    fn per_scanner_threshold_overrides_global() {
        let config = Config::from_toml(
            r#"
            severity_threshold = "LOW"
            [scanners.plugins.semgrep]
            severity_threshold = "CRITICAL"
            enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(config.threshold_for("semgrep"), Severity::Critical);
        assert_eq!(config.threshold_for("bandit"), Severity::Low);
        assert!(!config.is_scanner_enabled("semgrep", true));
        assert!(config.is_scanner_enabled("bandit", true));
    }

    #[test]
    fn zero_workers_is_rejected() {
        let config = Config::from_toml("[execution]\nmax_workers = 0").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_line_range_is_rejected() {
        let config = Config::from_toml(
            r#"
            [[suppressions]]
            rule_id = "B101"
            path = "a.py"
            line_start = 10
            line_end = 2
            reason = "x"
            "#,
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.message.contains("line_start"));
    }

    #[test]
    fn ignore_paths_load_and_validate() {
        let config = Config::from_toml(
            r#"
            [[ignore_paths]]
            path = "vendor/"
            reason = "third party"
            "#,
        )
        .unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.ignore_paths[0].patterns(), ["vendor", "vendor/**"]);

        let bad = Config {
            ignore_paths: vec![IgnorePath::new("src/[", "typo")],
            ..Config::default()
        };
        assert!(bad.validate().unwrap_err().message.contains("ignore_paths[0]"));
    }

    #[test]
    fn strategy_parses_lowercase() {
        let config = Config::from_toml("[execution]\nstrategy = \"sequential\"").unwrap();
        assert_eq!(config.execution.strategy, ExecutionStrategy::Sequential);
    }
}
