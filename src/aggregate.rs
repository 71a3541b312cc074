//! Canonical aggregated report and the accumulator that builds it.
//!
//! Per-execution [`ScanResultContainer`]s are folded into one
//! [`AggregatedReport`]: a per-scanner status map, a per-converter status
//! map, raw per-run metadata and one sorted finding collection. The report
//! is persisted as [`AGGREGATED_RESULTS_FILE`] and can be reloaded for
//! report-only runs.

use crate::config::Config;
use crate::error::ModelError;
use crate::finding::{
    Finding, ScanResultContainer, ScannerStatus, Severity, SeverityCounts, TargetType,
};
use crate::suppression::{SuppressionEngine, SuppressionOutcome};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Artifact name, relative to the output directory.
pub const AGGREGATED_RESULTS_FILE: &str = "ash_aggregated_results.json";

/// Run-wide counters.
///
/// Severity buckets and `total` only ever grow; `actionable` is kept equal
/// to `total - suppressed`.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SummaryStats {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub duration_secs: Option<f64>,
    pub total: usize,
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub info: usize,
    pub suppressed: usize,
    pub actionable: usize,
    pub passed: usize,
    pub failed: usize,
    pub error: usize,
    pub missing: usize,
    pub skipped: usize,
}

impl SummaryStats {
    fn record(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
            Severity::Info => self.info += 1,
        }
        self.total += 1;
        self.actionable = self.total - self.suppressed;
    }

    fn record_suppressed(&mut self, count: usize) {
        self.suppressed += count;
        self.actionable = self.total.saturating_sub(self.suppressed);
    }

    fn reset_suppressed(&mut self) {
        self.suppressed = 0;
        self.actionable = self.total;
    }

    pub fn severity_counts(&self) -> SeverityCounts {
        SeverityCounts {
            critical: self.critical,
            high: self.high,
            medium: self.medium,
            low: self.low,
            info: self.info,
        }
    }
}

/// Outcome of the INSPECT phase.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ValidationSummary {
    pub checked_findings: usize,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ReportMetadata {
    pub report_id: String,
    pub generated_at: DateTime<Utc>,
    pub project_name: String,
    pub tool_version: String,
    pub summary: SummaryStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationSummary>,
}

/// Status of one scanner against one target type.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ScannerTargetStatus {
    pub status: ScannerStatus,
    pub dependencies_satisfied: bool,
    pub excluded: bool,
    pub severity_counts: SeverityCounts,
    pub finding_count: usize,
    #[serde(default)]
    pub duration_secs: Option<f64>,
    #[serde(default)]
    pub skip_reason: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// Status of one scanner, rolled up across its targets.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ScannerStatusInfo {
    pub status: ScannerStatus,
    pub dependencies_satisfied: bool,
    pub excluded: bool,
    pub targets: BTreeMap<TargetType, ScannerTargetStatus>,
}

impl ScannerStatusInfo {
    fn roll_up(&mut self) {
        let targets = self.targets.values();
        self.status = targets
            .clone()
            .map(|t| t.status)
            .max_by_key(|s| s.precedence())
            .unwrap_or(ScannerStatus::Skipped);
        self.dependencies_satisfied = targets.clone().all(|t| t.dependencies_satisfied);
        self.excluded = self.targets.values().all(|t| t.excluded);
    }

    pub fn errors(&self) -> impl Iterator<Item = &String> {
        self.targets.values().flat_map(|t| t.errors.iter())
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConverterStatusInfo {
    pub status: ScannerStatus,
    pub dependencies_satisfied: bool,
    pub excluded: bool,
    pub converted_paths: Vec<PathBuf>,
    #[serde(default)]
    pub duration_secs: Option<f64>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ConverterStatusInfo {
    pub fn new(status: ScannerStatus) -> Self {
        ConverterStatusInfo {
            status,
            dependencies_satisfied: true,
            excluded: false,
            converted_paths: Vec::new(),
            duration_secs: None,
            errors: Vec::new(),
        }
    }
}

/// Raw metadata of one (scanner, target) execution.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ScanRecord {
    pub target: PathBuf,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_secs: Option<f64>,
    #[serde(default)]
    pub raw_results: Option<serde_json::Value>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub exception: Option<String>,
    #[serde(default)]
    pub cause_chain: Vec<String>,
}

/// The single per-run accumulator, and the persisted artifact.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AggregatedReport {
    pub name: String,
    pub description: String,
    pub metadata: ReportMetadata,
    #[serde(default)]
    pub config: Option<Config>,
    #[serde(default)]
    pub scanner_results: BTreeMap<String, ScannerStatusInfo>,
    #[serde(default)]
    pub converter_results: BTreeMap<String, ConverterStatusInfo>,
    #[serde(default)]
    pub scanner_runs: BTreeMap<String, BTreeMap<TargetType, ScanRecord>>,
    #[serde(default)]
    pub findings: Vec<Finding>,
}

impl AggregatedReport {
    pub fn new(project_name: &str, config: Option<Config>) -> Self {
        let now = Utc::now();
        AggregatedReport {
            name: "ASH Scan Report".to_string(),
            description: "Aggregated security scan results".to_string(),
            metadata: ReportMetadata {
                report_id: format!("ASH-{}", now.format("%Y%m%d%H%M%S")),
                generated_at: now,
                project_name: project_name.to_string(),
                tool_version: env!("CARGO_PKG_VERSION").to_string(),
                summary: SummaryStats::default(),
                validation: None,
            },
            config,
            scanner_results: BTreeMap::new(),
            converter_results: BTreeMap::new(),
            scanner_runs: BTreeMap::new(),
            findings: Vec::new(),
        }
    }

    pub fn summary(&self) -> &SummaryStats {
        &self.metadata.summary
    }

    /// Folds one finished container into the report.
    pub fn record_scan(&mut self, container: ScanResultContainer) {
        let ScanResultContainer {
            scanner_name,
            target,
            target_type,
            status,
            start_time,
            end_time,
            duration_secs,
            severity_counts,
            findings,
            raw_results,
            errors,
            exception,
            cause_chain,
            dependencies_satisfied,
            excluded,
            skip_reason,
        } = container;

        let target_status = ScannerTargetStatus {
            status,
            dependencies_satisfied,
            excluded,
            severity_counts,
            finding_count: findings.len(),
            duration_secs,
            skip_reason,
            errors: errors.clone(),
        };
        let info = self
            .scanner_results
            .entry(scanner_name.clone())
            .or_insert_with(|| ScannerStatusInfo {
                status,
                dependencies_satisfied,
                excluded,
                targets: BTreeMap::new(),
            });
        info.targets.insert(target_type, target_status);
        info.roll_up();

        self.scanner_runs.entry(scanner_name).or_default().insert(
            target_type,
            ScanRecord {
                target,
                start_time,
                end_time,
                duration_secs,
                raw_results,
                errors,
                exception,
                cause_chain,
            },
        );

        for finding in findings {
            self.metadata.summary.record(finding.severity);
            self.findings.push(finding);
        }
    }

    pub fn record_converter(&mut self, name: &str, info: ConverterStatusInfo) {
        self.converter_results.insert(name.to_string(), info);
    }

    /// Runs the suppression engine over the collection and updates counts.
    pub fn apply_suppressions(&mut self, engine: &SuppressionEngine) -> SuppressionOutcome {
        let outcome = engine.apply(&mut self.findings);
        self.metadata.summary.record_suppressed(outcome.newly_suppressed);
        outcome
    }

    /// Drops every suppression annotation, e.g. ones loaded from a saved
    /// model. Returns how many findings were un-suppressed.
    pub fn clear_suppressions(&mut self) -> usize {
        let mut cleared = 0;
        for finding in self.findings.iter_mut().filter(|f| f.is_suppressed()) {
            finding.suppressions.clear();
            cleared += 1;
        }
        self.metadata.summary.reset_suppressed();
        cleared
    }

    /// Sorts findings into canonical order and recomputes scanner roll-ups.
    ///
    /// A scanner that executed is FAILED when any of its unsuppressed
    /// findings meets its threshold, PASSED otherwise.
    pub fn finalize(&mut self, config: &Config) {
        self.findings.sort_by(Finding::canonical_cmp);

        for (name, info) in self.scanner_results.iter_mut() {
            if matches!(info.status, ScannerStatus::Passed | ScannerStatus::Failed) {
                let threshold = config.threshold_for(name);
                let failing = self
                    .findings
                    .iter()
                    .any(|f| &f.scanner == name && f.is_actionable(threshold));
                info.status = if failing {
                    ScannerStatus::Failed
                } else {
                    ScannerStatus::Passed
                };
            }
        }

        let summary = &mut self.metadata.summary;
        summary.passed = 0;
        summary.failed = 0;
        summary.error = 0;
        summary.missing = 0;
        summary.skipped = 0;
        for info in self.scanner_results.values() {
            match info.status {
                ScannerStatus::Passed => summary.passed += 1,
                ScannerStatus::Failed => summary.failed += 1,
                ScannerStatus::Error => summary.error += 1,
                ScannerStatus::Missing => summary.missing += 1,
                ScannerStatus::Skipped => summary.skipped += 1,
            }
        }
    }

    /// Marks the run window in the summary.
    pub fn stamp_times(&mut self, start: DateTime<Utc>, end: DateTime<Utc>) {
        let summary = &mut self.metadata.summary;
        summary.start = Some(start);
        summary.end = Some(end);
        summary.duration_secs = Some((end - start).num_milliseconds() as f64 / 1000.0);
    }

    /// Unsuppressed findings at or above `threshold`.
    pub fn actionable_count(&self, threshold: Severity) -> usize {
        self.findings
            .iter()
            .filter(|f| f.is_actionable(threshold))
            .count()
    }

    pub fn suppressed_findings(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.is_suppressed())
    }

    pub fn active_findings(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| !f.is_suppressed())
    }

    /// Writes the report to `<output_dir>/ash_aggregated_results.json`.
    ///
    /// The file is written to a temporary sibling first and renamed into
    /// place, so a crash never leaves a truncated artifact.
    pub fn save_model(&self, output_dir: &Path) -> Result<PathBuf, ModelError> {
        let path = output_dir.join(AGGREGATED_RESULTS_FILE);
        let io_err = |source| ModelError::Io {
            path: path.clone(),
            source,
        };
        let json = serde_json::to_vec_pretty(self).map_err(|source| ModelError::Json {
            path: path.clone(),
            source,
        })?;
        let mut tmp = tempfile::NamedTempFile::new_in(output_dir).map_err(io_err)?;
        tmp.write_all(&json).map_err(io_err)?;
        tmp.persist(&path).map_err(|e| io_err(e.error))?;
        tracing::info!(path = %path.display(), "saved aggregated results");
        Ok(path)
    }

    /// Reads a saved report. `path` may be the artifact itself or the
    /// directory containing it.
    pub fn load_model(path: &Path) -> Result<Self, ModelError> {
        let path = if path.is_dir() {
            path.join(AGGREGATED_RESULTS_FILE)
        } else {
            path.to_path_buf()
        };
        if !path.exists() {
            return Err(ModelError::NotFound(path));
        }
        let content = std::fs::read_to_string(&path).map_err(|source| ModelError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ModelError::Json { path, source })
    }

    /// JSON view with every timing field and the report id removed.
    ///
    /// Two runs over the same inputs yield equal simplified views whatever
    /// their scheduling.
    pub fn to_simplified(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        const TIMING: [&str; 5] = ["start", "end", "start_time", "end_time", "duration_secs"];
        strip_keys(&mut value, &TIMING);
        if let Some(meta) = value.get_mut("metadata").and_then(|m| m.as_object_mut()) {
            meta.remove("report_id");
            meta.remove("generated_at");
        }
        value
    }
}

fn strip_keys(value: &mut serde_json::Value, keys: &[&str]) {
    match value {
        serde_json::Value::Object(map) => {
            for key in keys {
                map.remove(*key);
            }
            for v in map.values_mut() {
                strip_keys(v, keys);
            }
        }
        serde_json::Value::Array(items) => {
            for v in items {
                strip_keys(v, keys);
            }
        }
        _ => {}
    }
}

/// Serializes concurrent writes into the run's [`AggregatedReport`].
pub struct ResultAggregator {
    report: Mutex<AggregatedReport>,
}

impl ResultAggregator {
    pub fn new(report: AggregatedReport) -> Self {
        ResultAggregator {
            report: Mutex::new(report),
        }
    }

    pub fn record_scan(&self, container: ScanResultContainer) {
        self.with_report(|r| r.record_scan(container));
    }

    pub fn record_converter(&self, name: &str, info: ConverterStatusInfo) {
        self.with_report(|r| r.record_converter(name, info));
    }

    /// Runs `f` with exclusive access to the report.
    pub fn with_report<R>(&self, f: impl FnOnce(&mut AggregatedReport) -> R) -> R {
        let mut guard = self.report.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    pub fn snapshot(&self) -> AggregatedReport {
        self.with_report(|r| r.clone())
    }

    pub fn into_report(self) -> AggregatedReport {
        self.report.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}
