//! Canonical finding model and per-execution result containers.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};

/// Canonical five-level severity, most severe first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Info,
    ];

    /// Numeric rank; higher is more severe.
    pub fn rank(self) -> u8 {
        match self {
            Severity::Critical => 4,
            Severity::High => 3,
            Severity::Medium => 2,
            Severity::Low => 1,
            Severity::Info => 0,
        }
    }

    /// `true` when `self` is at or above `threshold`.
    pub fn meets(self, threshold: Severity) -> bool {
        self.rank() >= threshold.rank()
    }

    /// Maps a tool-native severity word onto the canonical scale.
    ///
    /// Returns `None` for vocabulary we do not recognize.
    pub fn from_tool(raw: &str) -> Option<Severity> {
        let normalized = raw.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        let severity = match normalized.as_str() {
            "CRITICAL" | "VERY_HIGH" | "BLOCKER" | "SEVERE" => Severity::Critical,
            "HIGH" | "ERROR" | "MAJOR" => Severity::High,
            "MEDIUM" | "MODERATE" | "WARNING" | "WARN" => Severity::Medium,
            "LOW" | "MINOR" | "NOTE" | "STYLE" => Severity::Low,
            "INFO" | "INFORMATIONAL" | "NEGLIGIBLE" | "NONE" => Severity::Info,
            _ => return None,
        };
        Some(severity)
    }

    /// Like [`Severity::from_tool`] but falls back to `Medium`, logging a
    /// warning attributed to `scanner`.
    pub fn normalize(raw: Option<&str>, scanner: &str) -> Severity {
        match raw.and_then(Severity::from_tool) {
            Some(severity) => severity,
            None => {
                tracing::warn!(
                    scanner,
                    raw = raw.unwrap_or("<missing>"),
                    "unknown severity, defaulting to MEDIUM"
                );
                Severity::Medium
            }
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
            Severity::Info => "INFO",
        };
        f.pad(s)
    }
}

/// A place in the scanned tree. `uri` is relative to the source directory
/// and always uses forward slashes.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Location {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,
}

impl Location {
    pub fn new(uri: impl Into<String>) -> Self {
        Location {
            uri: uri.into(),
            start_line: None,
            end_line: None,
        }
    }

    pub fn lines(mut self, start: Option<u32>, end: Option<u32>) -> Self {
        self.start_line = start;
        self.end_line = end.or(start);
        self
    }

    /// Rewrites an absolute `uri` under `root` to a root-relative one.
    pub fn relativize(&mut self, root: &Path) {
        let path = Path::new(&self.uri);
        if let Ok(rel) = path.strip_prefix(root) {
            self.uri = rel.to_string_lossy().into_owned();
        }
        self.uri = self.uri.replace('\\', "/");
        if let Some(stripped) = self.uri.strip_prefix("./") {
            self.uri = stripped.to_string();
        }
    }
}

/// Records which suppression rule matched a finding and why.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SuppressionAnnotation {
    pub rule: String,
    pub justification: String,
}

/// Tool-agnostic security issue record.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Finding {
    pub rule_id: String,
    pub severity: Severity,
    pub message: String,
    pub scanner: String,
    #[serde(default)]
    pub locations: Vec<Location>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
    #[serde(default)]
    pub suppressions: Vec<SuppressionAnnotation>,
}

impl Finding {
    pub fn new(
        scanner: &str,
        rule_id: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Finding {
            rule_id: rule_id.into(),
            severity,
            message: message.into(),
            scanner: scanner.to_string(),
            locations: Vec::new(),
            tags: Vec::new(),
            help: None,
            suppressions: Vec::new(),
        }
    }

    pub fn at(mut self, location: Location) -> Self {
        self.locations.push(location);
        self
    }

    pub fn tagged(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn primary_location(&self) -> Option<&Location> {
        self.locations.first()
    }

    pub fn is_suppressed(&self) -> bool {
        !self.suppressions.is_empty()
    }

    /// Unsuppressed and at or above `threshold`.
    pub fn is_actionable(&self, threshold: Severity) -> bool {
        !self.is_suppressed() && self.severity.meets(threshold)
    }

    /// Total order used to make the aggregated collection independent of
    /// completion order. Findings that compare equal are identical in every
    /// serialized field.
    pub fn canonical_cmp(&self, other: &Finding) -> Ordering {
        let key = |f: &Finding| {
            let loc = f.primary_location();
            (
                loc.map(|l| l.uri.clone()),
                loc.and_then(|l| l.start_line),
                loc.and_then(|l| l.end_line),
            )
        };
        let spans = |f: &Finding| -> Vec<(String, Option<u32>, Option<u32>)> {
            f.locations
                .iter()
                .map(|l| (l.uri.clone(), l.start_line, l.end_line))
                .collect()
        };
        let notes = |f: &Finding| -> Vec<(String, String)> {
            f.suppressions
                .iter()
                .map(|s| (s.rule.clone(), s.justification.clone()))
                .collect()
        };
        self.rule_id
            .cmp(&other.rule_id)
            .then_with(|| key(self).cmp(&key(other)))
            .then_with(|| self.scanner.cmp(&other.scanner))
            .then_with(|| other.severity.rank().cmp(&self.severity.rank()))
            .then_with(|| self.message.cmp(&other.message))
            .then_with(|| spans(self).cmp(&spans(other)))
            .then_with(|| self.tags.cmp(&other.tags))
            .then_with(|| self.help.cmp(&other.help))
            .then_with(|| notes(self).cmp(&notes(other)))
    }
}

/// Outcome of one plugin execution. Also used for converters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScannerStatus {
    Passed,
    Failed,
    Error,
    Missing,
    Skipped,
}

impl ScannerStatus {
    /// Precedence when several targets roll up into one scanner status.
    pub fn precedence(self) -> u8 {
        match self {
            ScannerStatus::Error => 4,
            ScannerStatus::Failed => 3,
            ScannerStatus::Missing => 2,
            ScannerStatus::Passed => 1,
            ScannerStatus::Skipped => 0,
        }
    }
}

impl fmt::Display for ScannerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScannerStatus::Passed => "PASSED",
            ScannerStatus::Failed => "FAILED",
            ScannerStatus::Error => "ERROR",
            ScannerStatus::Missing => "MISSING",
            ScannerStatus::Skipped => "SKIPPED",
        };
        f.write_str(s)
    }
}

/// Whether a scan target is the original source or converter output.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Source,
    Converted,
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetType::Source => f.write_str("source"),
            TargetType::Converted => f.write_str("converted"),
        }
    }
}

/// Per-severity counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SeverityCounts {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub info: usize,
}

impl SeverityCounts {
    pub fn bump(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
            Severity::Info => self.info += 1,
        }
    }

    pub fn get(&self, severity: Severity) -> usize {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
            Severity::Info => self.info,
        }
    }

    pub fn total(&self) -> usize {
        self.critical + self.high + self.medium + self.low + self.info
    }

    /// Findings counted at or above `threshold`.
    pub fn at_or_above(&self, threshold: Severity) -> usize {
        Severity::ALL
            .iter()
            .filter(|s| s.meets(threshold))
            .map(|s| self.get(*s))
            .sum()
    }

    pub fn from_findings<'a>(findings: impl IntoIterator<Item = &'a Finding>) -> Self {
        let mut counts = SeverityCounts::default();
        for f in findings {
            counts.bump(f.severity);
        }
        counts
    }
}

/// Result of one (scanner, target) execution.
///
/// Created by the execution engine when the scan starts and immutable once
/// handed to the aggregator.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ScanResultContainer {
    pub scanner_name: String,
    pub target: PathBuf,
    pub target_type: TargetType,
    pub status: ScannerStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_secs: Option<f64>,
    pub severity_counts: SeverityCounts,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub raw_results: Option<serde_json::Value>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub exception: Option<String>,
    #[serde(default)]
    pub cause_chain: Vec<String>,
    pub dependencies_satisfied: bool,
    pub excluded: bool,
    #[serde(default)]
    pub skip_reason: Option<String>,
}

impl ScanResultContainer {
    pub fn new(scanner: &str, target: &Path, target_type: TargetType) -> Self {
        ScanResultContainer {
            scanner_name: scanner.to_string(),
            target: target.to_path_buf(),
            target_type,
            status: ScannerStatus::Passed,
            start_time: None,
            end_time: None,
            duration_secs: None,
            severity_counts: SeverityCounts::default(),
            findings: Vec::new(),
            raw_results: None,
            errors: Vec::new(),
            exception: None,
            cause_chain: Vec::new(),
            dependencies_satisfied: true,
            excluded: false,
            skip_reason: None,
        }
    }

    pub fn skipped(scanner: &str, target: &Path, target_type: TargetType, reason: &str) -> Self {
        let mut c = Self::new(scanner, target, target_type);
        c.status = ScannerStatus::Skipped;
        c.skip_reason = Some(reason.to_string());
        c
    }

    pub fn excluded(scanner: &str, target: &Path, reason: &str) -> Self {
        let mut c = Self::skipped(scanner, target, TargetType::Source, reason);
        c.excluded = true;
        c
    }

    pub fn missing(scanner: &str, target: &Path, target_type: TargetType, reason: &str) -> Self {
        let mut c = Self::new(scanner, target, target_type);
        c.status = ScannerStatus::Missing;
        c.dependencies_satisfied = false;
        c.errors.push(reason.to_string());
        c
    }

    /// Container for a failure that happened outside `execute`.
    pub fn errored(
        scanner: &str,
        target: &Path,
        target_type: TargetType,
        err: &dyn std::error::Error,
    ) -> Self {
        let mut c = Self::new(scanner, target, target_type);
        c.status = ScannerStatus::Error;
        c.exception = Some(err.to_string());
        c.errors.push(err.to_string());
        let mut source = err.source();
        while let Some(e) = source {
            c.cause_chain.push(e.to_string());
            source = e.source();
        }
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_vocabulary_maps_to_canonical_levels() {
        assert_eq!(Severity::from_tool("error"), Some(Severity::High));
        assert_eq!(Severity::from_tool("WARNING"), Some(Severity::Medium));
        assert_eq!(Severity::from_tool("very-high"), Some(Severity::Critical));
        assert_eq!(Severity::from_tool("Negligible"), Some(Severity::Info));
        assert_eq!(Severity::from_tool("whatever"), None);
    }

    #[test]
    fn unknown_severity_defaults_to_medium() {
        assert_eq!(Severity::normalize(Some("??"), "t"), Severity::Medium);
        assert_eq!(Severity::normalize(None, "t"), Severity::Medium);
    }

    #[test]
    fn threshold_comparison() {
        assert!(Severity::High.meets(Severity::Medium));
        assert!(Severity::Medium.meets(Severity::Medium));
        assert!(!Severity::Low.meets(Severity::Medium));
    }

    #[test]
    fn relativize_strips_root_and_normalizes_separators() {
        let mut loc = Location::new("/work/src/app/main.py");
        loc.relativize(Path::new("/work/src"));
        assert_eq!(loc.uri, "app/main.py");

        let mut dotted = Location::new("./lib.py");
        dotted.relativize(Path::new("/elsewhere"));
        assert_eq!(dotted.uri, "lib.py");
    }

    #[test]
    fn canonical_order_breaks_ties_on_tags_and_help() {
        let base = Finding::new("s", "CVE-1", Severity::High, "m").at(Location::new("go.sum"));
        let tagged = base.clone().tagged("pkg:b");
        let other_tag = base.clone().tagged("pkg:a");
        let mut helped = base.clone();
        helped.help = Some("upgrade".to_string());

        let forward = vec![tagged.clone(), helped.clone(), other_tag.clone(), base.clone()];
        let mut reversed = forward.clone();
        reversed.reverse();
        let mut a = forward;
        let mut b = reversed;
        a.sort_by(Finding::canonical_cmp);
        b.sort_by(Finding::canonical_cmp);
        assert_eq!(a, b);
        assert_eq!(a[0], base);
        assert_eq!(tagged.canonical_cmp(&other_tag), Ordering::Greater);
        assert_ne!(base.canonical_cmp(&helped), Ordering::Equal);
    }

    #[test]
    fn canonical_order_is_by_rule_then_location() {
        let a = Finding::new("s", "B101", Severity::Low, "m").at(Location::new("b.py"));
        let b = Finding::new("s", "B101", Severity::Low, "m").at(Location::new("a.py"));
        let c = Finding::new("s", "A000", Severity::Low, "m").at(Location::new("z.py"));
        let mut v = vec![a.clone(), b.clone(), c.clone()];
        v.sort_by(Finding::canonical_cmp);
        assert_eq!(v, vec![c, b, a]);
    }

    #[test]
    fn counts_at_or_above_threshold() {
        let mut counts = SeverityCounts::default();
        for s in [Severity::Critical, Severity::High, Severity::High, Severity::Low] {
            counts.bump(s);
        }
        assert_eq!(counts.total(), 4);
        assert_eq!(counts.at_or_above(Severity::Medium), 3);
        assert_eq!(counts.at_or_above(Severity::Info), 4);
    }
}
