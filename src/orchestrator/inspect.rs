//! Best-effort consistency checks on a finished report.

use super::Orchestrator;
use crate::aggregate::{AggregatedReport, ResultAggregator, ValidationSummary};
use crate::events::EventType;
use crate::finding::SeverityCounts;
use crate::suppression::SuppressionEngine;
use regex::Regex;
use serde_json::json;
use std::cmp::Ordering;
use std::panic::{self, AssertUnwindSafe};
use std::sync::LazyLock;

static RE_REPORT_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][/.\w-]+$").unwrap());

static RE_RULE_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\S+$").unwrap());

/// Lists every inconsistency found in `report`.
pub fn inspect_report(report: &AggregatedReport, suppressions: &SuppressionEngine) -> ValidationSummary {
    let mut issues = Vec::new();

    if !RE_REPORT_ID.is_match(&report.metadata.report_id) {
        issues.push(format!("malformed report id `{}`", report.metadata.report_id));
    }

    if report
        .findings
        .windows(2)
        .any(|w| w[0].canonical_cmp(&w[1]) == Ordering::Greater)
    {
        issues.push("findings are not in canonical order".to_string());
    }

    for (i, finding) in report.findings.iter().enumerate() {
        if !RE_RULE_ID.is_match(&finding.rule_id) {
            issues.push(format!("finding {i} has an invalid rule id `{}`", finding.rule_id));
        }
        if !report.scanner_results.contains_key(&finding.scanner) {
            issues.push(format!(
                "finding {i} comes from unknown scanner `{}`",
                finding.scanner
            ));
        }
        if finding.locations.is_empty() {
            issues.push(format!("finding {i} ({}) has no location", finding.rule_id));
        }
    }

    let summary = report.summary();
    let counted = SeverityCounts::from_findings(&report.findings);
    if summary.severity_counts() != counted {
        issues.push("summary severity counts disagree with findings".to_string());
    }
    if summary.total != summary.severity_counts().total() {
        issues.push("summary total is not the sum of severity buckets".to_string());
    }
    let suppressed = report.suppressed_findings().count();
    if summary.suppressed != suppressed {
        issues.push(format!(
            "summary reports {} suppressed findings, found {suppressed}",
            summary.suppressed
        ));
    }
    if summary.actionable + summary.suppressed != summary.total {
        issues.push("actionable + suppressed does not equal total".to_string());
    }

    for (rule, err) in suppressions.invalid_rules() {
        issues.push(format!("suppression {rule} ignored: {}", err.message));
    }

    ValidationSummary {
        checked_findings: report.findings.len(),
        issues,
    }
}

impl Orchestrator {
    /// Never fails the run: a panicking check is reported as one issue.
    pub(super) fn run_inspect_phase(&self, aggregator: &ResultAggregator) {
        let events = self.events();
        events.publish(EventType::InspectPhaseStart, json!({}));

        let engine =
            SuppressionEngine::new(&self.ctx.config.suppressions, self.ctx.ignore_suppressions);
        let snapshot = aggregator.snapshot();
        let summary = panic::catch_unwind(AssertUnwindSafe(|| inspect_report(&snapshot, &engine)))
            .unwrap_or_else(|_| ValidationSummary {
                checked_findings: 0,
                issues: vec!["inspection aborted unexpectedly".to_string()],
            });

        for issue in &summary.issues {
            tracing::warn!(%issue, "report inspection");
            events.publish(EventType::Warning, json!({"phase": "inspect", "message": issue}));
        }
        events.publish(
            EventType::InspectPhaseComplete,
            json!({"issues": summary.issues.len(), "checked": summary.checked_findings}),
        );
        aggregator.with_report(|r| r.metadata.validation = Some(summary));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::{Finding, Location, ScanResultContainer, Severity, TargetType};
    use std::path::Path;

    #[test]
    fn consistent_report_has_no_issues() {
        let mut report = AggregatedReport::new("p", None);
        let mut c = ScanResultContainer::new("bandit", Path::new("/s"), TargetType::Source);
        c.findings
            .push(Finding::new("bandit", "B101", Severity::Low, "assert").at(Location::new("a.py")));
        report.record_scan(c);
        report.finalize(&crate::config::Config::default());

        let summary = inspect_report(&report, &SuppressionEngine::new(&[], false));
        assert!(summary.issues.is_empty(), "{:?}", summary.issues);
        assert_eq!(summary.checked_findings, 1);
    }

    #[test]
    fn detects_orphan_findings_and_bad_order() {
        let mut report = AggregatedReport::new("p", None);
        report.findings.push(Finding::new("ghost", "Z", Severity::Low, "m"));
        report.findings.push(Finding::new("ghost", "A", Severity::Low, "m"));
        let summary = inspect_report(&report, &SuppressionEngine::new(&[], false));
        let text = summary.issues.join("\n");
        assert!(text.contains("canonical order"));
        assert!(text.contains("unknown scanner"));
        assert!(text.contains("severity counts"));
    }
}
