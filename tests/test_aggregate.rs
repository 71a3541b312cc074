use oxidized_ash::aggregate::{AggregatedReport, ResultAggregator, AGGREGATED_RESULTS_FILE};
use oxidized_ash::config::Config;
use oxidized_ash::error::{ExecutionError, ModelError};
use oxidized_ash::finding::{
    Finding, Location, ScanResultContainer, ScannerStatus, Severity, TargetType,
};
use std::path::Path;
use std::sync::Arc;

fn container(scanner: &str, target_type: TargetType, findings: Vec<Finding>) -> ScanResultContainer {
    let mut c = ScanResultContainer::new(scanner, Path::new("/src"), target_type);
    c.status = if findings.is_empty() {
        ScannerStatus::Passed
    } else {
        ScannerStatus::Failed
    };
    c.findings = findings;
    c.raw_results = Some(serde_json::json!({"results": []}));
    c
}

fn finding(scanner: &str, rule: &str, severity: Severity, file: &str) -> Finding {
    Finding::new(scanner, rule, severity, "issue").at(Location::new(file).lines(Some(1), None))
}

#[test]
fn save_then_load_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let mut report = AggregatedReport::new("demo", Some(Config::default()));
    report.record_scan(container(
        "bandit",
        TargetType::Source,
        vec![finding("bandit", "B605", Severity::High, "app.py")],
    ));
    report.record_scan(ScanResultContainer::excluded("grype", Path::new("/src"), "excluded"));
    report.finalize(&Config::default());

    let path = report.save_model(dir.path()).unwrap();
    assert_eq!(path, dir.path().join(AGGREGATED_RESULTS_FILE));

    let loaded = AggregatedReport::load_model(dir.path()).unwrap();
    assert_eq!(loaded.to_simplified(), report.to_simplified());
    assert_eq!(loaded.metadata.report_id, report.metadata.report_id);
    assert_eq!(AggregatedReport::load_model(&path).unwrap().findings, report.findings);
}

#[test]
fn missing_artifact_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let err = AggregatedReport::load_model(dir.path()).unwrap_err();
    assert!(matches!(err, ModelError::NotFound(_)));
}

#[test]
fn corrupt_artifact_is_a_json_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(AGGREGATED_RESULTS_FILE), "{\"name\": 1").unwrap();
    let err = AggregatedReport::load_model(dir.path()).unwrap_err();
    assert!(matches!(err, ModelError::Json { .. }));
}

#[test]
fn status_rolls_up_across_targets() {
    let mut report = AggregatedReport::new("demo", None);
    report.record_scan(container("semgrep", TargetType::Source, vec![]));
    let err = ExecutionError::Other("crashed on notebook output".into());
    report.record_scan(ScanResultContainer::errored(
        "semgrep",
        Path::new("/work/converted"),
        TargetType::Converted,
        &err,
    ));
    let info = &report.scanner_results["semgrep"];
    assert_eq!(info.status, ScannerStatus::Error);
    assert_eq!(info.targets.len(), 2);
    assert_eq!(info.errors().count(), 1);
}

#[test]
fn summary_counts_follow_findings() {
    let mut report = AggregatedReport::new("demo", None);
    report.record_scan(container(
        "bandit",
        TargetType::Source,
        vec![
            finding("bandit", "B605", Severity::Critical, "a.py"),
            finding("bandit", "B101", Severity::Low, "a.py"),
        ],
    ));
    report.record_scan(container(
        "checkov",
        TargetType::Source,
        vec![finding("checkov", "CKV_1", Severity::Medium, "main.tf")],
    ));
    report.finalize(&Config::default());

    let s = report.summary();
    assert_eq!((s.total, s.critical, s.medium, s.low), (3, 1, 1, 1));
    assert_eq!(s.actionable, 3);
    assert_eq!(s.failed, 2);
    assert_eq!(report.actionable_count(Severity::Medium), 2);
}

#[test]
fn finalize_sorts_findings_canonically() {
    let mut report = AggregatedReport::new("demo", None);
    report.record_scan(container(
        "semgrep",
        TargetType::Source,
        vec![finding("semgrep", "z-rule", Severity::Low, "b.py")],
    ));
    report.record_scan(container(
        "bandit",
        TargetType::Source,
        vec![finding("bandit", "B605", Severity::High, "a.py")],
    ));
    report.finalize(&Config::default());
    let before: Vec<_> = report.findings.iter().map(|f| f.rule_id.clone()).collect();
    report.finalize(&Config::default());
    let after: Vec<_> = report.findings.iter().map(|f| f.rule_id.clone()).collect();
    assert_eq!(before, after);
}

#[test]
fn aggregator_accepts_concurrent_records() {
    let aggregator = Arc::new(ResultAggregator::new(AggregatedReport::new("demo", None)));
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let agg = Arc::clone(&aggregator);
            std::thread::spawn(move || {
                let name = format!("scanner{i}");
                agg.record_scan(container(
                    &name,
                    TargetType::Source,
                    vec![finding(&name, "R1", Severity::High, "x.py")],
                ));
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    let report = Arc::try_unwrap(aggregator).ok().unwrap().into_report();
    assert_eq!(report.scanner_results.len(), 8);
    assert_eq!(report.summary().total, 8);
}
