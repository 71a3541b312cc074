use oxidized_ash::aggregate::AggregatedReport;
use oxidized_ash::config::Config;
use oxidized_ash::finding::{Finding, Location, ScanResultContainer, ScannerStatus, Severity, TargetType};
use oxidized_ash::output;
use oxidized_ash::suppression::{SuppressionEngine, SuppressionRule};
use std::path::Path;

fn dirty_report() -> AggregatedReport {
    let config = Config {
        suppressions: vec![SuppressionRule::new("B307", "app.py", "sandboxed eval")],
        ..Config::default()
    };
    let mut report = AggregatedReport::new("demo", Some(config.clone()));
    let mut container = ScanResultContainer::new("bandit", Path::new("/src"), TargetType::Source);
    container.status = ScannerStatus::Failed;
    container.findings = vec![
        Finding::new("bandit", "B605", Severity::High, "Starting a process with a shell")
            .at(Location::new("app.py").lines(Some(2), None)),
        Finding::new("bandit", "B307", Severity::Medium, "Use of eval")
            .at(Location::new("app.py").lines(Some(3), None)),
    ];
    report.record_scan(container);
    report.record_scan(ScanResultContainer::excluded("grype", Path::new("/src"), "excluded"));
    report.apply_suppressions(&SuppressionEngine::new(&config.suppressions, false));
    report.finalize(&config);
    report
}

fn clean_report() -> AggregatedReport {
    let mut report = AggregatedReport::new("demo", Some(Config::default()));
    report.record_scan(ScanResultContainer::new("bandit", Path::new("/src"), TargetType::Source));
    report.finalize(&Config::default());
    report
}

#[test]
fn json_output_is_valid() {
    let parsed: serde_json::Value =
        serde_json::from_str(&output::json::format(&dirty_report()).unwrap()).unwrap();
    assert!(parsed["report_id"].as_str().unwrap().starts_with("ASH-"));
    assert_eq!(parsed["summary"]["total"], 2);
    assert_eq!(parsed["summary"]["suppressed"], 1);
    assert_eq!(parsed["scanners"]["bandit"], "FAILED");
    assert_eq!(parsed["scanners"]["grype"], "SKIPPED");
    assert_eq!(parsed["findings"].as_array().unwrap().len(), 1);
}

#[test]
fn sarif_output_is_valid() {
    let sarif = output::sarif::format(&dirty_report()).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&sarif).unwrap();
    assert_eq!(parsed["version"], "2.1.0");
    let results = parsed["runs"][0]["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    let suppressed: Vec<_> = results
        .iter()
        .filter(|r| r.get("suppressions").is_some())
        .collect();
    assert_eq!(suppressed.len(), 1);
    assert_eq!(suppressed[0]["ruleId"], "B307");
    assert_eq!(
        parsed["runs"][0]["tool"]["driver"]["rules"].as_array().unwrap().len(),
        2
    );
}

#[test]
fn sarif_clean_report_has_no_results() {
    let parsed: serde_json::Value =
        serde_json::from_str(&output::sarif::format(&clean_report()).unwrap()).unwrap();
    assert!(parsed["runs"][0]["results"].as_array().unwrap().is_empty());
}

#[test]
fn text_summary_lists_scanners_and_suppressions() {
    let text = output::text::render(&dirty_report(), false);
    assert!(text.contains("[FAIL] bandit"));
    assert!(text.contains("[SKIP] grype"));
    assert!(text.contains("sandboxed eval"));
    assert!(text.contains("1 actionable"));

    let clean = output::text::render(&clean_report(), false);
    assert!(clean.contains("Result: PASSED"));
}

#[test]
fn unused_suppressions_report_is_empty_when_all_rules_match() {
    let parsed: serde_json::Value =
        serde_json::from_str(&output::unused::format(&dirty_report()).unwrap()).unwrap();
    assert_eq!(parsed["total_rules"], 1);
    assert!(parsed["unused"].as_array().unwrap().is_empty());
}
