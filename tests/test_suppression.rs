use chrono::NaiveDate;
use oxidized_ash::config::Config;
use oxidized_ash::finding::{Finding, Location, Severity};
use oxidized_ash::suppression::{SuppressionEngine, SuppressionRule};

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
}

fn finding(rule: &str, file: &str, start: u32, end: u32) -> Finding {
    Finding::new("bandit", rule, Severity::High, "issue")
        .at(Location::new(file).lines(Some(start), Some(end)))
}

#[test]
fn rules_load_from_toml() {
    let config = Config::from_toml(
        r#"
        [[suppressions]]
        rule_id = "B605"
        path = "src/*.py"
        line_start = 10
        line_end = 20
        reason = "input is validated upstream"
        expiration = "2026-12-31"
        "#,
    )
    .unwrap();
    let rule = &config.suppressions[0];
    assert_eq!(rule.line_start, Some(10));
    assert_eq!(rule.expiration, NaiveDate::from_ymd_opt(2026, 12, 31));
}

#[test]
fn line_range_must_intersect() {
    let rule = SuppressionRule::new("B605", "src/*.py", "ok").lines(Some(10), Some(20));
    let engine = SuppressionEngine::with_today(&[rule], false, today());
    let mut findings = vec![
        finding("B605", "src/a.py", 18, 25),
        finding("B605", "src/a.py", 21, 22),
        finding("B605", "lib/a.py", 12, 12),
    ];
    let outcome = engine.apply(&mut findings);
    assert_eq!(outcome.newly_suppressed, 1);
    assert!(findings[0].is_suppressed());
    assert!(!findings[1].is_suppressed());
    assert!(!findings[2].is_suppressed());
}

#[test]
fn rule_id_globs_and_unused_rules() {
    let rules = vec![
        SuppressionRule::new("B3*", "**/*.py", "legacy code"),
        SuppressionRule::new("CKV_*", "infra/**", "tracked elsewhere"),
    ];
    let engine = SuppressionEngine::with_today(&rules, false, today());
    let mut findings = vec![finding("B307", "pkg/mod/a.py", 1, 1)];
    engine.apply(&mut findings);
    assert!(findings[0].is_suppressed());

    let unused = engine.unused_rules(&findings);
    assert_eq!(unused.len(), 1);
    assert_eq!(unused[0].rule_id, "CKV_*");
}

#[test]
fn expired_rules_never_apply_and_expiring_ones_are_listed() {
    let rules = vec![
        SuppressionRule::new("B605", "*", "old")
            .expires(NaiveDate::from_ymd_opt(2026, 2, 1).unwrap()),
        SuppressionRule::new("B101", "*", "soon")
            .expires(NaiveDate::from_ymd_opt(2026, 3, 15).unwrap()),
        SuppressionRule::new("B102", "*", "later")
            .expires(NaiveDate::from_ymd_opt(2026, 9, 1).unwrap()),
    ];
    let engine = SuppressionEngine::with_today(&rules, false, today());
    let mut findings = vec![finding("B605", "a.py", 1, 1)];
    engine.apply(&mut findings);
    assert!(!findings[0].is_suppressed());

    let expiring: Vec<_> = engine
        .expiring_within(today(), 30)
        .into_iter()
        .map(|r| r.rule_id.as_str())
        .collect();
    assert_eq!(expiring, ["B101"]);
}

#[test]
fn overlapping_rules_annotate_once_each() {
    let rules = vec![
        SuppressionRule::new("B605", "a.py", "first"),
        SuppressionRule::new("B6*", "*.py", "second"),
    ];
    let engine = SuppressionEngine::with_today(&rules, false, today());
    let mut findings = vec![finding("B605", "a.py", 1, 1)];
    engine.apply(&mut findings);
    engine.apply(&mut findings);
    assert_eq!(findings[0].suppressions.len(), 2);

    let reversed: Vec<_> = rules.iter().rev().cloned().collect();
    let mut again = vec![finding("B605", "a.py", 1, 1)];
    SuppressionEngine::with_today(&reversed, false, today()).apply(&mut again);
    assert!(again[0].is_suppressed());
}
