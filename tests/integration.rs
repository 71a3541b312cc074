use assert_cmd::Command;
use predicates::prelude::*;

fn oxidized_ash() -> Command {
    assert_cmd::cargo::cargo_bin_cmd!("oxidized-ash")
}

#[test]
fn check_tools_runs() {
    oxidized_ash()
        .arg("check-tools")
        .assert()
        .success()
        .stdout(predicate::str::contains("Tool Availability"))
        .stdout(predicate::str::contains("bandit"));
}

#[test]
fn list_plugins_shows_every_role() {
    oxidized_ash()
        .arg("list-plugins")
        .assert()
        .success()
        .stdout(predicate::str::contains("jupyter"))
        .stdout(predicate::str::contains("gitleaks"))
        .stdout(predicate::str::contains("unused-suppressions"));
}

#[test]
fn native_only_scan_writes_reports() {
    let src = tempfile::tempdir().unwrap();
    std::fs::write(
        src.path().join("analysis.ipynb"),
        r#"{"cells": [{"cell_type": "code", "source": ["import os\n", "os.system('ls')"]}]}"#,
    )
    .unwrap();
    let out = tempfile::tempdir().unwrap();

    oxidized_ash()
        .args(["scan", "--native-only", "--output-dir"])
        .arg(out.path())
        .arg(src.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("[SKIP] bandit"));

    assert!(out.path().join("ash_aggregated_results.json").is_file());
    assert!(out.path().join("reports/ash.sarif").is_file());
    assert!(out.path().join("work/converted/jupyter/analysis.ipynb.py").is_file());

    oxidized_ash()
        .args(["report", "--output-dir"])
        .arg(out.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("ASH scan"));
}

#[test]
fn scan_nonexistent_source_exits_1() {
    oxidized_ash()
        .args(["scan", "tests/fixtures/does-not-exist"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn report_without_saved_results_exits_1() {
    let out = tempfile::tempdir().unwrap();
    oxidized_ash()
        .args(["report", "--output-dir"])
        .arg(out.path())
        .assert()
        .code(1);
}

#[test]
fn invalid_config_exits_1() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("ash.toml");
    std::fs::write(&config, "[execution]\nmax_workers = 0\n").unwrap();
    oxidized_ash()
        .args(["scan", "--config"])
        .arg(&config)
        .arg(dir.path())
        .assert()
        .code(1);
}

/// Installs a stand-in `bandit` that logs its arguments and reports one HIGH
/// issue for every Python file under `-r <target>`, ignoring `--exclude`.
#[cfg(unix)]
fn fake_bandit(bin: &std::path::Path) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let log = bin.join("args.txt");
    let script = format!(
        r#"#!/bin/sh
echo "$@" >> "{log}"
target=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-r" ]; then target="$2"; shift; fi
  shift
done
printf '{{"results": ['
sep=""
for f in $(find "$target" -name '*.py' | sort); do
  printf '%s{{"test_id": "B605", "filename": "%s", "issue_severity": "HIGH", "issue_text": "shell call", "line_number": 1}}' "$sep" "$f"
  sep=","
done
printf ']}}\n'
exit 1
"#,
        log = log.display()
    );
    let exe = bin.join("bandit");
    std::fs::write(&exe, script).unwrap();
    std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();
    log
}

#[cfg(unix)]
fn path_with(bin: &std::path::Path) -> String {
    let orig = std::env::var("PATH").unwrap_or_default();
    format!("{}:{orig}", bin.display())
}

#[cfg(unix)]
fn python_project() -> tempfile::TempDir {
    let src = tempfile::tempdir().unwrap();
    std::fs::write(src.path().join("app.py"), "import os\nos.system('ls')\n").unwrap();
    std::fs::write(
        src.path().join("nb.ipynb"),
        r#"{"cells": [{"cell_type": "code", "source": ["import os\n", "os.system('ls')"]}]}"#,
    )
    .unwrap();
    std::fs::create_dir_all(src.path().join("vendor")).unwrap();
    std::fs::write(src.path().join("vendor/dep.py"), "eval('1')\n").unwrap();
    src
}

#[cfg(unix)]
fn finding_uris(flat_json: &std::path::Path) -> Vec<String> {
    let doc: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(flat_json).unwrap()).unwrap();
    doc["findings"]
        .as_array()
        .unwrap()
        .iter()
        .chain(doc["suppressed"].as_array().unwrap())
        .flat_map(|f| f["locations"].as_array().unwrap().clone())
        .map(|l| l["uri"].as_str().unwrap().to_string())
        .collect()
}

#[cfg(unix)]
#[test]
fn source_scan_leaves_out_run_artifacts_and_ignored_paths() {
    let src = python_project();
    std::fs::write(
        src.path().join("ash.toml"),
        "[[ignore_paths]]\npath = \"vendor\"\nreason = \"third party\"\n",
    )
    .unwrap();
    let bin = tempfile::tempdir().unwrap();
    let log = fake_bandit(bin.path());

    oxidized_ash()
        .env("PATH", path_with(bin.path()))
        .args(["scan", "--scanners", "bandit", "--no-fail-on-findings", "--config"])
        .arg(src.path().join("ash.toml"))
        .arg(src.path())
        .assert()
        .success();

    let out = src.path().join(".ash/ash_output");
    let uris = finding_uris(&out.join("reports/ash.flat.json"));
    assert!(uris.iter().any(|u| u == "app.py"), "{uris:?}");
    assert!(uris.iter().any(|u| u.ends_with("nb.ipynb.py")), "{uris:?}");
    assert!(!uris.iter().any(|u| u.starts_with(".ash")), "{uris:?}");
    assert!(!uris.iter().any(|u| u.starts_with("vendor")), "{uris:?}");

    let aggregated = std::fs::read_to_string(out.join("ash_aggregated_results.json")).unwrap();
    assert!(!aggregated.contains("\"uri\": \".ash/"));

    let args = std::fs::read_to_string(log).unwrap();
    assert!(args.contains("--exclude"));
    assert!(args.contains(".ash/ash_output"));
    assert!(args.contains("vendor"));
}

#[cfg(unix)]
#[test]
fn actionable_findings_fail_the_run_unless_disabled() {
    let src = python_project();
    let bin = tempfile::tempdir().unwrap();
    fake_bandit(bin.path());

    oxidized_ash()
        .env("PATH", path_with(bin.path()))
        .args(["scan", "--scanners", "bandit"])
        .arg(src.path())
        .assert()
        .code(2)
        .stdout(predicate::str::contains("[FAIL] bandit"));

    oxidized_ash()
        .env("PATH", path_with(bin.path()))
        .args(["scan", "--scanners", "bandit", "--no-fail-on-findings"])
        .arg(src.path())
        .assert()
        .success();
}
