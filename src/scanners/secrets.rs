//! Secret scanning via [gitleaks](https://github.com/gitleaks/gitleaks).
//!
//! # How it works
//!
//! 1. Spawns `gitleaks detect --source <target> --no-git --report-format json
//!    --report-path <tmpfile>`.
//! 2. Reads the JSON report, blanking the `Secret` and `Match` fields so the
//!    leaked value never reaches the persisted results.
//! 3. Maps every leak to a [`Severity::High`] finding.
//!
//! # Exit codes
//!
//! - **0**: no leaks found.
//! - **1**: leaks found (expected; findings are returned).
//! - **≥ 2**: gitleaks error.

use super::{line_field, str_field};
use crate::context::{ExecutionContext, ScanExclusions};
use crate::error::{AggregationError, ExecutionError};
use crate::finding::{Finding, Location, Severity, TargetType};
use crate::plugins::tool::{parse_json, run_tool};
use crate::plugins::{Plugin, PluginDescriptor, PluginKind, ScannerPlugin, ToolDependency};
use serde_json::Value;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

const NAME: &str = "gitleaks";

const REDACTED: &str = "REDACTED";

pub fn descriptor() -> PluginDescriptor {
    PluginDescriptor::new(NAME, PluginKind::Scanner, "Secret detection (gitleaks)")
        .requires(ToolDependency::new("gitleaks").on_platforms(&["linux", "macos", "freebsd"]))
        .requires(ToolDependency::new("gitleaks.exe").on_platforms(&["windows"]))
}

pub struct SecretsScanner {
    ctx: Arc<ExecutionContext>,
}

impl SecretsScanner {
    pub fn new(ctx: &Arc<ExecutionContext>) -> Self {
        SecretsScanner {
            ctx: Arc::clone(ctx),
        }
    }
}

impl Plugin for SecretsScanner {
    fn descriptor(&self) -> PluginDescriptor {
        descriptor()
    }
}

impl ScannerPlugin for SecretsScanner {
    fn scan(&self, target: &Path, _target_type: TargetType) -> Result<Value, ExecutionError> {
        // NamedTempFile removes the report when dropped
        let report_file = tempfile::NamedTempFile::new()?;

        let mut command = Command::new("gitleaks");
        command
            .arg("detect")
            .arg("--source")
            .arg(target)
            .args(["--no-git", "--no-banner", "--report-format", "json", "--report-path"])
            .arg(report_file.path());
        // Must outlive the gitleaks process.
        let config_file = match allowlist_config(&self.ctx.scan_exclusions(target)) {
            Some(config) => {
                let file = tempfile::Builder::new().suffix(".toml").tempfile()?;
                std::fs::write(file.path(), config)?;
                command.arg("--config").arg(file.path());
                Some(file)
            }
            None => None,
        };
        run_tool(NAME, &mut command, self.ctx.operation_timeout())?.expect_codes(NAME, &[0, 1])?;

        drop(config_file);
        let content = std::fs::read_to_string(report_file.path())?;
        let mut report = parse_json(NAME, &content, Value::Array(Vec::new()))?;
        redact(&mut report);
        Ok(report)
    }

    fn adapt(&self, native: &Value) -> Vec<Result<Finding, AggregationError>> {
        parse_results(native)
    }
}

/// A gitleaks config extending the default rules with a path allowlist, or
/// `None` when nothing is excluded.
pub fn allowlist_config(exclusions: &ScanExclusions) -> Option<String> {
    if exclusions.is_empty() {
        return None;
    }
    let paths: Vec<String> = exclusions
        .regexes()
        .iter()
        .map(|re| format!("  '''{re}''',"))
        .collect();
    Some(format!(
        "[extend]\nuseDefault = true\n\n[allowlist]\ndescription = \"ash run exclusions\"\npaths = [\n{}\n]\n",
        paths.join("\n")
    ))
}

/// Blanks secret material in a gitleaks report in place.
pub fn redact(report: &mut Value) {
    if let Value::Array(items) = report {
        for item in items.iter_mut().filter_map(Value::as_object_mut) {
            for key in ["Secret", "Match", "secret", "match"] {
                if let Some(v) = item.get_mut(key) {
                    *v = Value::String(REDACTED.to_string());
                }
            }
        }
    }
}

/// Maps a gitleaks report (a JSON array) to findings.
pub fn parse_results(native: &Value) -> Vec<Result<Finding, AggregationError>> {
    let Some(items) = native.as_array() else {
        return vec![Err(AggregationError::new(NAME, "report is not an array"))];
    };
    items.iter().map(parse_item).collect()
}

fn parse_item(item: &Value) -> Result<Finding, AggregationError> {
    let rule = str_field(item, &["/RuleID", "/ruleId"])
        .ok_or_else(|| AggregationError::new(NAME, "leak without RuleID"))?;
    let file = str_field(item, &["/File", "/file"])
        .ok_or_else(|| AggregationError::new(NAME, format!("{rule}: leak without File")))?;
    let description = str_field(item, &["/Description", "/description"]).unwrap_or("Secret detected");

    let location = Location::new(file).lines(
        line_field(item, &["/StartLine", "/startLine"]),
        line_field(item, &["/EndLine", "/endLine"]),
    );
    let mut finding = Finding::new(NAME, rule, Severity::High, description)
        .at(location)
        .tagged("secret")
        .with_help("Rotate the leaked secret immediately and remove it from the codebase");
    if let Some(tags) = item.get("Tags").and_then(Value::as_array) {
        for tag in tags.iter().filter_map(Value::as_str) {
            finding = finding.tagged(tag);
        }
    }
    Ok(finding)
}
