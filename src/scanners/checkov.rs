//! Infrastructure-as-code checks via [checkov](https://www.checkov.io/).
//!
//! Checkov prints one report object per framework, or an array of them when
//! several frameworks match. Only `results.failed_checks` become findings.
//! File paths in checkov output are target-relative with a leading slash.

use super::{has_extension, str_field};
use crate::context::{ExecutionContext, ScanExclusions};
use crate::error::{AggregationError, ExecutionError};
use crate::finding::{Finding, Location, Severity, TargetType};
use crate::plugins::tool::{parse_json, run_tool};
use crate::plugins::{Plugin, PluginDescriptor, PluginKind, ScannerPlugin, ToolDependency};
use serde_json::Value;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

const NAME: &str = "checkov";

const IAC_EXTENSIONS: &[&str] = &["tf", "tfvars", "yaml", "yml", "json", "template", "bicep"];

pub fn descriptor() -> PluginDescriptor {
    PluginDescriptor::new(NAME, PluginKind::Scanner, "Infrastructure-as-code misconfigurations (checkov)")
        .requires(ToolDependency::new("checkov"))
}

pub struct CheckovScanner {
    ctx: Arc<ExecutionContext>,
}

impl CheckovScanner {
    pub fn new(ctx: &Arc<ExecutionContext>) -> Self {
        CheckovScanner {
            ctx: Arc::clone(ctx),
        }
    }
}

impl Plugin for CheckovScanner {
    fn descriptor(&self) -> PluginDescriptor {
        descriptor()
    }
}

impl ScannerPlugin for CheckovScanner {
    fn accepts(&self, path: &Path) -> bool {
        let dockerfile = path
            .file_name()
            .map(|n| n.to_string_lossy().starts_with("Dockerfile"))
            .unwrap_or(false);
        dockerfile || has_extension(path, IAC_EXTENSIONS)
    }

    fn scan(&self, target: &Path, _target_type: TargetType) -> Result<Value, ExecutionError> {
        let mut command = Command::new("checkov");
        command
            .arg("-d")
            .arg(target)
            .args(["-o", "json", "--quiet", "--compact"]);
        command.args(exclude_args(&self.ctx.scan_exclusions(target)));
        if self.ctx.offline {
            command.arg("--skip-download");
        }
        let output = run_tool(NAME, &mut command, self.ctx.operation_timeout())?
            .expect_codes(NAME, &[0, 1])?;
        parse_json(NAME, &output.stdout, Value::Array(Vec::new()))
    }

    fn adapt(&self, native: &Value) -> Vec<Result<Finding, AggregationError>> {
        parse_results(native)
    }
}

/// One `--skip-path` regular expression per exclusion.
pub fn exclude_args(exclusions: &ScanExclusions) -> Vec<String> {
    exclusions
        .regexes()
        .into_iter()
        .flat_map(|re| ["--skip-path".to_string(), re])
        .collect()
}

/// Maps checkov output (one report or an array of reports) to findings.
pub fn parse_results(native: &Value) -> Vec<Result<Finding, AggregationError>> {
    let reports: Vec<&Value> = match native {
        Value::Array(list) => list.iter().collect(),
        Value::Object(_) => vec![native],
        _ => return vec![Err(AggregationError::new(NAME, "unexpected report shape"))],
    };

    let mut out = Vec::new();
    for report in reports {
        let check_type = str_field(report, &["/check_type"]).unwrap_or("unknown");
        let Some(failed) = report.pointer("/results/failed_checks") else {
            continue;
        };
        let Some(failed) = failed.as_array() else {
            out.push(Err(AggregationError::new(NAME, "failed_checks is not an array")));
            continue;
        };
        out.extend(failed.iter().map(|item| parse_item(item, check_type)));
    }
    out
}

fn parse_item(item: &Value, check_type: &str) -> Result<Finding, AggregationError> {
    let check_id = str_field(item, &["/check_id"])
        .ok_or_else(|| AggregationError::new(NAME, "failed check without check_id"))?;
    let file = str_field(item, &["/file_path", "/repo_file_path"])
        .ok_or_else(|| AggregationError::new(NAME, format!("{check_id}: no file_path")))?;

    let range: Vec<u32> = item
        .get("file_line_range")
        .and_then(Value::as_array)
        .map(|r| {
            r.iter()
                .filter_map(Value::as_u64)
                .filter_map(|n| u32::try_from(n).ok())
                .collect()
        })
        .unwrap_or_default();
    let (start, end) = match range.as_slice() {
        [s, e, ..] => (Some(*s), Some(*e)),
        [s] => (Some(*s), Some(*s)),
        [] => (None, None),
    };

    let severity = Severity::normalize(str_field(item, &["/severity"]), NAME);
    let message = str_field(item, &["/check_name"]).unwrap_or(check_id);
    let mut finding = Finding::new(NAME, check_id, severity, message)
        .at(Location::new(file.trim_start_matches('/')).lines(start, end))
        .tagged(check_type);
    if let Some(resource) = str_field(item, &["/resource"]) {
        finding = finding.tagged(format!("resource:{resource}"));
    }
    if let Some(guideline) = str_field(item, &["/guideline"]) {
        finding = finding.with_help(guideline);
    }
    Ok(finding)
}
