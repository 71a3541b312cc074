//! Static analysis via [semgrep](https://semgrep.dev/).
//!
//! Spawns `semgrep scan --json --quiet --metrics=off --config auto <target>`
//! and maps the `results` array to findings. Semgrep can stall for a long
//! time when it tries to reach semgrep.dev on a restricted network; the
//! tool runner kills it once the operation timeout expires.

use super::{array_at, line_field, str_field};
use crate::context::{ExecutionContext, ScanExclusions};
use crate::error::{AggregationError, ExecutionError};
use crate::finding::{Finding, Location, Severity, TargetType};
use crate::plugins::tool::{parse_json, run_tool};
use crate::plugins::{Plugin, PluginDescriptor, PluginKind, ScannerPlugin, ToolDependency};
use serde_json::Value;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

const NAME: &str = "semgrep";

pub fn descriptor() -> PluginDescriptor {
    PluginDescriptor::new(NAME, PluginKind::Scanner, "Multi-language static analysis (semgrep)")
        .requires(ToolDependency::new("semgrep"))
}

pub struct SemgrepScanner {
    ctx: Arc<ExecutionContext>,
}

impl SemgrepScanner {
    pub fn new(ctx: &Arc<ExecutionContext>) -> Self {
        SemgrepScanner {
            ctx: Arc::clone(ctx),
        }
    }
}

impl Plugin for SemgrepScanner {
    fn descriptor(&self) -> PluginDescriptor {
        descriptor()
    }
}

impl ScannerPlugin for SemgrepScanner {
    fn scan(&self, target: &Path, _target_type: TargetType) -> Result<Value, ExecutionError> {
        let mut command = Command::new("semgrep");
        command
            .args(["scan", "--json", "--quiet", "--metrics=off", "--config", "auto"])
            .arg(target);
        command.args(exclude_args(&self.ctx.scan_exclusions(target)));
        if self.ctx.offline {
            command.env("SEMGREP_ENABLE_VERSION_CHECK", "0");
        }
        // semgrep exits 1 when findings are present
        let output = run_tool(NAME, &mut command, self.ctx.operation_timeout())?
            .expect_codes(NAME, &[0, 1])?;
        parse_json(NAME, &output.stdout, serde_json::json!({"results": []}))
    }

    fn adapt(&self, native: &Value) -> Vec<Result<Finding, AggregationError>> {
        parse_results(native)
    }
}

/// One `--exclude` per path pattern, relative to the scanned target.
pub fn exclude_args(exclusions: &ScanExclusions) -> Vec<String> {
    exclusions
        .dirs
        .iter()
        .chain(&exclusions.globs)
        .flat_map(|p| ["--exclude".to_string(), p.clone()])
        .collect()
}

/// Maps semgrep's JSON output to findings.
pub fn parse_results(native: &Value) -> Vec<Result<Finding, AggregationError>> {
    let items = match array_at(NAME, native, "results") {
        Ok(items) => items,
        Err(e) => return vec![Err(e)],
    };
    items.iter().map(parse_item).collect()
}

fn parse_item(item: &Value) -> Result<Finding, AggregationError> {
    let check_id = str_field(item, &["/check_id"])
        .ok_or_else(|| AggregationError::new(NAME, "result without check_id"))?;
    let path = str_field(item, &["/path"])
        .ok_or_else(|| AggregationError::new(NAME, format!("{check_id}: result without path")))?;

    // semgrep rules carry ERROR/WARNING/INFO; registry metadata may be finer
    let severity = match str_field(item, &["/extra/metadata/impact"]) {
        Some(impact) if Severity::from_tool(impact).is_some() => Severity::normalize(Some(impact), NAME),
        _ => match str_field(item, &["/extra/severity"]) {
            Some(s) if s.eq_ignore_ascii_case("INFO") => Severity::Low,
            other => Severity::normalize(other, NAME),
        },
    };
    let message = str_field(item, &["/extra/message"]).unwrap_or("semgrep finding");

    let mut finding = Finding::new(NAME, check_id, severity, message).at(
        Location::new(path).lines(
            line_field(item, &["/start/line"]),
            line_field(item, &["/end/line"]),
        ),
    );
    if let Some(cwes) = item.pointer("/extra/metadata/cwe") {
        let cwes: Vec<&str> = match cwes {
            Value::Array(list) => list.iter().filter_map(Value::as_str).collect(),
            Value::String(s) => vec![s.as_str()],
            _ => Vec::new(),
        };
        for cwe in cwes {
            let id = cwe.split(':').next().unwrap_or(cwe).trim();
            finding = finding.tagged(id);
        }
    }
    if let Some(fix) = str_field(item, &["/extra/fix", "/extra/metadata/fix"]) {
        finding = finding.with_help(fix);
    }
    Ok(finding)
}
