//! Python static analysis via [bandit](https://bandit.readthedocs.io/).
//!
//! Runs `bandit -r <target> -f json -q` and maps each entry of the
//! `results` array to a finding. Bandit exits 1 when it reports issues, so
//! both 0 and 1 count as success.

use super::{array_at, has_extension, line_field, str_field};
use crate::context::{ExecutionContext, ScanExclusions};
use crate::error::{AggregationError, ExecutionError};
use crate::finding::{Finding, Location, Severity, TargetType};
use crate::plugins::tool::{parse_json, run_tool};
use crate::plugins::{Plugin, PluginDescriptor, PluginKind, ScannerPlugin, ToolDependency};
use serde_json::Value;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

const NAME: &str = "bandit";

pub fn descriptor() -> PluginDescriptor {
    PluginDescriptor::new(NAME, PluginKind::Scanner, "Python security linter (bandit)")
        .requires(ToolDependency::new("bandit"))
}

pub struct BanditScanner {
    ctx: Arc<ExecutionContext>,
}

impl BanditScanner {
    pub fn new(ctx: &Arc<ExecutionContext>) -> Self {
        BanditScanner {
            ctx: Arc::clone(ctx),
        }
    }
}

impl Plugin for BanditScanner {
    fn descriptor(&self) -> PluginDescriptor {
        descriptor()
    }
}

impl ScannerPlugin for BanditScanner {
    fn accepts(&self, path: &Path) -> bool {
        has_extension(path, &["py", "pyi"])
    }

    fn scan(&self, target: &Path, _target_type: TargetType) -> Result<Value, ExecutionError> {
        let mut command = Command::new("bandit");
        command.arg("-r").arg(target).args(["-f", "json", "-q"]);
        command.args(exclude_args(target, &self.ctx.scan_exclusions(target)));
        let output = run_tool(NAME, &mut command, self.ctx.operation_timeout())?
            .expect_codes(NAME, &[0, 1])?;
        parse_json(NAME, &output.stdout, serde_json::json!({"results": []}))
    }

    fn adapt(&self, native: &Value) -> Vec<Result<Finding, AggregationError>> {
        parse_results(native)
    }
}

/// `--exclude` with bandit's comma-separated list. Directories are given as
/// absolute prefixes, globs are anchored at the target.
pub fn exclude_args(target: &Path, exclusions: &ScanExclusions) -> Vec<String> {
    if exclusions.is_empty() {
        return Vec::new();
    }
    let list: Vec<String> = exclusions
        .dirs
        .iter()
        .map(|d| target.join(d).display().to_string())
        .chain(exclusions.globs.iter().map(|g| format!("{}/{g}", target.display())))
        .collect();
    vec!["--exclude".to_string(), list.join(",")]
}

/// Maps bandit's JSON report to findings.
pub fn parse_results(native: &Value) -> Vec<Result<Finding, AggregationError>> {
    let items = match array_at(NAME, native, "results") {
        Ok(items) => items,
        Err(e) => return vec![Err(e)],
    };
    items.iter().map(parse_item).collect()
}

fn parse_item(item: &Value) -> Result<Finding, AggregationError> {
    let rule_id = str_field(item, &["/test_id"])
        .ok_or_else(|| AggregationError::new(NAME, "result without test_id"))?;
    let file = str_field(item, &["/filename"])
        .ok_or_else(|| AggregationError::new(NAME, format!("{rule_id}: result without filename")))?;

    let severity = Severity::normalize(str_field(item, &["/issue_severity"]), NAME);
    let message = str_field(item, &["/issue_text"]).unwrap_or("bandit finding");
    let start = line_field(item, &["/line_number"]);
    let end = item
        .get("line_range")
        .and_then(Value::as_array)
        .and_then(|r| r.last())
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok());

    let mut finding = Finding::new(NAME, rule_id, severity, message)
        .at(Location::new(file).lines(start, end.or(start)));
    if let Some(name) = str_field(item, &["/test_name"]) {
        finding = finding.tagged(name);
    }
    if let Some(cwe) = item.pointer("/issue_cwe/id").and_then(Value::as_u64) {
        finding = finding.tagged(format!("CWE-{cwe}"));
    }
    if let Some(confidence) = str_field(item, &["/issue_confidence"]) {
        finding = finding.tagged(format!("confidence:{}", confidence.to_lowercase()));
    }
    if let Some(url) = str_field(item, &["/more_info"]) {
        finding = finding.with_help(url);
    }
    Ok(finding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn excludes_output_dir_and_ignored_globs() {
        let excl = ScanExclusions {
            dirs: vec![".ash/ash_output".to_string()],
            globs: vec!["vendor/**".to_string()],
        };
        let args = exclude_args(Path::new("/src"), &excl);
        assert_eq!(
            args,
            vec!["--exclude", "/src/.ash/ash_output,/src/vendor/**"]
        );
        assert!(exclude_args(Path::new("/src"), &ScanExclusions::default()).is_empty());
    }

    #[test]
    fn maps_result_fields() {
        let native = json!({"results": [{
            "test_id": "B605",
            "test_name": "start_process_with_a_shell",
            "issue_severity": "HIGH",
            "issue_confidence": "MEDIUM",
            "issue_text": "Starting a process with a shell",
            "filename": "./example.py",
            "line_number": 3,
            "line_range": [3, 4],
            "issue_cwe": {"id": 78},
            "more_info": "https://bandit.readthedocs.io/"
        }]});
        let findings: Vec<_> = parse_results(&native).into_iter().collect();
        let f = findings[0].as_ref().unwrap();
        assert_eq!(f.rule_id, "B605");
        assert_eq!(f.severity, Severity::High);
        let loc = f.primary_location().unwrap();
        assert_eq!((loc.start_line, loc.end_line), (Some(3), Some(4)));
        assert!(f.tags.contains(&"CWE-78".to_string()));
    }

    #[test]
    fn entry_without_test_id_is_an_error() {
        let native = json!({"results": [{"filename": "a.py"}]});
        assert!(parse_results(&native)[0].is_err());
    }
}
