//! Dependency vulnerability matching via [grype](https://github.com/anchore/grype).
//!
//! Runs `grype dir:<target> -o json -q`. In offline mode the vulnerability
//! database and application update checks are disabled, so grype uses
//! whatever database is already cached.

use super::str_field;
use crate::context::{ExecutionContext, ScanExclusions};
use crate::error::{AggregationError, ExecutionError};
use crate::finding::{Finding, Location, Severity, TargetType};
use crate::plugins::tool::{parse_json, run_tool};
use crate::plugins::{Plugin, PluginDescriptor, PluginKind, ScannerPlugin, ToolDependency};
use serde_json::Value;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

const NAME: &str = "grype";

/// Manifests and lockfiles grype knows how to catalog.
const MANIFESTS: &[&str] = &[
    "package.json",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "requirements.txt",
    "Pipfile.lock",
    "poetry.lock",
    "setup.py",
    "go.mod",
    "go.sum",
    "Cargo.lock",
    "Gemfile.lock",
    "pom.xml",
    "build.gradle",
    "composer.lock",
];

pub fn descriptor() -> PluginDescriptor {
    PluginDescriptor::new(NAME, PluginKind::Scanner, "Dependency vulnerability scanning (grype)")
        .requires(ToolDependency::new("grype"))
}

pub struct GrypeScanner {
    ctx: Arc<ExecutionContext>,
}

impl GrypeScanner {
    pub fn new(ctx: &Arc<ExecutionContext>) -> Self {
        GrypeScanner {
            ctx: Arc::clone(ctx),
        }
    }
}

impl Plugin for GrypeScanner {
    fn descriptor(&self) -> PluginDescriptor {
        descriptor()
    }
}

impl ScannerPlugin for GrypeScanner {
    fn accepts(&self, path: &Path) -> bool {
        path.file_name()
            .map(|n| MANIFESTS.contains(&n.to_string_lossy().as_ref()))
            .unwrap_or(false)
    }

    fn scan(&self, target: &Path, _target_type: TargetType) -> Result<Value, ExecutionError> {
        let mut command = Command::new("grype");
        command
            .arg(format!("dir:{}", target.display()))
            .args(["-o", "json", "-q"]);
        command.args(exclude_args(&self.ctx.scan_exclusions(target)));
        if self.ctx.offline {
            command
                .env("GRYPE_DB_AUTO_UPDATE", "false")
                .env("GRYPE_CHECK_FOR_APP_UPDATE", "false");
        }
        let output = run_tool(NAME, &mut command, self.ctx.operation_timeout())?
            .expect_codes(NAME, &[0, 1])?;
        parse_json(NAME, &output.stdout, serde_json::json!({"matches": []}))
    }

    fn adapt(&self, native: &Value) -> Vec<Result<Finding, AggregationError>> {
        parse_results(native)
    }
}

/// Grype wants `./`-rooted globs for `--exclude`.
pub fn exclude_args(exclusions: &ScanExclusions) -> Vec<String> {
    exclusions
        .dirs
        .iter()
        .map(|d| format!("./{d}/**"))
        .chain(exclusions.globs.iter().map(|g| format!("./{g}")))
        .flat_map(|p| ["--exclude".to_string(), p])
        .collect()
}

/// Maps grype `matches` to findings, one per (vulnerability, package).
pub fn parse_results(native: &Value) -> Vec<Result<Finding, AggregationError>> {
    let items = match super::array_at(NAME, native, "matches") {
        Ok(items) => items,
        Err(e) => return vec![Err(e)],
    };
    items.iter().map(parse_item).collect()
}

fn parse_item(item: &Value) -> Result<Finding, AggregationError> {
    let id = str_field(item, &["/vulnerability/id"])
        .ok_or_else(|| AggregationError::new(NAME, "match without vulnerability id"))?;
    let package = str_field(item, &["/artifact/name"]).unwrap_or("unknown");
    let version = str_field(item, &["/artifact/version"]).unwrap_or("?");

    let locations: Vec<Location> = item
        .pointer("/artifact/locations")
        .and_then(Value::as_array)
        .map(|locs| {
            locs.iter()
                .filter_map(|l| l.get("path").and_then(Value::as_str))
                .map(|p| Location::new(p.trim_start_matches('/')))
                .collect()
        })
        .unwrap_or_default();
    if locations.is_empty() {
        return Err(AggregationError::new(NAME, format!("{id}: match without artifact location")));
    }

    let severity = Severity::normalize(str_field(item, &["/vulnerability/severity"]), NAME);
    let description = str_field(item, &["/vulnerability/description"]).unwrap_or("known vulnerability");
    let mut finding = Finding::new(
        NAME,
        id,
        severity,
        format!("{package}@{version}: {description}"),
    )
    .tagged(format!("package:{package}"));
    finding.locations = locations;

    let fixes: Vec<&str> = item
        .pointer("/vulnerability/fix/versions")
        .and_then(Value::as_array)
        .map(|v| v.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    if !fixes.is_empty() {
        finding = finding.with_help(format!("Upgrade {package} to {}", fixes.join(" or ")));
    }
    Ok(finding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn maps_match_with_fix() {
        let native = json!({"matches": [{
            "vulnerability": {
                "id": "GHSA-jf85-cpcp-j695",
                "severity": "Critical",
                "description": "Prototype pollution",
                "fix": {"versions": ["4.17.12"], "state": "fixed"}
            },
            "artifact": {
                "name": "lodash",
                "version": "4.17.4",
                "locations": [{"path": "/web/package-lock.json"}]
            }
        }]});
        let findings = parse_results(&native);
        let f = findings[0].as_ref().unwrap();
        assert_eq!(f.severity, Severity::Critical);
        assert_eq!(f.primary_location().unwrap().uri, "web/package-lock.json");
        assert_eq!(f.help.as_deref(), Some("Upgrade lodash to 4.17.12"));
    }

    #[test]
    fn unknown_severity_becomes_medium() {
        let native = json!({"matches": [{
            "vulnerability": {"id": "CVE-1", "severity": "Unknown"},
            "artifact": {"name": "x", "version": "1", "locations": [{"path": "/go.sum"}]}
        }]});
        assert_eq!(parse_results(&native)[0].as_ref().unwrap().severity, Severity::Medium);
    }

    #[test]
    fn match_without_location_is_dropped() {
        let native = json!({"matches": [{"vulnerability": {"id": "CVE-2"}, "artifact": {"name": "y"}}]});
        assert!(parse_results(&native)[0].is_err());
    }
}
