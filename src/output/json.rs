//! Flat JSON export.
//!
//! Produces a pretty-printed document with report metadata, per-scanner
//! statuses, and the active and suppressed findings as two flat lists.

use crate::aggregate::{AggregatedReport, SummaryStats};
use crate::error::ExecutionError;
use crate::finding::{Finding, ScannerStatus};
use crate::plugins::{Plugin, PluginDescriptor, PluginKind, ReporterPlugin};
use std::collections::BTreeMap;

const NAME: &str = "json";

pub fn descriptor() -> PluginDescriptor {
    PluginDescriptor::new(NAME, PluginKind::Reporter, "Flat JSON findings list with summary").native()
}

#[derive(serde::Serialize)]
struct JsonOutput<'a> {
    report_id: &'a str,
    project: &'a str,
    generated_at: String,
    tool_version: &'a str,
    summary: &'a SummaryStats,
    scanners: BTreeMap<&'a str, ScannerStatus>,
    findings: Vec<&'a Finding>,
    suppressed: Vec<&'a Finding>,
}

pub struct JsonReporter;

impl Plugin for JsonReporter {
    fn descriptor(&self) -> PluginDescriptor {
        descriptor()
    }
}

impl ReporterPlugin for JsonReporter {
    fn extension(&self) -> &str {
        "flat.json"
    }

    fn report(&self, model: &AggregatedReport) -> Result<String, ExecutionError> {
        format(model)
    }
}

/// Formats an [`AggregatedReport`] as pretty-printed flat JSON.
pub fn format(model: &AggregatedReport) -> Result<String, ExecutionError> {
    let output = JsonOutput {
        report_id: &model.metadata.report_id,
        project: &model.metadata.project_name,
        generated_at: model.metadata.generated_at.to_rfc3339(),
        tool_version: &model.metadata.tool_version,
        summary: model.summary(),
        scanners: model
            .scanner_results
            .iter()
            .map(|(name, info)| (name.as_str(), info.status))
            .collect(),
        findings: model.active_findings().collect(),
        suppressed: model.suppressed_findings().collect(),
    };
    serde_json::to_string_pretty(&output).map_err(|source| ExecutionError::Render {
        format: NAME.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::{Location, Severity, SuppressionAnnotation};

    #[test]
    fn splits_active_and_suppressed() {
        let mut model = AggregatedReport::new("demo", None);
        model.findings.push(
            Finding::new("bandit", "B605", Severity::High, "shell").at(Location::new("a.py")),
        );
        let mut quiet = Finding::new("bandit", "B307", Severity::Medium, "eval");
        quiet.suppressions.push(SuppressionAnnotation {
            rule: "B307@a.py".into(),
            justification: "reviewed".into(),
        });
        model.findings.push(quiet);

        let value: serde_json::Value = serde_json::from_str(&format(&model).unwrap()).unwrap();
        assert_eq!(value["project"], "demo");
        assert_eq!(value["findings"].as_array().unwrap().len(), 1);
        assert_eq!(value["suppressed"][0]["rule_id"], "B307");
    }
}
