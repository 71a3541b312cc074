//! [SARIF 2.1.0](https://sarifweb.azurewebsites.net/) export.
//!
//! All findings are emitted, suppressed ones included, with suppressed
//! results carrying an `external`/`accepted` suppression entry. SARIF only
//! has three levels, so the canonical severity, scanner and tags are kept in
//! each result's property bag.

use crate::aggregate::AggregatedReport;
use crate::error::ExecutionError;
use crate::finding::{Finding, Severity};
use crate::plugins::{Plugin, PluginDescriptor, PluginKind, ReporterPlugin};
use serde_json::{json, Value};
use serde_sarif::sarif::{
    ArtifactLocation, Location, Message, MultiformatMessageString, PhysicalLocation, Region,
    ReportingDescriptor, Result as SarifResult, ResultLevel, Run, Sarif, Tool, ToolComponent,
};
use std::collections::HashMap;

const NAME: &str = "sarif";

pub fn descriptor() -> PluginDescriptor {
    PluginDescriptor::new(NAME, PluginKind::Reporter, "SARIF 2.1.0 export").native()
}

pub struct SarifReporter;

impl Plugin for SarifReporter {
    fn descriptor(&self) -> PluginDescriptor {
        descriptor()
    }
}

impl ReporterPlugin for SarifReporter {
    fn extension(&self) -> &str {
        "sarif"
    }

    fn report(&self, model: &AggregatedReport) -> Result<String, ExecutionError> {
        format(model)
    }
}

fn level(severity: Severity) -> ResultLevel {
    match severity {
        Severity::Critical | Severity::High => ResultLevel::Error,
        Severity::Medium => ResultLevel::Warning,
        Severity::Low | Severity::Info => ResultLevel::Note,
    }
}

/// Formats an [`AggregatedReport`] as a SARIF log with one run.
pub fn format(model: &AggregatedReport) -> Result<String, ExecutionError> {
    let render_err = |source| ExecutionError::Render {
        format: NAME.to_string(),
        source,
    };

    // Rules are keyed by scanner too; two tools may reuse an id
    let mut rule_map: HashMap<(&str, &str), &Finding> = HashMap::new();
    for f in &model.findings {
        rule_map.entry((f.scanner.as_str(), f.rule_id.as_str())).or_insert(f);
    }
    let mut rule_keys: Vec<(&str, &str)> = rule_map.keys().copied().collect();
    rule_keys.sort();
    let rule_index: HashMap<(&str, &str), i64> = rule_keys
        .iter()
        .enumerate()
        .map(|(i, key)| (*key, i as i64))
        .collect();

    let rules: Vec<ReportingDescriptor> = rule_keys
        .iter()
        .map(|key| {
            let f = rule_map[key];
            let mut rule = ReportingDescriptor::builder().id(f.rule_id.clone()).build();
            rule.short_description = Some(
                MultiformatMessageString::builder()
                    .text(f.message.clone())
                    .build(),
            );
            if let Some(ref help) = f.help {
                rule.help = Some(MultiformatMessageString::builder().text(help.clone()).build());
            }
            rule
        })
        .collect();

    let results: Vec<SarifResult> = model
        .findings
        .iter()
        .map(|f| {
            let mut result = SarifResult::builder()
                .message(Message::builder().text(f.message.clone()).build())
                .build();
            result.rule_id = Some(f.rule_id.clone());
            result.level = Some(level(f.severity));
            result.rule_index = rule_index
                .get(&(f.scanner.as_str(), f.rule_id.as_str()))
                .copied();

            let locations: Vec<Location> = f
                .locations
                .iter()
                .map(|loc| {
                    let mut physical = PhysicalLocation::builder().build();
                    physical.artifact_location =
                        Some(ArtifactLocation::builder().uri(loc.uri.clone()).build());
                    if let Some(start) = loc.start_line {
                        let mut region = Region::builder().start_line(i64::from(start)).build();
                        region.end_line = loc.end_line.map(i64::from);
                        physical.region = Some(region);
                    }
                    let mut location = Location::builder().build();
                    location.physical_location = Some(physical);
                    location
                })
                .collect();
            if !locations.is_empty() {
                result.locations = Some(locations);
            }
            result
        })
        .collect();

    let driver = ToolComponent::builder()
        .name("oxidized-ash")
        .version(env!("CARGO_PKG_VERSION").to_string())
        .rules(rules)
        .build();
    let tool = Tool::builder().driver(driver).build();
    let run = Run::builder().tool(tool).results(results).build();
    let sarif = Sarif::builder().version("2.1.0").runs(vec![run]).build();

    let mut value = serde_json::to_value(&sarif).map_err(render_err)?;
    annotate_results(&mut value, &model.findings);
    serde_json::to_string_pretty(&value).map_err(render_err)
}

/// Adds suppressions and the canonical property bag to each serialized
/// result. Results are in the same order as `findings`.
fn annotate_results(sarif: &mut Value, findings: &[Finding]) {
    let Some(results) = sarif
        .pointer_mut("/runs/0/results")
        .and_then(Value::as_array_mut)
    else {
        return;
    };
    for (result, finding) in results.iter_mut().zip(findings) {
        let Some(obj) = result.as_object_mut() else {
            continue;
        };
        if finding.is_suppressed() {
            let suppressions: Vec<Value> = finding
                .suppressions
                .iter()
                .map(|s| {
                    json!({
                        "kind": "external",
                        "status": "accepted",
                        "justification": s.justification,
                        "properties": {"rule": s.rule},
                    })
                })
                .collect();
            obj.insert("suppressions".to_string(), Value::Array(suppressions));
        }
        obj.insert(
            "properties".to_string(),
            json!({
                "severity": finding.severity,
                "scanner": finding.scanner,
                "tags": finding.tags,
            }),
        );
    }
}
