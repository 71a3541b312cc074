//! Lists suppression rules that matched no finding in this run.
//!
//! A rule is unused when no finding carries its annotation. Expired rules
//! are never applied, so they always show up here, flagged as expired.

use crate::aggregate::AggregatedReport;
use crate::error::ExecutionError;
use crate::plugins::{Plugin, PluginDescriptor, PluginKind, ReporterPlugin};
use crate::suppression::SuppressionRule;
use std::collections::BTreeSet;

const NAME: &str = "unused-suppressions";

pub fn descriptor() -> PluginDescriptor {
    PluginDescriptor::new(NAME, PluginKind::Reporter, "Suppression rules that matched nothing").native()
}

#[derive(serde::Serialize)]
struct UnusedRule<'a> {
    reference: String,
    expired: bool,
    #[serde(flatten)]
    rule: &'a SuppressionRule,
}

#[derive(serde::Serialize)]
struct UnusedOutput<'a> {
    report_id: &'a str,
    total_rules: usize,
    unused: Vec<UnusedRule<'a>>,
}

pub struct UnusedSuppressionsReporter;

impl Plugin for UnusedSuppressionsReporter {
    fn descriptor(&self) -> PluginDescriptor {
        descriptor()
    }
}

impl ReporterPlugin for UnusedSuppressionsReporter {
    fn extension(&self) -> &str {
        "unused-suppressions.json"
    }

    fn report(&self, model: &AggregatedReport) -> Result<String, ExecutionError> {
        format(model)
    }
}

pub fn format(model: &AggregatedReport) -> Result<String, ExecutionError> {
    let rules: &[SuppressionRule] = model
        .config
        .as_ref()
        .map(|c| c.suppressions.as_slice())
        .unwrap_or(&[]);
    let applied: BTreeSet<&str> = model
        .findings
        .iter()
        .flat_map(|f| f.suppressions.iter().map(|a| a.rule.as_str()))
        .collect();
    let today = model.metadata.generated_at.date_naive();

    let unused = rules
        .iter()
        .filter_map(|rule| {
            let reference = rule.reference();
            (!applied.contains(reference.as_str())).then(|| UnusedRule {
                expired: rule.is_expired(today),
                reference,
                rule,
            })
        })
        .collect();

    let output = UnusedOutput {
        report_id: &model.metadata.report_id,
        total_rules: rules.len(),
        unused,
    };
    serde_json::to_string_pretty(&output).map_err(|source| ExecutionError::Render {
        format: NAME.to_string(),
        source,
    })
}
