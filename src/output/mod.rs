//! Built-in reporter plugins.
//!
//! Each reporter renders the finalized [`AggregatedReport`] into one export,
//! written by the REPORT phase to `<output_dir>/reports/ash.<extension>`.
//!
//! | Reporter | Module | Extension | Use case |
//! |----------|--------|-----------|----------|
//! | `json` | [`json`] | `flat.json` | Automation / scripting |
//! | `sarif` | [`sarif`] | `sarif` | CI/CD integration |
//! | `text` | [`text`] | `summary.txt` | Human review |
//! | `unused-suppressions` | [`unused`] | `unused-suppressions.json` | Suppression hygiene |
//!
//! [`AggregatedReport`]: crate::aggregate::AggregatedReport

pub mod json;
pub mod sarif;
pub mod text;
pub mod unused;

use crate::plugins::manager::PluginManager;
use crate::plugins::PluginInstance;
use std::sync::Arc;

pub fn register(manager: &mut PluginManager) {
    manager.register(json::descriptor(), |_| {
        Ok(PluginInstance::Reporter(Arc::new(json::JsonReporter)))
    });
    manager.register(sarif::descriptor(), |_| {
        Ok(PluginInstance::Reporter(Arc::new(sarif::SarifReporter)))
    });
    manager.register(text::descriptor(), |_| {
        Ok(PluginInstance::Reporter(Arc::new(text::TextReporter)))
    });
    manager.register(unused::descriptor(), |_| {
        Ok(PluginInstance::Reporter(Arc::new(unused::UnusedSuppressionsReporter)))
    });
}
