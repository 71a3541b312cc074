//! Plugin contract.
//!
//! Every plugin is one of three closed roles, captured by [`PluginInstance`]:
//!
//! | Role | Trait | Produces |
//! |------|-------|----------|
//! | scanner | [`ScannerPlugin`] | native output adapted into [`Finding`]s |
//! | converter | [`ConverterPlugin`] | extra files scanned as the `converted` target |
//! | reporter | [`ReporterPlugin`] | one rendered export of the aggregated report |
//!
//! Implementations are registered with the
//! [`PluginManager`](manager::PluginManager) as a descriptor plus a factory
//! that binds the plugin to a run's [`ExecutionContext`].
//!
//! # Implementing a scanner
//!
//! ```rust,ignore
//! use oxidized_ash::plugins::{Plugin, PluginDescriptor, PluginKind, ScannerPlugin};
//!
//! struct Noop;
//!
//! impl Plugin for Noop {
//!     fn descriptor(&self) -> PluginDescriptor {
//!         PluginDescriptor::new("noop", PluginKind::Scanner, "does nothing").native()
//!     }
//! }
//!
//! impl ScannerPlugin for Noop {
//!     fn scan(&self, _: &Path, _: TargetType) -> Result<serde_json::Value, ExecutionError> {
//!         Ok(serde_json::json!([]))
//!     }
//!     fn adapt(&self, _: &serde_json::Value) -> Vec<Result<Finding, AggregationError>> {
//!         Vec::new()
//!     }
//! }
//! ```

pub mod manager;
pub mod tool;

use crate::aggregate::AggregatedReport;
use crate::error::{AggregationError, DependencyError, ExecutionError, ScannerError};
use crate::finding::{Finding, TargetType};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    Scanner,
    Converter,
    Reporter,
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            PluginKind::Scanner => "scanner",
            PluginKind::Converter => "converter",
            PluginKind::Reporter => "reporter",
        })
    }
}

/// An external executable a plugin shells out to.
///
/// Empty `platforms` / `architectures` lists mean "everywhere".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolDependency {
    pub command: String,
    pub platforms: Vec<String>,
    pub architectures: Vec<String>,
}

impl ToolDependency {
    pub fn new(command: &str) -> Self {
        ToolDependency {
            command: command.to_string(),
            platforms: Vec::new(),
            architectures: Vec::new(),
        }
    }

    pub fn on_platforms(mut self, platforms: &[&str]) -> Self {
        self.platforms = platforms.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn on_architectures(mut self, arches: &[&str]) -> Self {
        self.architectures = arches.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Whether this dependency is required on the running host.
    pub fn applies_here(&self) -> bool {
        let os_ok = self.platforms.is_empty()
            || self.platforms.iter().any(|p| p == std::env::consts::OS);
        let arch_ok = self.architectures.is_empty()
            || self.architectures.iter().any(|a| a == std::env::consts::ARCH);
        os_ok && arch_ok
    }
}

/// Static facts about a plugin, fixed at registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDescriptor {
    pub name: String,
    pub kind: PluginKind,
    pub description: String,
    /// Enabled unless configuration says otherwise.
    pub enabled: bool,
    /// Runs entirely in-process, without external tools.
    pub native: bool,
    pub dependencies: Vec<ToolDependency>,
}

impl PluginDescriptor {
    pub fn new(name: &str, kind: PluginKind, description: &str) -> Self {
        PluginDescriptor {
            name: name.to_string(),
            kind,
            description: description.to_string(),
            enabled: true,
            native: false,
            dependencies: Vec::new(),
        }
    }

    pub fn native(mut self) -> Self {
        self.native = true;
        self
    }

    pub fn disabled_by_default(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn requires(mut self, dependency: ToolDependency) -> Self {
        self.dependencies.push(dependency);
        self
    }
}

/// Capabilities shared by every plugin role.
pub trait Plugin: Send + Sync {
    fn descriptor(&self) -> PluginDescriptor;

    /// Probes the external tools this plugin needs on this host.
    fn validate(&self) -> Result<(), DependencyError> {
        let descriptor = self.descriptor();
        for dep in descriptor.dependencies.iter().filter(|d| d.applies_here()) {
            if !tool::which_exists(&dep.command) {
                return Err(DependencyError {
                    plugin: descriptor.name.clone(),
                    tool: dep.command.clone(),
                });
            }
        }
        Ok(())
    }

    fn is_native(&self) -> bool {
        self.descriptor().native
    }
}

/// Produces findings for one target at a time.
pub trait ScannerPlugin: Plugin {
    /// File filter deciding whether a target has anything to scan.
    fn accepts(&self, _path: &Path) -> bool {
        true
    }

    /// Pre-execution setup. An error here is unrecoverable for this
    /// invocation and is the only failure the engine hands back.
    fn prepare(&self, _target: &Path, _target_type: TargetType) -> Result<(), ScannerError> {
        Ok(())
    }

    /// Runs the analysis and returns its native output.
    fn scan(&self, target: &Path, target_type: TargetType)
        -> Result<serde_json::Value, ExecutionError>;

    /// Maps native output to canonical findings. Malformed entries come back
    /// as errors and are dropped by the caller.
    fn adapt(&self, native: &serde_json::Value) -> Vec<Result<Finding, AggregationError>>;

    /// Always called after a scan attempt, whatever its outcome.
    fn cleanup(&self, _target: &Path, _target_type: TargetType) {}
}

/// Rewrites inputs into scannable files.
pub trait ConverterPlugin: Plugin {
    /// Returns the files written.
    fn convert(&self, target: &Path) -> Result<Vec<PathBuf>, ExecutionError>;
}

/// Renders the aggregated report into one export format.
pub trait ReporterPlugin: Plugin {
    /// File extension of the export, without the dot.
    fn extension(&self) -> &str;

    fn report(&self, model: &AggregatedReport) -> Result<String, ExecutionError>;
}

/// A plugin bound to a run context.
#[derive(Clone)]
pub enum PluginInstance {
    Scanner(Arc<dyn ScannerPlugin>),
    Converter(Arc<dyn ConverterPlugin>),
    Reporter(Arc<dyn ReporterPlugin>),
}

impl PluginInstance {
    pub fn kind(&self) -> PluginKind {
        match self {
            PluginInstance::Scanner(_) => PluginKind::Scanner,
            PluginInstance::Converter(_) => PluginKind::Converter,
            PluginInstance::Reporter(_) => PluginKind::Reporter,
        }
    }

    pub fn descriptor(&self) -> PluginDescriptor {
        match self {
            PluginInstance::Scanner(p) => p.descriptor(),
            PluginInstance::Converter(p) => p.descriptor(),
            PluginInstance::Reporter(p) => p.descriptor(),
        }
    }

    pub fn validate(&self) -> Result<(), DependencyError> {
        match self {
            PluginInstance::Scanner(p) => p.validate(),
            PluginInstance::Converter(p) => p.validate(),
            PluginInstance::Reporter(p) => p.validate(),
        }
    }
}

impl fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PluginInstance")
            .field(&self.kind())
            .field(&self.descriptor().name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_scoped_to_other_platform_does_not_apply() {
        let dep = ToolDependency::new("x").on_platforms(&["plan9"]);
        assert!(!dep.applies_here());
        assert!(ToolDependency::new("x").applies_here());
        assert!(!ToolDependency::new("x").on_architectures(&["pdp11"]).applies_here());
    }

    #[test]
    fn descriptor_builders_set_flags() {
        let d = PluginDescriptor::new("slow", PluginKind::Scanner, "")
            .disabled_by_default()
            .requires(ToolDependency::new("slowtool"));
        assert!(!d.enabled);
        assert!(!d.native);
        assert_eq!(d.dependencies.len(), 1);
        assert_eq!(format!("[{:<9}]", d.kind), "[scanner  ]");
    }

    struct NeedsMissingTool;

    impl Plugin for NeedsMissingTool {
        fn descriptor(&self) -> PluginDescriptor {
            PluginDescriptor::new("ghost", PluginKind::Scanner, "")
                .requires(ToolDependency::new("definitely-not-a-real-tool-ash"))
        }
    }

    #[test]
    fn default_validate_checks_path() {
        let err = NeedsMissingTool.validate().unwrap_err();
        assert_eq!(err.tool, "definitely-not-a-real-tool-ash");
    }
}
