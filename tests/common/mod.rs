//! Fake plugins and fixtures shared by the integration tests.

#![allow(dead_code)]

use oxidized_ash::config::Config;
use oxidized_ash::context::ExecutionContext;
use oxidized_ash::error::{AggregationError, ExecutionError};
use oxidized_ash::events::EventBus;
use oxidized_ash::finding::{Finding, Location, Severity, TargetType};
use oxidized_ash::plugins::manager::PluginManager;
use oxidized_ash::plugins::{
    Plugin, PluginDescriptor, PluginInstance, PluginKind, ScannerPlugin, ToolDependency,
};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// What a [`FakeScanner`] does when asked to scan.
#[derive(Clone)]
pub enum Behavior {
    /// Returns this native output.
    Emit(Value),
    Fail(String),
    Panic,
    /// Sleeps, then emits nothing.
    Sleep(Duration),
}

/// Scanner whose native output is `[{"rule", "severity", "file", "line"}]`.
pub struct FakeScanner {
    pub name: String,
    pub behavior: Behavior,
    /// Only files with this extension count as scannable, when set.
    pub extension: Option<String>,
    /// External command the scanner claims to need; none makes it native.
    pub requires: Option<String>,
    pub cleanups: Arc<AtomicUsize>,
}

impl FakeScanner {
    pub fn emitting(name: &str, native: Value) -> Self {
        FakeScanner {
            name: name.to_string(),
            behavior: Behavior::Emit(native),
            extension: None,
            requires: None,
            cleanups: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn clean(name: &str) -> Self {
        Self::emitting(name, json!([]))
    }

    pub fn with(name: &str, behavior: Behavior) -> Self {
        FakeScanner {
            behavior,
            ..Self::clean(name)
        }
    }

    pub fn only(mut self, extension: &str) -> Self {
        self.extension = Some(extension.to_string());
        self
    }

    pub fn requiring(mut self, command: &str) -> Self {
        self.requires = Some(command.to_string());
        self
    }
}

impl Plugin for FakeScanner {
    fn descriptor(&self) -> PluginDescriptor {
        let descriptor = PluginDescriptor::new(&self.name, PluginKind::Scanner, "fake scanner");
        match &self.requires {
            Some(command) => descriptor.requires(ToolDependency::new(command)),
            None => descriptor.native(),
        }
    }
}

impl ScannerPlugin for FakeScanner {
    fn accepts(&self, path: &Path) -> bool {
        match &self.extension {
            Some(ext) => path.extension().is_some_and(|e| e == ext.as_str()),
            None => true,
        }
    }

    fn scan(&self, _target: &Path, _target_type: TargetType) -> Result<Value, ExecutionError> {
        match &self.behavior {
            Behavior::Emit(v) => Ok(v.clone()),
            Behavior::Fail(msg) => Err(ExecutionError::Other(msg.clone())),
            Behavior::Panic => panic!("{} blew up", self.name),
            Behavior::Sleep(d) => {
                std::thread::sleep(*d);
                Ok(json!([]))
            }
        }
    }

    fn adapt(&self, native: &Value) -> Vec<Result<Finding, AggregationError>> {
        native
            .as_array()
            .map(Vec::as_slice)
            .unwrap_or(&[])
            .iter()
            .map(|item| {
                let rule = item["rule"]
                    .as_str()
                    .ok_or_else(|| AggregationError::new(&self.name, "no rule"))?;
                let severity = Severity::normalize(item["severity"].as_str(), &self.name);
                let mut location = Location::new(item["file"].as_str().unwrap_or("unknown"));
                if let Some(line) = item["line"].as_u64() {
                    location = location.lines(Some(line as u32), None);
                }
                Ok(Finding::new(&self.name, rule, severity, format!("{rule} found")).at(location))
            })
            .collect()
    }

    fn cleanup(&self, _target: &Path, _target_type: TargetType) {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
    }
}

/// Native output with one finding per `(rule, severity, file, line)`.
pub fn native(items: &[(&str, &str, &str, u64)]) -> Value {
    Value::Array(
        items
            .iter()
            .map(|(rule, severity, file, line)| {
                json!({"rule": rule, "severity": severity, "file": file, "line": line})
            })
            .collect(),
    )
}

/// A registry holding `scanners` plus the built-in reporters.
pub fn manager_with(scanners: Vec<FakeScanner>) -> PluginManager {
    manager_on(Arc::new(EventBus::new()), scanners)
}

pub fn manager_on(events: Arc<EventBus>, scanners: Vec<FakeScanner>) -> PluginManager {
    let mut manager = PluginManager::new(events);
    for scanner in scanners {
        let scanner = Arc::new(scanner);
        let descriptor = scanner.descriptor();
        manager.register(descriptor, move |_| {
            Ok(PluginInstance::Scanner(Arc::clone(&scanner) as Arc<dyn ScannerPlugin>))
        });
    }
    oxidized_ash::output::register(&mut manager);
    manager
}

/// A source tree with one Python file and one Terraform file.
pub fn source_tree() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("app.py"), "import os\nos.system(cmd)\neval(x)\n").unwrap();
    std::fs::create_dir(dir.path().join("infra")).unwrap();
    std::fs::write(dir.path().join("infra/main.tf"), "resource \"aws_s3_bucket\" \"b\" {}\n").unwrap();
    dir
}

/// Context over `source`, writing into a fresh output directory.
pub fn context(source: &Path, config: Config) -> (TempDir, ExecutionContext) {
    let out = tempfile::tempdir().unwrap();
    let ctx = ExecutionContext::builder(source)
        .output_dir(out.path())
        .config(config)
        .build()
        .unwrap();
    (out, ctx)
}
