use super::{Orchestrator, Phase};
use crate::aggregate::ResultAggregator;
use crate::config::ExecutionStrategy;
use crate::events::EventType;
use crate::finding::{ScanResultContainer, TargetType};
use crate::plugins::{PluginInstance, PluginKind, ScannerPlugin};
use rayon::prelude::*;
use serde_json::json;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// One (scanner, target) execution waiting to be scheduled.
struct ScanTask {
    scanner: String,
    plugin: Arc<dyn ScannerPlugin>,
    target: PathBuf,
    target_type: TargetType,
}

impl Orchestrator {
    pub(super) fn run_scan_phase(&self, aggregator: &ResultAggregator) {
        let events = self.events();
        events.publish(EventType::ScanPhaseStart, json!({"strategy": self.strategy()}));

        let tasks = self.plan_scan(aggregator);
        let total = tasks.len();
        let completed = AtomicUsize::new(0);

        let run_task = |task: &ScanTask| {
            let container = if self.cancel.is_cancelled() {
                ScanResultContainer::skipped(&task.scanner, &task.target, task.target_type, "cancelled")
            } else {
                match self
                    .engine
                    .execute_scanner(&task.plugin, &task.target, task.target_type)
                {
                    Ok(container) => container,
                    Err(e) => {
                        tracing::error!(scanner = %task.scanner, error = %e, "scanner could not start");
                        events.publish(
                            EventType::Error,
                            json!({"scanner": task.scanner, "message": e.to_string()}),
                        );
                        ScanResultContainer::errored(&task.scanner, &task.target, task.target_type, &e)
                    }
                }
            };
            aggregator.record_scan(container);
            let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
            self.publish_progress(Phase::Scan, done, total);
        };

        match self.strategy() {
            ExecutionStrategy::Sequential => tasks.iter().for_each(&run_task),
            ExecutionStrategy::Parallel => {
                match rayon::ThreadPoolBuilder::new()
                    .num_threads(self.max_workers())
                    .thread_name(|i| format!("ash-scan-{i}"))
                    .build()
                {
                    Ok(pool) => pool.install(|| tasks.par_iter().for_each(&run_task)),
                    Err(e) => {
                        tracing::warn!(error = %e, "worker pool unavailable, scanning sequentially");
                        tasks.iter().for_each(&run_task);
                    }
                }
            }
        }

        events.publish(
            EventType::ScanPhaseComplete,
            json!({"tasks": total, "cancelled": self.cancel.is_cancelled()}),
        );
    }

    /// Applies include/exclude and capability filters, recording the
    /// scanners that will not run, and returns the tasks for the rest.
    fn plan_scan(&self, aggregator: &ResultAggregator) -> Vec<ScanTask> {
        let config = &self.ctx.config;
        let excluded: BTreeSet<&str> = config
            .scanners
            .excluded
            .iter()
            .chain(&self.options.excluded_scanners)
            .map(String::as_str)
            .collect();
        let included: BTreeSet<&str> = config
            .scanners
            .enabled
            .iter()
            .chain(&self.options.enabled_scanners)
            .map(String::as_str)
            .collect();

        let converted_dir = self.ctx.converted_dir();
        let has_converted = converted_dir.is_dir()
            && !self.ctx.target_files(&converted_dir, |_| true).is_empty();
        let source = self.ctx.source_dir.clone();

        let mut tasks = Vec::new();
        for registration in self.manager.discover(PluginKind::Scanner) {
            let descriptor = &registration.descriptor;
            let name = descriptor.name.as_str();

            if excluded.contains(name) {
                aggregator.record_scan(ScanResultContainer::excluded(name, &source, "excluded"));
                continue;
            }
            if !included.is_empty() && !included.contains(name) {
                tracing::debug!(scanner = name, "not in include list");
                continue;
            }
            if !config.is_scanner_enabled(name, descriptor.enabled) {
                aggregator.record_scan(ScanResultContainer::excluded(
                    name,
                    &source,
                    "disabled in configuration",
                ));
                continue;
            }
            if self.options.native_only && !descriptor.native {
                aggregator.record_scan(ScanResultContainer::excluded(
                    name,
                    &source,
                    "requires external tools",
                ));
                continue;
            }

            let instance = match self.manager.instantiate(registration, &self.ctx) {
                Ok(instance) => instance,
                Err(e) => {
                    tracing::error!(error = %e, "scanner initialization failed");
                    self.events()
                        .publish(EventType::Error, json!({"scanner": name, "message": e.to_string()}));
                    aggregator.record_scan(ScanResultContainer::errored(
                        name,
                        &source,
                        TargetType::Source,
                        &e,
                    ));
                    continue;
                }
            };
            if !self.manager.validate_dependencies(&instance) {
                let reason = instance
                    .validate()
                    .err()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "dependencies not satisfied".to_string());
                aggregator.record_scan(ScanResultContainer::missing(
                    name,
                    &source,
                    TargetType::Source,
                    &reason,
                ));
                continue;
            }
            let PluginInstance::Scanner(plugin) = instance else {
                continue;
            };

            tasks.push(ScanTask {
                scanner: name.to_string(),
                plugin: Arc::clone(&plugin),
                target: source.clone(),
                target_type: TargetType::Source,
            });
            if has_converted {
                tasks.push(ScanTask {
                    scanner: name.to_string(),
                    plugin,
                    target: converted_dir.clone(),
                    target_type: TargetType::Converted,
                });
            }
        }
        tasks
    }
}
