//! Per-plugin execution lifecycle.
//!
//! Every scanner invocation goes through the same four steps:
//!
//! 1. **pre-check**: dependencies present, target exists and has matching files.
//! 2. **execute**: the plugin's `scan`, timed and bounded by the operation timeout.
//! 3. **wrap**: native output adapted into findings on a [`ScanResultContainer`].
//! 4. **post-check**: the plugin's `cleanup`, run by a drop guard on every exit path.
//!
//! The in-flight slot and the cleanup guard travel with the scan worker, so a
//! scan abandoned on timeout keeps its slot and defers cleanup until the
//! worker actually returns.
//!
//! Execution failures land on the container. Only a [`ScannerError`] is
//! returned to the caller.

use crate::aggregate::AggregatedReport;
use crate::context::ExecutionContext;
use crate::error::{ExecutionError, ScannerError};
use crate::events::{EventBus, EventType};
use crate::finding::{ScanResultContainer, ScannerStatus, SeverityCounts, TargetType};
use crate::plugins::{ConverterPlugin, ReporterPlugin, ScannerPlugin};
use chrono::Utc;
use serde_json::json;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// No operation is ever given less time than this.
pub const MIN_OPERATION_TIMEOUT: Duration = Duration::from_secs(2);

/// Raises `requested` to [`MIN_OPERATION_TIMEOUT`] when below it.
pub fn effective_timeout(requested: Duration) -> Duration {
    requested.max(MIN_OPERATION_TIMEOUT)
}

/// Result of the pre-check step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreCheck {
    Ready,
    /// Nothing to scan; not an error.
    Skip(String),
    /// A required tool is absent.
    MissingDependency(String),
}

/// Outcome of one converter invocation.
#[derive(Debug)]
pub struct ConversionOutcome {
    pub result: Result<Vec<PathBuf>, ExecutionError>,
    pub duration: Duration,
}

pub struct ExecutionEngine {
    ctx: Arc<ExecutionContext>,
    events: Arc<EventBus>,
    timeout: Duration,
    in_flight: Arc<Mutex<HashSet<(String, PathBuf)>>>,
}

impl ExecutionEngine {
    pub fn new(ctx: Arc<ExecutionContext>, events: Arc<EventBus>) -> Self {
        let timeout = effective_timeout(ctx.operation_timeout());
        ExecutionEngine {
            ctx,
            events,
            timeout,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Overrides the configured timeout. Still subject to the floor.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = effective_timeout(timeout);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Decides whether `plugin` should run against `target`.
    pub fn pre_check(&self, plugin: &dyn ScannerPlugin, target: &Path) -> PreCheck {
        if let Err(e) = plugin.validate() {
            return PreCheck::MissingDependency(e.to_string());
        }
        if !target.exists() {
            return PreCheck::Skip(format!("target does not exist: {}", target.display()));
        }
        if target.is_dir() {
            if self.ctx.target_files(target, |p| plugin.accepts(p)).is_empty() {
                return PreCheck::Skip("no matching files in target".to_string());
            }
        } else if !plugin.accepts(target) {
            return PreCheck::Skip("target file not handled by scanner".to_string());
        }
        PreCheck::Ready
    }

    /// Runs one scanner against one target through the full lifecycle.
    pub fn execute_scanner(
        &self,
        plugin: &Arc<dyn ScannerPlugin>,
        target: &Path,
        target_type: TargetType,
    ) -> Result<ScanResultContainer, ScannerError> {
        let name = plugin.descriptor().name;
        let slot = InFlightGuard::claim(&self.in_flight, &name, target)?;

        let mut container = ScanResultContainer::new(&name, target, target_type);
        match self.pre_check(plugin.as_ref(), target) {
            PreCheck::Ready => {}
            PreCheck::Skip(reason) => {
                tracing::debug!(scanner = %name, %reason, "skipping scan");
                container.status = ScannerStatus::Skipped;
                container.skip_reason = Some(reason);
                return Ok(container);
            }
            PreCheck::MissingDependency(reason) => {
                tracing::warn!(scanner = %name, %reason, "scanner dependencies missing");
                return Ok(ScanResultContainer::missing(&name, target, target_type, &reason));
            }
        }

        let scratch = self.ctx.scanner_dir(&name, target_type);
        std::fs::create_dir_all(&scratch).map_err(|e| ScannerError::Misconfigured {
            scanner: name.clone(),
            target: target.to_path_buf(),
            message: format!("cannot create {}: {e}", scratch.display()),
        })?;

        let cleanup = CleanupGuard {
            plugin: Arc::clone(plugin),
            target: target.to_path_buf(),
            target_type,
        };
        plugin.prepare(target, target_type)?;

        self.events.publish(
            EventType::ScanStart,
            json!({
                "scanner": name,
                "target": target.display().to_string(),
                "target_type": target_type,
            }),
        );

        let started = Instant::now();
        container.start_time = Some(Utc::now());
        let runner = Arc::clone(plugin);
        let scan_target = target.to_path_buf();
        let outcome = self.run_bounded(&format!("{name} scan"), move || {
            // Dropped in reverse order: cleanup runs before the slot frees.
            let _slot = slot;
            let _cleanup = cleanup;
            runner.scan(&scan_target, target_type)
        });
        container.end_time = Some(Utc::now());
        container.duration_secs = Some(started.elapsed().as_secs_f64());

        match outcome {
            Ok(raw) => self.wrap(plugin.as_ref(), &mut container, raw),
            Err(e) => {
                tracing::warn!(scanner = %name, error = %e, "scan failed");
                container.status = ScannerStatus::Error;
                container.exception = Some(e.to_string());
                container.cause_chain = e.cause_chain();
                container.errors.push(e.to_string());
                self.events.publish(
                    EventType::Error,
                    json!({"scanner": name, "message": e.to_string()}),
                );
            }
        }

        self.events.publish(
            EventType::ScanComplete,
            json!({
                "scanner": name,
                "target_type": target_type,
                "status": container.status,
                "finding_count": container.findings.len(),
            }),
        );
        Ok(container)
    }

    /// Adapts native output onto `container` and sets its status.
    fn wrap(
        &self,
        plugin: &dyn ScannerPlugin,
        container: &mut ScanResultContainer,
        raw: serde_json::Value,
    ) {
        let name = container.scanner_name.clone();
        for entry in plugin.adapt(&raw) {
            match entry {
                Ok(mut finding) => {
                    if let Some(loc) = finding
                        .locations
                        .iter()
                        .find(|l| self.is_excluded_location(&container.target, &l.uri))
                    {
                        tracing::debug!(scanner = %name, uri = %loc.uri, "dropping finding in excluded path");
                        continue;
                    }
                    for loc in &mut finding.locations {
                        loc.relativize(&container.target);
                        loc.relativize(&self.ctx.source_dir);
                    }
                    container.findings.push(finding);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "dropping malformed result");
                    self.events.publish(
                        EventType::Warning,
                        json!({"scanner": name, "message": e.to_string()}),
                    );
                }
            }
        }
        container.severity_counts = SeverityCounts::from_findings(&container.findings);
        let threshold = self.ctx.config.threshold_for(&name);
        container.status = if container.severity_counts.at_or_above(threshold) > 0 {
            ScannerStatus::Failed
        } else {
            ScannerStatus::Passed
        };
        container.raw_results = Some(raw);
    }

    /// Whether a finding location reported for `target` falls in a path the
    /// scan must not cover.
    fn is_excluded_location(&self, target: &Path, uri: &str) -> bool {
        let path = Path::new(uri);
        let resolved = if path.is_absolute() {
            path.to_path_buf()
        } else if target.is_dir() {
            target.join(path)
        } else {
            target.parent().unwrap_or(target).join(path)
        };
        self.ctx.is_excluded(target, &resolved)
    }

    /// Runs a converter against the source directory.
    pub fn execute_converter(&self, plugin: &Arc<dyn ConverterPlugin>) -> ConversionOutcome {
        let name = plugin.descriptor().name;
        let runner = Arc::clone(plugin);
        let source = self.ctx.source_dir.clone();
        let started = Instant::now();
        let result = self.run_bounded(&format!("{name} convert"), move || runner.convert(&source));
        ConversionOutcome {
            result,
            duration: started.elapsed(),
        }
    }

    /// Renders one export of `model`.
    pub fn execute_reporter(
        &self,
        plugin: &Arc<dyn ReporterPlugin>,
        model: &Arc<AggregatedReport>,
    ) -> Result<String, ExecutionError> {
        let name = plugin.descriptor().name;
        let runner = Arc::clone(plugin);
        let model = Arc::clone(model);
        self.run_bounded(&format!("{name} report"), move || runner.report(&model))
    }

    /// Runs `op` on a worker thread, giving up after the timeout.
    ///
    /// A timed-out worker is detached; its eventual result is discarded.
    /// Panics are caught and reported as [`ExecutionError::Panicked`].
    fn run_bounded<T, F>(&self, operation: &str, op: F) -> Result<T, ExecutionError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, ExecutionError> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let label = operation.to_string();
        std::thread::Builder::new()
            .name(format!("ash-{label}"))
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(op)).unwrap_or_else(|payload| {
                    Err(ExecutionError::Panicked {
                        operation: label,
                        message: panic_message(payload.as_ref()),
                    })
                });
                let _ = tx.send(result);
            })?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(ExecutionError::Timeout {
                operation: operation.to_string(),
                seconds: self.timeout.as_secs(),
            }),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(ExecutionError::Other(format!(
                "{operation} worker exited without a result"
            ))),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Holds the (scanner, target) slot until the scan worker finishes.
struct InFlightGuard {
    set: Arc<Mutex<HashSet<(String, PathBuf)>>>,
    key: (String, PathBuf),
}

impl InFlightGuard {
    fn claim(
        set: &Arc<Mutex<HashSet<(String, PathBuf)>>>,
        scanner: &str,
        target: &Path,
    ) -> Result<Self, ScannerError> {
        let key = (scanner.to_string(), target.to_path_buf());
        let mut running = set.lock().unwrap_or_else(|e| e.into_inner());
        if !running.insert(key.clone()) {
            return Err(ScannerError::AlreadyRunning {
                scanner: scanner.to_string(),
                target: target.to_path_buf(),
            });
        }
        drop(running);
        Ok(InFlightGuard {
            set: Arc::clone(set),
            key,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut running = self.set.lock().unwrap_or_else(|e| e.into_inner());
        running.remove(&self.key);
    }
}

/// Calls the plugin's post-check when dropped.
struct CleanupGuard {
    plugin: Arc<dyn ScannerPlugin>,
    target: PathBuf,
    target_type: TargetType,
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        let plugin = self.plugin.as_ref();
        let (target, target_type) = (self.target.as_path(), self.target_type);
        if panic::catch_unwind(AssertUnwindSafe(|| plugin.cleanup(target, target_type))).is_err() {
            tracing::warn!(scanner = %plugin.descriptor().name, "cleanup panicked");
        }
    }
}
