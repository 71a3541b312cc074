//! Phase pipeline.
//!
//! The [`Orchestrator`] drives CONVERT → SCAN → REPORT → INSPECT over one
//! [`ExecutionContext`]. Phases always run in pipeline order, whatever order
//! they were requested in. Plugin failures are recorded on the report and
//! never stop the pipeline; only a [`FatalConfigurationError`] escapes.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use oxidized_ash::context::ExecutionContext;
//! use oxidized_ash::events::EventBus;
//! use oxidized_ash::orchestrator::{Orchestrator, Phase, RunOptions};
//! use oxidized_ash::plugins::manager::PluginManager;
//!
//! let ctx = ExecutionContext::builder("./my-project").build()?;
//! let manager = PluginManager::with_builtins(Arc::new(EventBus::new()));
//! let orchestrator = Orchestrator::new(ctx, manager, RunOptions::default());
//! let report = orchestrator.execute(&[Phase::Convert, Phase::Scan, Phase::Report])?;
//! println!("{} actionable", report.summary().actionable);
//! # Ok::<(), oxidized_ash::error::FatalConfigurationError>(())
//! ```

mod convert;
pub mod inspect;
mod report;
mod scan;

use crate::aggregate::{AggregatedReport, ResultAggregator};
use crate::config::ExecutionStrategy;
use crate::context::ExecutionContext;
use crate::engine::ExecutionEngine;
use crate::error::FatalConfigurationError;
use crate::events::{EventBus, EventType};
use crate::plugins::manager::PluginManager;
use crate::suppression::SuppressionEngine;
use chrono::Utc;
use serde_json::json;
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// One pipeline stage. Declaration order is pipeline order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Convert,
    Scan,
    Report,
    Inspect,
}

impl Phase {
    /// Phases run when none are requested explicitly.
    pub const DEFAULT: [Phase; 3] = [Phase::Convert, Phase::Scan, Phase::Report];
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Convert => "convert",
            Phase::Scan => "scan",
            Phase::Report => "report",
            Phase::Inspect => "inspect",
        };
        f.write_str(s)
    }
}

/// De-duplicates `requested` and sorts it into pipeline order.
pub fn pipeline_order(requested: &[Phase]) -> Vec<Phase> {
    requested
        .iter()
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Per-invocation choices layered over the configuration.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Overrides `execution.strategy`.
    pub strategy: Option<ExecutionStrategy>,
    /// Overrides `execution.max_workers`.
    pub max_workers: Option<usize>,
    /// Added to `scanners.enabled`.
    pub enabled_scanners: Vec<String>,
    /// Added to `scanners.excluded`.
    pub excluded_scanners: Vec<String>,
    /// Only run plugins that need no external tools.
    pub native_only: bool,
    /// Start from a saved report and skip CONVERT and SCAN.
    pub existing_results: Option<PathBuf>,
}

/// Run-level cancellation flag.
///
/// Cancelling stops new scanner tasks from starting; tasks already running
/// finish and their results are kept.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A run started with [`Orchestrator::spawn`].
pub struct RunHandle {
    cancel: CancellationToken,
    handle: JoinHandle<Result<AggregatedReport, FatalConfigurationError>>,
}

impl RunHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Blocks until the run ends. `Err` only if the run thread panicked.
    pub fn wait(self) -> std::thread::Result<Result<AggregatedReport, FatalConfigurationError>> {
        self.handle.join()
    }
}

pub struct Orchestrator {
    ctx: Arc<ExecutionContext>,
    manager: PluginManager,
    engine: ExecutionEngine,
    options: RunOptions,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(ctx: ExecutionContext, manager: PluginManager, options: RunOptions) -> Self {
        let ctx = Arc::new(ctx);
        let engine = ExecutionEngine::new(Arc::clone(&ctx), Arc::clone(manager.events()));
        Orchestrator {
            ctx,
            manager,
            engine,
            options,
            cancel: CancellationToken::default(),
        }
    }

    /// Replaces the engine, e.g. to shorten its timeout.
    pub fn with_engine(mut self, engine: ExecutionEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.ctx
    }

    pub fn events(&self) -> &Arc<EventBus> {
        self.manager.events()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn strategy(&self) -> ExecutionStrategy {
        self.options
            .strategy
            .unwrap_or(self.ctx.config.execution.strategy)
    }

    pub fn max_workers(&self) -> usize {
        self.options
            .max_workers
            .unwrap_or_else(|| self.ctx.config.execution.resolved_max_workers())
            .max(1)
    }

    /// Runs the requested phases on a background thread.
    pub fn spawn(self, phases: Vec<Phase>) -> RunHandle {
        let cancel = self.cancel.clone();
        let handle = std::thread::spawn(move || self.execute(&phases));
        RunHandle { cancel, handle }
    }

    /// Runs the requested phases and returns the final report.
    ///
    /// # Errors
    ///
    /// Only when `existing_results` is set and cannot be loaded.
    pub fn execute(&self, phases: &[Phase]) -> Result<AggregatedReport, FatalConfigurationError> {
        let phases = pipeline_order(phases);
        let started = Utc::now();
        let events = self.events();

        events.publish(
            EventType::ExecutionStart,
            json!({
                "phases": phases,
                "source_dir": self.ctx.source_dir.display().to_string(),
                "output_dir": self.ctx.output_dir.display().to_string(),
                "strategy": self.strategy(),
            }),
        );

        let (initial, resumed) = match &self.options.existing_results {
            Some(path) => {
                let report = AggregatedReport::load_model(path).inspect_err(|e| {
                    events.publish(EventType::Error, json!({"message": e.to_string()}));
                })?;
                tracing::info!(path = %path.display(), "loaded existing results");
                (report, true)
            }
            None => (
                AggregatedReport::new(&self.ctx.config.project_name, Some(self.ctx.config.clone())),
                false,
            ),
        };
        let aggregator = ResultAggregator::new(initial);

        for phase in &phases {
            match phase {
                Phase::Convert | Phase::Scan if resumed => {
                    events.publish(
                        EventType::Info,
                        json!({
                            "phase": phase,
                            "message": format!("{phase} skipped: using existing results"),
                        }),
                    );
                }
                Phase::Convert => self.run_convert_phase(&aggregator),
                Phase::Scan => {
                    self.run_scan_phase(&aggregator);
                    self.finalize_findings(&aggregator);
                }
                Phase::Report => {
                    self.finalize_findings(&aggregator);
                    if !resumed {
                        aggregator.with_report(|r| r.stamp_times(started, Utc::now()));
                    }
                    self.run_report_phase(&aggregator);
                }
                Phase::Inspect => self.run_inspect_phase(&aggregator),
            }
        }

        let mut report = aggregator.into_report();
        if !resumed {
            report.stamp_times(started, Utc::now());
            if let Err(e) = report.save_model(&self.ctx.output_dir) {
                tracing::error!(error = %e, "failed to save aggregated results");
                events.publish(EventType::Error, json!({"message": e.to_string()}));
            }
        }

        events.publish(
            EventType::ExecutionComplete,
            json!({
                "total": report.summary().total,
                "actionable": report.summary().actionable,
                "suppressed": report.summary().suppressed,
                "cancelled": self.cancel.is_cancelled(),
            }),
        );
        Ok(report)
    }

    /// Applies suppressions and canonical ordering. Safe to call repeatedly.
    ///
    /// With `ignore_suppressions` set, annotations already on the findings
    /// (from a resumed model) are dropped too.
    fn finalize_findings(&self, aggregator: &ResultAggregator) {
        let engine =
            SuppressionEngine::new(&self.ctx.config.suppressions, self.ctx.ignore_suppressions);
        let ignore = self.ctx.ignore_suppressions;
        let outcome = aggregator.with_report(|r| {
            if ignore {
                let cleared = r.clear_suppressions();
                if cleared > 0 {
                    tracing::info!(cleared, "ignoring recorded suppressions");
                }
            }
            let outcome = r.apply_suppressions(&engine);
            r.finalize(&self.ctx.config);
            outcome
        });
        if outcome.newly_suppressed > 0 {
            tracing::info!(
                suppressed = outcome.newly_suppressed,
                rules = outcome.matched_rules.len(),
                "applied suppressions"
            );
        }
    }

    fn publish_progress(&self, phase: Phase, completed: usize, total: usize) {
        self.events().publish(
            EventType::ExecutionProgress,
            json!({"phase": phase, "completed": completed, "total": total}),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_are_deduplicated_into_pipeline_order() {
        let order = pipeline_order(&[Phase::Report, Phase::Scan, Phase::Report, Phase::Convert]);
        assert_eq!(order, vec![Phase::Convert, Phase::Scan, Phase::Report]);
        assert!(pipeline_order(&[]).is_empty());
    }

    #[test]
    fn cancellation_token_is_shared() {
        let a = CancellationToken::default();
        let b = a.clone();
        b.cancel();
        assert!(a.is_cancelled());
    }
}
