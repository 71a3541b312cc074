//! # oxidized-ash
//!
//! Security scan orchestration: run a set of scanner plugins over a source
//! tree, fold their native output into one SARIF-shaped report, apply
//! suppressions and hand the result to reporters.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use oxidized_ash::config::Config;
//! use oxidized_ash::context::ExecutionContext;
//! use oxidized_ash::events::EventBus;
//! use oxidized_ash::orchestrator::{Orchestrator, Phase, RunOptions};
//! use oxidized_ash::plugins::manager::PluginManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load(None)?;
//! let ctx = ExecutionContext::builder("./my-project").config(config).build()?;
//! let manager = PluginManager::with_builtins(Arc::new(EventBus::new()));
//! let report = Orchestrator::new(ctx, manager, RunOptions::default()).execute(&Phase::DEFAULT)?;
//!
//! println!("{} actionable findings", report.summary().actionable);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! 1. **[`config`]**: TOML configuration, merged with CLI flags into an
//!    [`context::ExecutionContext`].
//! 2. **[`plugins`]**: the scanner / converter / reporter contract, the
//!    [`plugins::manager::PluginManager`] registry and the [`events`] bus.
//! 3. **[`engine`]**: runs one plugin invocation through
//!    pre-check → execute → wrap → post-check.
//! 4. **[`orchestrator`]**: the CONVERT → SCAN → REPORT → INSPECT pipeline,
//!    parallel or sequential.
//! 5. **[`aggregate`]**: the canonical report, persisted as
//!    `ash_aggregated_results.json`.
//! 6. **[`suppression`]**: glob and line-range rules that mark findings
//!    non-actionable without removing them.
//! 7. **[`scanners`]**, **[`converters`]**, **[`output`]**: built-in plugins.

pub mod aggregate;
pub mod config;
pub mod context;
pub mod converters;
pub mod engine;
pub mod error;
pub mod events;
pub mod finding;
pub mod logging;
pub mod orchestrator;
pub mod output;
pub mod plugins;
pub mod scanners;
pub mod suppression;
