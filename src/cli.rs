use clap::{Args, Parser, Subcommand};
use oxidized_ash::config::ExecutionStrategy;
use oxidized_ash::orchestrator::Phase;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "oxidized-ash",
    version,
    about = "Security scan orchestration with pluggable scanners"
)]
pub struct Cli {
    /// Debug-level diagnostics on stderr (RUST_LOG overrides)
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan a source directory
    Scan(ScanArgs),

    /// Regenerate reports from a saved ash_aggregated_results.json
    Report {
        /// Output directory of a previous scan
        #[arg(long)]
        output_dir: PathBuf,

        /// Custom config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Check which external tools are available
    CheckTools,

    /// List registered plugins in execution order
    ListPlugins,
}

#[derive(Args)]
pub struct ScanArgs {
    /// Directory to scan
    pub source: PathBuf,

    /// Where reports and the aggregated results go [default: <source>/.ash/ash_output]
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Custom config file path
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Scanner scheduling strategy
    #[arg(long, value_enum)]
    pub strategy: Option<ExecutionStrategy>,

    /// Only run these scanners (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub scanners: Vec<String>,

    /// Never run these scanners (comma separated); wins over --scanners
    #[arg(long, value_delimiter = ',')]
    pub exclude_scanners: Vec<String>,

    /// Only run plugins that need no external tools
    #[arg(long)]
    pub native_only: bool,

    /// Report every finding as actionable
    #[arg(long)]
    pub ignore_suppressions: bool,

    /// Keep scanners off the network
    #[arg(long)]
    pub offline: bool,

    /// Phases to run (comma separated), always in pipeline order
    #[arg(long, value_enum, value_delimiter = ',', default_values_t = Phase::DEFAULT)]
    pub phases: Vec<Phase>,

    /// Skip CONVERT and SCAN and start from this saved report
    #[arg(long)]
    pub existing_results: Option<PathBuf>,

    /// Exit 0 even when actionable findings remain
    #[arg(long)]
    pub no_fail_on_findings: bool,
}
