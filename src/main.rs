mod cli;

use chrono::Utc;
use clap::Parser;
use cli::{Cli, Commands, ScanArgs};
use colored::Colorize;
use oxidized_ash::aggregate::AggregatedReport;
use oxidized_ash::config::Config;
use oxidized_ash::context::ExecutionContext;
use oxidized_ash::events::{EventBus, EventType};
use oxidized_ash::finding::ScannerStatus;
use oxidized_ash::orchestrator::{Orchestrator, Phase, RunOptions};
use oxidized_ash::plugins::manager::PluginManager;
use oxidized_ash::plugins::tool::which_exists;
use oxidized_ash::suppression::SuppressionEngine;
use oxidized_ash::{logging, output};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

/// Suppressions expiring within this many days are called out.
const EXPIRY_WARNING_DAYS: i64 = 30;

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let code = match cli.command {
        Commands::Scan(args) => scan(args),
        Commands::Report { output_dir, config } => report(output_dir, config),
        Commands::CheckTools => {
            check_tools();
            0
        }
        Commands::ListPlugins => {
            list_plugins();
            0
        }
    };
    std::process::exit(code);
}

fn load_config(path: Option<&std::path::Path>) -> Option<Config> {
    match Config::load(path) {
        Ok(config) => Some(config),
        Err(e) => {
            print_error(&e);
            None
        }
    }
}

fn warn_expiring_suppressions(config: &Config) {
    let today = Utc::now().date_naive();
    let engine = SuppressionEngine::new(&config.suppressions, false);
    for rule in engine.expiring_within(today, EXPIRY_WARNING_DAYS) {
        tracing::warn!(
            rule = %rule.reference(),
            expiration = ?rule.expiration,
            "suppression expires soon"
        );
    }
}

fn scan(args: ScanArgs) -> i32 {
    let Some(mut config) = load_config(args.config.as_deref()) else {
        return 1;
    };
    if args.no_fail_on_findings {
        config.fail_on_findings = false;
    }
    warn_expiring_suppressions(&config);

    let offline = args.offline || config.offline;
    let mut builder = ExecutionContext::builder(&args.source)
        .config(config.clone())
        .offline(offline)
        .ignore_suppressions(args.ignore_suppressions);
    if let Some(dir) = args.output_dir {
        builder = builder.output_dir(dir);
    }
    let ctx = match builder.build() {
        Ok(ctx) => ctx,
        Err(e) => {
            print_error(&e);
            return 1;
        }
    };

    let events = Arc::new(EventBus::new());
    events.subscribe(EventType::ScanComplete, |e| {
        eprintln!(
            "  {} {} ({}): {} findings",
            "scanned".dimmed(),
            e.get_str("scanner").unwrap_or("?"),
            e.get_str("target_type").unwrap_or("?"),
            e.payload.get("finding_count").and_then(|v| v.as_u64()).unwrap_or(0)
        );
        Ok(())
    });
    let manager = PluginManager::with_builtins(events);
    let options = RunOptions {
        strategy: args.strategy,
        enabled_scanners: args.scanners,
        excluded_scanners: args.exclude_scanners,
        native_only: args.native_only,
        existing_results: args.existing_results,
        ..RunOptions::default()
    };
    let orchestrator = Orchestrator::new(ctx, manager, options);
    let output_dir = orchestrator.context().output_dir.clone();

    match orchestrator.execute(&args.phases) {
        Ok(report) => finish(&report, &config, &output_dir),
        Err(e) => {
            print_error(&e);
            1
        }
    }
}

fn report(output_dir: PathBuf, config_path: Option<PathBuf>) -> i32 {
    let Some(config) = load_config(config_path.as_deref()) else {
        return 1;
    };
    let ctx = match ExecutionContext::builder(".")
        .config(config.clone())
        .output_dir(&output_dir)
        .build()
    {
        Ok(ctx) => ctx,
        Err(e) => {
            print_error(&e);
            return 1;
        }
    };
    let manager = PluginManager::with_builtins(Arc::new(EventBus::new()));
    let options = RunOptions {
        existing_results: Some(output_dir.clone()),
        ..RunOptions::default()
    };
    match Orchestrator::new(ctx, manager, options).execute(&[Phase::Report]) {
        Ok(report) => finish(&report, &config, &output_dir),
        Err(e) => {
            print_error(&e);
            1
        }
    }
}

fn print_error(err: &dyn std::error::Error) {
    eprintln!("{} {err}", "Error:".red().bold());
    let mut source = err.source();
    while let Some(cause) = source {
        eprintln!("  caused by: {cause}");
        source = cause.source();
    }
}

/// Prints the summary and maps the outcome to an exit code.
fn finish(report: &AggregatedReport, config: &Config, output_dir: &std::path::Path) -> i32 {
    print!("{}", output::text::render(report, std::io::stdout().is_terminal()));
    eprintln!("Reports written to {}", output_dir.join("reports").display());

    let failing = report
        .scanner_results
        .values()
        .any(|info| info.status == ScannerStatus::Failed);
    if failing && config.fail_on_findings {
        2
    } else {
        0
    }
}

fn check_tools() {
    println!("{}", "Tool Availability".bold().underline());
    println!();

    let manager = PluginManager::with_builtins(Arc::new(EventBus::new()));
    for registration in manager.all() {
        let descriptor = &registration.descriptor;
        let deps: Vec<_> = descriptor
            .dependencies
            .iter()
            .filter(|d| d.applies_here())
            .collect();
        let (status, detail) = if descriptor.native || deps.is_empty() {
            ("NATIVE".blue().bold().to_string(), "no external tools".to_string())
        } else {
            let missing: Vec<&str> = deps
                .iter()
                .filter(|d| !which_exists(&d.command))
                .map(|d| d.command.as_str())
                .collect();
            if missing.is_empty() {
                ("READY".green().bold().to_string(), descriptor.description.clone())
            } else {
                (
                    "NOT AVAILABLE".red().to_string(),
                    format!("missing: {}", missing.join(", ")),
                )
            }
        };
        println!(
            "  [{status}] {name:<22} {kind:<10} {detail}",
            name = descriptor.name,
            kind = descriptor.kind,
        );
    }

    println!();
    println!("Note: use --native-only to run only plugins that need no external tools.");
}

fn list_plugins() {
    let manager = PluginManager::with_builtins(Arc::new(EventBus::new()));
    println!("{}", "Registered Plugins".bold().underline());
    println!();
    for registration in manager.all() {
        let d = &registration.descriptor;
        let mut flags = Vec::new();
        if d.native {
            flags.push("native");
        }
        if !d.enabled {
            flags.push("disabled");
        }
        println!(
            "  {kind:<10} {name:<22} {desc} {flags}",
            kind = d.kind.to_string().dimmed(),
            name = d.name.bold(),
            desc = d.description,
            flags = if flags.is_empty() {
                String::new()
            } else {
                format!("[{}]", flags.join(", ")).dimmed().to_string()
            },
        );
    }
    println!();
    println!("  Total: {} plugins", manager.all().len());
}
