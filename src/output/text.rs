//! Human-readable text summary.
//!
//! Shows per-scanner statuses, active findings with locations, suppressed
//! items and a one-line result. The CLI prints the colored variant; the
//! exported `ash.summary.txt` is always plain.

use crate::aggregate::AggregatedReport;
use crate::error::ExecutionError;
use crate::finding::{ScannerStatus, Severity};
use crate::plugins::{Plugin, PluginDescriptor, PluginKind, ReporterPlugin};
use colored::{ColoredString, Colorize};

const NAME: &str = "text";

pub fn descriptor() -> PluginDescriptor {
    PluginDescriptor::new(NAME, PluginKind::Reporter, "Plain text summary").native()
}

pub struct TextReporter;

impl Plugin for TextReporter {
    fn descriptor(&self) -> PluginDescriptor {
        descriptor()
    }
}

impl ReporterPlugin for TextReporter {
    fn extension(&self) -> &str {
        "summary.txt"
    }

    fn report(&self, model: &AggregatedReport) -> Result<String, ExecutionError> {
        Ok(render(model, false))
    }
}

fn paint(text: &str, color: bool, style: impl Fn(&str) -> ColoredString) -> String {
    if color {
        style(text).to_string()
    } else {
        text.to_string()
    }
}

fn status_label(status: ScannerStatus, color: bool) -> String {
    match status {
        ScannerStatus::Passed => paint("PASS", color, |s| s.green().bold()),
        ScannerStatus::Failed => paint("FAIL", color, |s| s.red().bold()),
        ScannerStatus::Error => paint(" ERR", color, |s| s.red()),
        ScannerStatus::Missing => paint("MISS", color, |s| s.yellow()),
        ScannerStatus::Skipped => paint("SKIP", color, |s| s.dimmed()),
    }
}

fn severity_label(severity: Severity, color: bool) -> String {
    let label = format!("{severity:>8}");
    match severity {
        Severity::Critical => paint(&label, color, |s| s.red().bold()),
        Severity::High => paint(&label, color, |s| s.red()),
        Severity::Medium => paint(&label, color, |s| s.yellow()),
        Severity::Low => paint(&label, color, |s| s.blue()),
        Severity::Info => paint(&label, color, |s| s.dimmed()),
    }
}

/// Renders the summary, with ANSI colors when `color` is set.
///
/// Sections: header, scanners, findings, suppressed, result line.
pub fn render(model: &AggregatedReport, color: bool) -> String {
    let mut out = String::new();
    let meta = &model.metadata;
    let heading = |s: &str| paint(s, color, |s| s.bold().underline());

    out.push_str(&format!(
        "\n{}\n",
        paint(
            &format!("  ASH scan: {}  ", meta.project_name),
            color,
            |s| s.bold().on_blue().white()
        )
    ));
    out.push_str(&format!(
        "  Report: {}  Generated: {}\n\n",
        meta.report_id,
        meta.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));

    out.push_str(&format!("{}\n", heading("Scanners")));
    for (name, info) in &model.scanner_results {
        let detail = if info.status == ScannerStatus::Skipped {
            let reason = info
                .targets
                .values()
                .find_map(|t| t.skip_reason.as_deref())
                .unwrap_or("skipped");
            paint(reason, color, |s| s.dimmed())
        } else if let Some(err) = info.errors().next() {
            paint(err, color, |s| s.dimmed())
        } else {
            let count: usize = info.targets.values().map(|t| t.finding_count).sum();
            format!("{count} findings")
        };
        out.push_str(&format!(
            "  [{}] {name:<20} {detail}\n",
            status_label(info.status, color)
        ));
    }
    for (name, info) in &model.converter_results {
        out.push_str(&format!(
            "  [{}] {name:<20} {} converted (converter)\n",
            status_label(info.status, color),
            info.converted_paths.len()
        ));
    }
    out.push('\n');

    let mut active = model.active_findings().peekable();
    if active.peek().is_some() {
        out.push_str(&format!("{}\n", heading("Findings")));
        for finding in active {
            out.push_str(&format!(
                "  [{}] {:<25} {}\n",
                severity_label(finding.severity, color),
                paint(&format!("{}/{}", finding.scanner, finding.rule_id), color, |s| s.dimmed()),
                finding.message
            ));
            if let Some(loc) = finding.primary_location() {
                let at = match loc.start_line {
                    Some(line) => format!("{}:{line}", loc.uri),
                    None => loc.uri.clone(),
                };
                out.push_str(&format!("             {}\n", paint(&at, color, |s| s.dimmed())));
            }
        }
        out.push('\n');
    }

    let suppressed: Vec<_> = model.suppressed_findings().collect();
    if !suppressed.is_empty() {
        out.push_str(&format!(
            "{} ({} suppressed)\n",
            heading("Suppressed"),
            suppressed.len()
        ));
        for finding in suppressed {
            let reason = finding
                .suppressions
                .first()
                .map(|s| s.justification.as_str())
                .unwrap_or("no reason given");
            out.push_str(&format!(
                "  [SKIP] {:<25} {}\n",
                paint(&finding.rule_id, color, |s| s.dimmed()),
                paint(reason, color, |s| s.dimmed())
            ));
        }
        out.push('\n');
    }

    let summary = model.summary();
    let threshold = model
        .config
        .as_ref()
        .map(|c| c.severity_threshold)
        .unwrap_or(Severity::Medium);
    let actionable = model.actionable_count(threshold);
    let result = if actionable == 0 {
        paint("PASSED", color, |s| s.green().bold())
    } else {
        paint("FAILED", color, |s| s.red().bold())
    };
    out.push_str(&format!(
        "Result: {result}  |  {} critical, {} high, {} medium, {} low, {} info, {} suppressed, {actionable} actionable (>= {threshold})\n",
        summary.critical, summary.high, summary.medium, summary.low, summary.info, summary.suppressed,
    ));

    out
}
