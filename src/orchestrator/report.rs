use super::{Orchestrator, Phase};
use crate::aggregate::ResultAggregator;
use crate::events::EventType;
use crate::plugins::{PluginInstance, PluginKind};
use serde_json::json;
use std::sync::Arc;

impl Orchestrator {
    /// Hands the finalized report to every enabled reporter and writes each
    /// export to `<output_dir>/reports/ash.<extension>`.
    pub(super) fn run_report_phase(&self, aggregator: &ResultAggregator) {
        let events = self.events();
        events.publish(EventType::ReportPhaseStart, json!({}));

        let reports_dir = self.ctx.reports_dir();
        if let Err(e) = std::fs::create_dir_all(&reports_dir) {
            tracing::error!(dir = %reports_dir.display(), error = %e, "cannot create reports directory");
            events.publish(EventType::Error, json!({"message": e.to_string()}));
            events.publish(EventType::ReportPhaseComplete, json!({"written": 0}));
            return;
        }

        let model = Arc::new(aggregator.snapshot());
        let registrations = self.manager.discover(PluginKind::Reporter);
        let total = registrations.len();
        let mut written = 0;

        for (i, registration) in registrations.into_iter().enumerate() {
            let name = registration.descriptor.name.as_str();
            if !self
                .ctx
                .config
                .is_reporter_enabled(name, registration.descriptor.enabled)
            {
                tracing::debug!(reporter = name, "reporter disabled");
                continue;
            }
            let plugin = match self.manager.instantiate(registration, &self.ctx) {
                Ok(PluginInstance::Reporter(plugin)) => plugin,
                Ok(_) => continue,
                Err(e) => {
                    tracing::error!(error = %e, "reporter initialization failed");
                    events.publish(
                        EventType::Warning,
                        json!({"reporter": name, "message": e.to_string()}),
                    );
                    continue;
                }
            };

            events.publish(EventType::ReportStart, json!({"reporter": name}));
            let path = reports_dir.join(format!("ash.{}", plugin.extension()));
            let result = self
                .engine
                .execute_reporter(&plugin, &model)
                .and_then(|content| std::fs::write(&path, content).map_err(Into::into));
            match &result {
                Ok(()) => {
                    written += 1;
                    tracing::info!(reporter = name, path = %path.display(), "wrote report");
                }
                Err(e) => {
                    tracing::warn!(reporter = name, error = %e, "reporter failed");
                    events.publish(
                        EventType::Warning,
                        json!({"reporter": name, "message": e.to_string()}),
                    );
                }
            }
            events.publish(
                EventType::ReportComplete,
                json!({
                    "reporter": name,
                    "path": path.display().to_string(),
                    "success": result.is_ok(),
                }),
            );
            self.publish_progress(Phase::Report, i + 1, total);
        }

        events.publish(EventType::ReportPhaseComplete, json!({"written": written}));
    }
}
