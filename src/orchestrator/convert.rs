use super::{Orchestrator, Phase};
use crate::aggregate::{ConverterStatusInfo, ResultAggregator};
use crate::events::EventType;
use crate::finding::ScannerStatus;
use crate::plugins::{PluginInstance, PluginKind};
use serde_json::json;

impl Orchestrator {
    /// Runs every enabled converter in registration order. A failing
    /// converter is recorded and the rest still run.
    pub(super) fn run_convert_phase(&self, aggregator: &ResultAggregator) {
        let events = self.events();
        events.publish(EventType::ConvertPhaseStart, json!({}));

        // output of converters disabled since the last run must not be scanned
        let converted = self.ctx.converted_dir();
        if let Err(e) = std::fs::remove_dir_all(&converted) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(dir = %converted.display(), error = %e, "cannot clear converted directory");
            }
        }

        let registrations = self.manager.discover(PluginKind::Converter);
        let total = registrations.len();
        for (i, registration) in registrations.into_iter().enumerate() {
            let descriptor = &registration.descriptor;
            let name = descriptor.name.as_str();

            let enabled = self.ctx.config.is_converter_enabled(name, descriptor.enabled)
                && !(self.options.native_only && !descriptor.native);
            let info = if !enabled {
                let mut info = ConverterStatusInfo::new(ScannerStatus::Skipped);
                info.excluded = true;
                info
            } else {
                self.convert_one(name, registration)
            };
            aggregator.record_converter(name, info);
            self.publish_progress(Phase::Convert, i + 1, total);
        }

        events.publish(EventType::ConvertPhaseComplete, json!({"converters": total}));
    }

    fn convert_one(
        &self,
        name: &str,
        registration: &crate::plugins::manager::Registration,
    ) -> ConverterStatusInfo {
        let events = self.events();
        let instance = match self.manager.instantiate(registration, &self.ctx) {
            Ok(instance) => instance,
            Err(e) => {
                tracing::error!(error = %e, "converter initialization failed");
                let mut info = ConverterStatusInfo::new(ScannerStatus::Error);
                info.errors.push(e.to_string());
                return info;
            }
        };
        if !self.manager.validate_dependencies(&instance) {
            let mut info = ConverterStatusInfo::new(ScannerStatus::Missing);
            info.dependencies_satisfied = false;
            return info;
        }
        let PluginInstance::Converter(plugin) = instance else {
            return ConverterStatusInfo::new(ScannerStatus::Error);
        };

        events.publish(EventType::ConvertStart, json!({"converter": name}));
        let outcome = self.engine.execute_converter(&plugin);
        let info = match outcome.result {
            Ok(mut paths) => {
                paths.sort();
                let mut info = ConverterStatusInfo::new(ScannerStatus::Passed);
                info.converted_paths = paths;
                info
            }
            Err(e) => {
                tracing::warn!(converter = name, error = %e, "conversion failed");
                events.publish(
                    EventType::Warning,
                    json!({"converter": name, "message": e.to_string()}),
                );
                let mut info = ConverterStatusInfo::new(ScannerStatus::Error);
                info.errors = e.cause_chain();
                info
            }
        };
        let info = ConverterStatusInfo {
            duration_secs: Some(outcome.duration.as_secs_f64()),
            ..info
        };
        events.publish(
            EventType::ConvertComplete,
            json!({
                "converter": name,
                "status": info.status,
                "converted": info.converted_paths.len(),
            }),
        );
        info
    }
}
