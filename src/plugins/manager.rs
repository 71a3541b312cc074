//! Plugin registry for a single run.
//!
//! The manager owns a factory map in registration order and the run's
//! [`EventBus`]. It is created per run, so nothing leaks between runs or
//! tests.

use super::{PluginDescriptor, PluginInstance, PluginKind};
use crate::context::ExecutionContext;
use crate::error::PluginInitializationError;
use crate::events::{EventBus, EventType};
use serde_json::json;
use std::sync::Arc;

/// Binds a registered plugin to a run context.
pub type PluginFactory = Arc<
    dyn Fn(&Arc<ExecutionContext>) -> Result<PluginInstance, PluginInitializationError>
        + Send
        + Sync,
>;

/// A descriptor and the factory that builds it.
#[derive(Clone)]
pub struct Registration {
    pub descriptor: PluginDescriptor,
    factory: PluginFactory,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

pub struct PluginManager {
    registrations: Vec<Registration>,
    events: Arc<EventBus>,
}

impl PluginManager {
    /// An empty registry publishing to `events`.
    pub fn new(events: Arc<EventBus>) -> Self {
        PluginManager {
            registrations: Vec::new(),
            events,
        }
    }

    /// A registry preloaded with every built-in plugin.
    pub fn with_builtins(events: Arc<EventBus>) -> Self {
        let mut manager = Self::new(events);
        crate::converters::register(&mut manager);
        crate::scanners::register(&mut manager);
        crate::output::register(&mut manager);
        manager
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Adds a plugin. A second registration of the same name and kind is
    /// ignored with a warning; returns whether the plugin was added.
    pub fn register<F>(&mut self, descriptor: PluginDescriptor, factory: F) -> bool
    where
        F: Fn(&Arc<ExecutionContext>) -> Result<PluginInstance, PluginInitializationError>
            + Send
            + Sync
            + 'static,
    {
        let duplicate = self
            .registrations
            .iter()
            .any(|r| r.descriptor.kind == descriptor.kind && r.descriptor.name == descriptor.name);
        if duplicate {
            tracing::warn!(
                plugin = %descriptor.name,
                kind = %descriptor.kind,
                "plugin already registered, ignoring duplicate"
            );
            return false;
        }
        tracing::debug!(plugin = %descriptor.name, kind = %descriptor.kind, "registered plugin");
        self.registrations.push(Registration {
            descriptor,
            factory: Arc::new(factory),
        });
        true
    }

    /// Registered plugins of `kind`, in registration order.
    pub fn discover(&self, kind: PluginKind) -> Vec<&Registration> {
        self.registrations
            .iter()
            .filter(|r| r.descriptor.kind == kind)
            .collect()
    }

    pub fn all(&self) -> &[Registration] {
        &self.registrations
    }

    pub fn find(&self, kind: PluginKind, name: &str) -> Option<&Registration> {
        self.registrations
            .iter()
            .find(|r| r.descriptor.kind == kind && r.descriptor.name == name)
    }

    /// Runs the plugin's factory against `ctx`.
    pub fn instantiate(
        &self,
        registration: &Registration,
        ctx: &Arc<ExecutionContext>,
    ) -> Result<PluginInstance, PluginInitializationError> {
        let instance = (registration.factory)(ctx)?;
        if instance.kind() != registration.descriptor.kind {
            return Err(PluginInitializationError {
                plugin: registration.descriptor.name.clone(),
                message: format!(
                    "factory built a {} but the plugin is registered as a {}",
                    instance.kind(),
                    registration.descriptor.kind
                ),
            });
        }
        Ok(instance)
    }

    /// Probes the plugin's external tools. A failure is logged and
    /// published as a WARNING; it never aborts the run.
    pub fn validate_dependencies(&self, plugin: &PluginInstance) -> bool {
        match plugin.validate() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "plugin dependencies not satisfied");
                self.events.publish(
                    EventType::Warning,
                    json!({
                        "plugin": e.plugin,
                        "missing_tool": e.tool,
                        "message": e.to_string(),
                    }),
                );
                false
            }
        }
    }
}
