//! Plugin extension pipeline
//!
//! Plugins are externally authored scripts extending reconciliation at
//! fixed hook points. A ComponentPlugin carries the script; bindings attach
//! it, with configuration, to Components. Scripts are compiled once into
//! the process-wide [`PluginCache`]; each reconcile pass runs the hooks of
//! every applicable binding against the object being produced.

mod cache;
mod runtime;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

pub use cache::{CompiledPlugin, PluginCache, PluginLookup};

#[cfg(test)]
pub use cache::MockPluginLookup;

use crate::crd::{Application, Component, ComponentPluginBinding};
use crate::Error;

/// Fixed extension points in a reconcile pass
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PluginHook {
    /// Runs after the pod template is fully materialized, before any
    /// workload object is built from it
    AfterPodTemplateGeneration,
    /// Runs on a server Component's Deployment immediately before it is
    /// written; other workload kinds have no pre-save hook
    BeforeWorkloadSave,
}

impl PluginHook {
    /// Name of the script function implementing this hook
    pub fn function_name(self) -> &'static str {
        match self {
            PluginHook::AfterPodTemplateGeneration => "after_pod_template_generation",
            PluginHook::BeforeWorkloadSave => "before_workload_save",
        }
    }
}

/// Runs the hooks of every binding applicable to one Component
pub struct PluginPipeline<'a> {
    plugins: &'a dyn PluginLookup,
    application: &'a Application,
    component: &'a Component,
    bindings: Vec<ComponentPluginBinding>,
}

impl<'a> PluginPipeline<'a> {
    /// Build a pipeline from the bindings of the Component's namespace
    ///
    /// Bindings are ordered by name so hook execution order is stable
    /// across passes.
    pub fn new(
        plugins: &'a dyn PluginLookup,
        application: &'a Application,
        component: &'a Component,
        mut bindings: Vec<ComponentPluginBinding>,
    ) -> Self {
        bindings.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Self {
            plugins,
            application,
            component,
            bindings,
        }
    }

    /// Run one hook across all applicable bindings, threading the subject
    /// through each
    ///
    /// Bindings that are disabled, being deleted, or bound to a different
    /// Component are skipped, as are plugins that do not implement the hook
    /// or do not cover the Component's workload kind. A plugin declaring a
    /// filter function gets it run first; a `false` verdict skips the hook
    /// for this binding. A binding naming a plugin absent from the cache
    /// fails the pass; so do configuration schema violations and script
    /// failures.
    pub fn run_hook<T>(&self, hook: PluginHook, subject: &mut T) -> Result<(), Error>
    where
        T: Serialize + DeserializeOwned,
    {
        let component_name = self.component.metadata.name.as_deref().unwrap_or_default();
        let application_name = self
            .application
            .metadata
            .name
            .as_deref()
            .unwrap_or_default();

        let component_snapshot = serde_json::to_value(self.component)
            .map_err(|e| Error::serialization(e.to_string()))?;
        let context = runtime::HookContext {
            application: application_name,
            component: &component_snapshot,
        };

        let mut current = serde_json::to_value(&*subject)
            .map_err(|e| Error::serialization(e.to_string()))?;
        let mut changed = false;

        for binding in &self.bindings {
            if binding.spec.is_disabled || binding.metadata.deletion_timestamp.is_some() {
                continue;
            }
            if !binding.spec.applies_to(component_name) {
                continue;
            }

            let plugin = self.plugins.get(&binding.spec.plugin_name).ok_or_else(|| {
                Error::plugin_config(format!(
                    "binding {} references plugin {} which is not compiled",
                    binding.metadata.name.as_deref().unwrap_or_default(),
                    binding.spec.plugin_name
                ))
            })?;

            if !plugin.supports_hook(hook) {
                continue;
            }
            if !plugin.supports_workload(self.component.spec.workload_type) {
                debug!(
                    plugin = %plugin.name,
                    workload_type = %self.component.spec.workload_type,
                    "plugin does not cover this workload kind, skipping"
                );
                continue;
            }

            plugin.validate_config(binding.spec.config.as_ref())?;

            if plugin.has_filter()
                && !runtime::invoke_filter(plugin.as_ref(), binding.spec.config.as_ref(), &context)?
            {
                debug!(plugin = %plugin.name, "filter declined this component, skipping");
                continue;
            }

            if let Some(mutated) = runtime::invoke(
                plugin.as_ref(),
                hook,
                binding.spec.config.as_ref(),
                &context,
                &current,
            )? {
                current = mutated;
                changed = true;
            }
        }

        if changed {
            *subject = serde_json::from_value(current)
                .map_err(|e| Error::serialization(e.to_string()))?;
        }

        Ok(())
    }
}
