//! Compiled plugin programs and the process-wide cache
//!
//! Plugin scripts are compiled once, when their ComponentPlugin is first
//! seen (and again on every change), into an immutable [`CompiledPlugin`].
//! Reconciliation only reads the cache; a reconcile pass never compiles.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use jsonschema::JSONSchema;
use rhai::AST;

#[cfg(test)]
use mockall::automock;

use crate::crd::{ComponentPlugin, ComponentPluginSpec, WorkloadType};
use crate::Error;

use super::runtime;
use super::PluginHook;

/// An immutable, executable plugin program
///
/// Hook support is discovered from the script itself: any top-level
/// function whose name matches a hook name is that hook's implementation.
pub struct CompiledPlugin {
    /// Plugin name, matching the ComponentPlugin it was compiled from
    pub name: String,
    pub(crate) ast: AST,
    hooks: HashSet<String>,
    workload_types: Option<HashSet<WorkloadType>>,
    config_schema: Option<JSONSchema>,
}

impl CompiledPlugin {
    /// Compile a plugin spec into an executable program
    ///
    /// Fails on script parse errors and on invalid configuration schemas;
    /// a plugin that fails to compile never enters the cache.
    pub fn compile(name: &str, spec: &ComponentPluginSpec) -> Result<Self, Error> {
        let engine = runtime::sandbox_engine();
        let ast = engine.compile(&spec.src).map_err(|e| {
            Error::plugin_config(format!("plugin {name} failed to compile: {e}"))
        })?;

        let hooks = ast
            .iter_functions()
            .map(|f| f.name.to_string())
            .collect::<HashSet<_>>();

        let config_schema = spec
            .config_schema
            .as_ref()
            .map(|schema| {
                JSONSchema::compile(schema).map_err(|e| {
                    Error::plugin_config(format!("plugin {name} has an invalid config schema: {e}"))
                })
            })
            .transpose()?;

        let workload_types = if spec.available_workload_types.is_empty() {
            None
        } else {
            Some(spec.available_workload_types.iter().copied().collect())
        };

        Ok(Self {
            name: name.to_string(),
            ast,
            hooks,
            workload_types,
            config_schema,
        })
    }

    /// Whether the script defines an implementation for the given hook
    pub fn supports_hook(&self, hook: PluginHook) -> bool {
        self.hooks.contains(hook.function_name())
    }

    /// Whether the script declares a filter function
    pub fn has_filter(&self) -> bool {
        self.hooks.contains(runtime::FILTER_FUNCTION)
    }

    /// Whether the plugin applies to Components of the given workload kind
    pub fn supports_workload(&self, workload_type: WorkloadType) -> bool {
        match &self.workload_types {
            None => true,
            Some(types) => types.contains(&workload_type),
        }
    }

    /// Validate a binding's configuration against the plugin's schema
    ///
    /// Plugins without a schema accept anything, including no
    /// configuration at all.
    pub fn validate_config(&self, config: Option<&serde_json::Value>) -> Result<(), Error> {
        let Some(schema) = &self.config_schema else {
            return Ok(());
        };

        let instance = config.cloned().unwrap_or(serde_json::Value::Null);
        if let Err(errors) = schema.validate(&instance) {
            let detail = errors
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(Error::plugin_config(format!(
                "configuration for plugin {} is invalid: {detail}",
                self.name
            )));
        }

        Ok(())
    }
}

/// Read access to compiled plugin programs
#[cfg_attr(test, automock)]
pub trait PluginLookup: Send + Sync {
    /// Fetch the compiled program with the given name
    fn get(&self, name: &str) -> Option<Arc<CompiledPlugin>>;
}

/// Process-wide cache of compiled plugin programs
///
/// Kept current by the ComponentPlugin watcher; reconcile passes only call
/// [`PluginLookup::get`].
#[derive(Default)]
pub struct PluginCache {
    plugins: DashMap<String, Arc<CompiledPlugin>>,
}

impl PluginCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile a ComponentPlugin and insert it, replacing any prior version
    pub fn compile_and_insert(&self, plugin: &ComponentPlugin) -> Result<(), Error> {
        let name = plugin
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| Error::validation("plugin has no name"))?;
        let compiled = CompiledPlugin::compile(name, &plugin.spec)?;
        self.plugins.insert(name.to_string(), Arc::new(compiled));
        Ok(())
    }

    /// Drop a plugin from the cache
    pub fn remove(&self, name: &str) {
        self.plugins.remove(name);
    }
}

impl PluginLookup for PluginCache {
    fn get(&self, name: &str) -> Option<Arc<CompiledPlugin>> {
        self.plugins.get(name).map(|entry| Arc::clone(entry.value()))
    }
}
