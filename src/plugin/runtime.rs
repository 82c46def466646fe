//! Sandboxed script execution
//!
//! Every hook invocation gets a fresh engine and scope; nothing persists
//! between invocations except the compiled program itself. The engine is
//! hard-limited so a misbehaving script cannot stall a reconcile pass.

use rhai::serde::{from_dynamic, to_dynamic};
use rhai::{Dynamic, Engine, Scope};

use crate::Error;

use super::cache::CompiledPlugin;
use super::PluginHook;

/// Script function deciding whether the plugin applies to a Component
pub(crate) const FILTER_FUNCTION: &str = "component_filter";

const MAX_OPERATIONS: u64 = 100_000;
const MAX_CALL_LEVELS: usize = 32;
const MAX_EXPR_DEPTH: usize = 64;
const MAX_STRING_SIZE: usize = 1024 * 1024;
const MAX_COLLECTION_SIZE: usize = 10_000;

/// Read-only context a hook invocation exposes to scripts
pub(crate) struct HookContext<'a> {
    /// Parent Application name
    pub application: &'a str,
    /// Structural snapshot of the Component being reconciled
    pub component: &'a serde_json::Value,
}

/// Build an engine with the sandbox limits applied
///
/// Used both for compilation (so limits apply at parse time) and for every
/// invocation.
pub(crate) fn sandbox_engine() -> Engine {
    let mut engine = Engine::new();
    engine.set_max_operations(MAX_OPERATIONS);
    engine.set_max_call_levels(MAX_CALL_LEVELS);
    engine.set_max_expr_depths(MAX_EXPR_DEPTH, MAX_EXPR_DEPTH);
    engine.set_max_string_size(MAX_STRING_SIZE);
    engine.set_max_array_size(MAX_COLLECTION_SIZE);
    engine.set_max_map_size(MAX_COLLECTION_SIZE);
    engine.disable_symbol("eval");
    engine
}

/// Engine plus scope for one invocation, with the host API registered
///
/// Scripts read `config` from scope and may call `get_application_name()`
/// and `get_current_component()`; there is no write access to anything but
/// the passed descriptor.
fn invocation_engine(
    plugin: &CompiledPlugin,
    config: Option<&serde_json::Value>,
    context: &HookContext<'_>,
) -> Result<(Engine, Scope<'static>), Error> {
    let mut engine = sandbox_engine();

    let application = context.application.to_string();
    engine.register_fn("get_application_name", move || application.clone());

    let component_snapshot = to_dynamic(context.component).map_err(|e| {
        Error::plugin_execution(format!(
            "plugin {}: component not representable in script: {e}",
            plugin.name
        ))
    })?;
    engine.register_fn("get_current_component", move || component_snapshot.clone());

    let mut scope = Scope::new();
    let config_dynamic = match config {
        Some(value) => to_dynamic(value).map_err(|e| {
            Error::plugin_execution(format!(
                "plugin {}: configuration not representable in script: {e}",
                plugin.name
            ))
        })?,
        None => Dynamic::UNIT,
    };
    scope.push_constant_dynamic("config", config_dynamic);

    Ok((engine, scope))
}

/// Run a plugin's filter function for one Component
///
/// The filter receives the Component snapshot and must return a boolean;
/// anything else is a script defect and fails the pass.
pub(crate) fn invoke_filter(
    plugin: &CompiledPlugin,
    config: Option<&serde_json::Value>,
    context: &HookContext<'_>,
) -> Result<bool, Error> {
    let (engine, mut scope) = invocation_engine(plugin, config, context)?;

    let component_snapshot = to_dynamic(context.component).map_err(|e| {
        Error::plugin_execution(format!(
            "plugin {}: component not representable in script: {e}",
            plugin.name
        ))
    })?;

    let verdict: Dynamic = engine
        .call_fn(&mut scope, &plugin.ast, FILTER_FUNCTION, (component_snapshot,))
        .map_err(|e| {
            Error::plugin_execution(format!(
                "plugin {} filter failed: {e}",
                plugin.name
            ))
        })?;

    verdict.as_bool().map_err(|actual| {
        Error::plugin_execution(format!(
            "plugin {} filter returned {actual}, expected a boolean",
            plugin.name
        ))
    })
}

/// Run one hook of one plugin against a JSON subject
///
/// The hook function receives the subject as its only argument and returns
/// either the (possibly mutated) subject or unit to leave it unchanged;
/// `Ok(None)` means unchanged.
pub(crate) fn invoke(
    plugin: &CompiledPlugin,
    hook: PluginHook,
    config: Option<&serde_json::Value>,
    context: &HookContext<'_>,
    subject: &serde_json::Value,
) -> Result<Option<serde_json::Value>, Error> {
    let (engine, mut scope) = invocation_engine(plugin, config, context)?;

    let subject_dynamic = to_dynamic(subject).map_err(|e| {
        Error::plugin_execution(format!(
            "plugin {}: subject not representable in script: {e}",
            plugin.name
        ))
    })?;

    let result: Dynamic = engine
        .call_fn(&mut scope, &plugin.ast, hook.function_name(), (subject_dynamic,))
        .map_err(|e| {
            Error::plugin_execution(format!(
                "plugin {} hook {} failed: {e}",
                plugin.name,
                hook.function_name()
            ))
        })?;

    if result.is_unit() {
        return Ok(None);
    }

    let mutated = from_dynamic(&result).map_err(|e| {
        Error::plugin_execution(format!(
            "plugin {} hook {} returned an unusable value: {e}",
            plugin.name,
            hook.function_name()
        ))
    })?;
    Ok(Some(mutated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ComponentPluginSpec;

    fn compile(src: &str) -> CompiledPlugin {
        CompiledPlugin::compile(
            "test-plugin",
            &ComponentPluginSpec {
                src: src.to_string(),
                config_schema: None,
                available_workload_types: vec![],
            },
        )
        .unwrap()
    }

    fn component_snapshot() -> serde_json::Value {
        serde_json::json!({"name": "web", "workloadType": "server"})
    }

    // =========================================================================
    // Story: Hook Invocation Contract
    // =========================================================================

    #[test]
    fn story_returned_value_replaces_the_subject() {
        let plugin = compile(
            r#"
            fn before_workload_save(workload) {
                workload.replicas = 5;
                workload
            }
            "#,
        );

        let snapshot = component_snapshot();
        let context = HookContext {
            application: "shop",
            component: &snapshot,
        };
        let subject = serde_json::json!({"replicas": 1});
        let mutated = invoke(&plugin, PluginHook::BeforeWorkloadSave, None, &context, &subject)
            .unwrap()
            .unwrap();
        assert_eq!(mutated, serde_json::json!({"replicas": 5}));
    }

    #[test]
    fn story_unit_return_leaves_subject_unchanged() {
        let plugin = compile(
            r#"
            fn before_workload_save(workload) {
                ()
            }
            "#,
        );

        let snapshot = component_snapshot();
        let context = HookContext {
            application: "shop",
            component: &snapshot,
        };
        let subject = serde_json::json!({"replicas": 1});
        let result =
            invoke(&plugin, PluginHook::BeforeWorkloadSave, None, &context, &subject).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn story_config_and_host_api_are_available() {
        let plugin = compile(
            r#"
            fn before_workload_save(workload) {
                workload.owner = get_application_name() + "/" + get_current_component().name;
                workload.replicas = config.replicas;
                workload
            }
            "#,
        );

        let snapshot = component_snapshot();
        let context = HookContext {
            application: "shop",
            component: &snapshot,
        };
        let config = serde_json::json!({"replicas": 7});
        let subject = serde_json::json!({});
        let mutated = invoke(
            &plugin,
            PluginHook::BeforeWorkloadSave,
            Some(&config),
            &context,
            &subject,
        )
        .unwrap()
        .unwrap();

        assert_eq!(mutated["owner"], "shop/web");
        assert_eq!(mutated["replicas"], 7);
    }

    // =========================================================================
    // Story: Filter Verdicts
    // =========================================================================

    #[test]
    fn story_filter_verdict_is_returned() {
        let plugin = compile(
            r#"
            fn component_filter(component) {
                component.workloadType == "server"
            }
            "#,
        );

        let snapshot = component_snapshot();
        let context = HookContext {
            application: "shop",
            component: &snapshot,
        };
        assert!(invoke_filter(&plugin, None, &context).unwrap());

        let other = serde_json::json!({"name": "report", "workloadType": "cronjob"});
        let context = HookContext {
            application: "shop",
            component: &other,
        };
        assert!(!invoke_filter(&plugin, None, &context).unwrap());
    }

    #[test]
    fn story_non_boolean_filter_is_a_script_defect() {
        let plugin = compile(
            r#"
            fn component_filter(component) {
                "yes"
            }
            "#,
        );

        let snapshot = component_snapshot();
        let context = HookContext {
            application: "shop",
            component: &snapshot,
        };
        let err = invoke_filter(&plugin, None, &context).unwrap_err();
        assert!(matches!(err, Error::PluginExecution(_)));
        assert!(err.to_string().contains("expected a boolean"));
    }

    // =========================================================================
    // Story: Sandbox Limits
    // =========================================================================

    #[test]
    fn story_runaway_scripts_are_cut_off() {
        let plugin = compile(
            r#"
            fn before_workload_save(workload) {
                let x = 0;
                loop { x += 1; }
            }
            "#,
        );

        let snapshot = component_snapshot();
        let context = HookContext {
            application: "shop",
            component: &snapshot,
        };
        let err = invoke(
            &plugin,
            PluginHook::BeforeWorkloadSave,
            None,
            &context,
            &serde_json::json!({}),
        )
        .unwrap_err();
        assert!(matches!(err, Error::PluginExecution(_)));
    }

    #[test]
    fn story_script_errors_surface_as_execution_failures() {
        let plugin = compile(
            r#"
            fn before_workload_save(workload) {
                throw "refusing to save";
            }
            "#,
        );

        let snapshot = component_snapshot();
        let context = HookContext {
            application: "shop",
            component: &snapshot,
        };
        let err = invoke(
            &plugin,
            PluginHook::BeforeWorkloadSave,
            None,
            &context,
            &serde_json::json!({}),
        )
        .unwrap_err();
        assert!(err.to_string().contains("refusing to save"));
    }
}
