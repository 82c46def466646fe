//! Plugin Custom Resource Definitions
//!
//! A ComponentPlugin carries an externally authored script plus the contract
//! it supports (hooks, workload kinds, configuration schema). A
//! ComponentPluginBinding attaches a plugin, with a JSON configuration, to
//! one named Component or to every Component in a namespace.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::component::WorkloadType;

/// Specification for a ComponentPlugin
///
/// Plugins are compiled out-of-band into the process-wide program cache; the
/// reconciler only reads compiled programs, never this CRD.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "flotilla.dev",
    version = "v1alpha1",
    kind = "ComponentPlugin",
    plural = "componentplugins",
    namespaced = false,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ComponentPluginSpec {
    /// Script source; hook functions are discovered from its definitions
    pub src: String,

    /// JSON schema the binding configuration must satisfy
    ///
    /// When present, every binding of this plugin must carry a configuration
    /// that validates against it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_schema: Option<serde_json::Value>,

    /// Workload kinds the plugin applies to; empty means all kinds
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub available_workload_types: Vec<WorkloadType>,
}

/// Specification for a ComponentPluginBinding
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "flotilla.dev",
    version = "v1alpha1",
    kind = "ComponentPluginBinding",
    plural = "componentpluginbindings",
    namespaced,
    printcolumn = r#"{"name":"Plugin","type":"string","jsonPath":".spec.pluginName"}"#,
    printcolumn = r#"{"name":"Disabled","type":"boolean","jsonPath":".spec.isDisabled"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ComponentPluginBindingSpec {
    /// Name of the bound ComponentPlugin
    pub plugin_name: String,

    /// Component the binding targets; `None` binds every Component in the
    /// binding's namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_name: Option<String>,

    /// Plugin configuration, validated against the plugin's schema
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,

    /// Disabled bindings never have their hooks invoked
    #[serde(default)]
    pub is_disabled: bool,
}

impl ComponentPluginBindingSpec {
    /// Whether this binding applies to the named Component
    pub fn applies_to(&self, component_name: &str) -> bool {
        match self.component_name.as_deref() {
            Some(bound) => bound == component_name,
            None => true,
        }
    }
}
