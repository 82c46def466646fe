//! Application Custom Resource Definition
//!
//! An Application is a cluster-scoped logical grouping of Components. The
//! Application named after a Component's namespace is its parent; it carries
//! shared environment variables, an optional image pull secret, and the
//! active/inactive switch that gates all materialization.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::component::EnvVar;

/// Specification for an Application
///
/// Applications are created and updated by an external namespace-watching
/// collaborator; the Component reconciler only reads them.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "flotilla.dev",
    version = "v1alpha1",
    kind = "Application",
    plural = "applications",
    shortname = "app",
    namespaced = false,
    printcolumn = r#"{"name":"Active","type":"boolean","jsonPath":".spec.isActive"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    /// Whether the Application's Components should run
    ///
    /// An inactive Application runs nothing: reconciliation deletes every
    /// owned Service and workload object and stops.
    #[serde(default)]
    pub is_active: bool,

    /// Environment variables shared by all Components in the Application
    ///
    /// Components reference entries here with `external` typed env vars.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shared_env: Vec<EnvVar>,

    /// Name of the image pull secret applied to every pod template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_secret_name: Option<String>,
}

impl ApplicationSpec {
    /// Look up a shared env entry by name
    pub fn shared_env_entry(&self, name: &str) -> Option<&EnvVar> {
        self.shared_env.iter().find(|e| e.name == name)
    }
}
