//! Component Custom Resource Definition
//!
//! A Component is the desired-state description of one deployable workload:
//! image, ports, environment, volumes, probes, scheduling preferences, and
//! the workload kind selecting which concrete resource realizes it.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Probe;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The concrete workload kind realizing a Component
///
/// This is a closed set: dispatch over it is always an exhaustive `match`,
/// so adding a fifth kind is caught everywhere it matters at compile time.
/// Unknown kinds are rejected at admission by the generated CRD schema.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadType {
    /// Long-running service, realized as a Deployment
    #[default]
    Server,
    /// Scheduled job, realized as a CronJob
    Cronjob,
    /// One pod per eligible node, realized as a DaemonSet
    Daemonset,
    /// Stable per-pod identity, realized as a StatefulSet
    Statefulset,
}

impl WorkloadType {
    /// Every workload kind, for exhaustive sweeps over kinds
    pub const ALL: [WorkloadType; 4] = [
        WorkloadType::Server,
        WorkloadType::Cronjob,
        WorkloadType::Daemonset,
        WorkloadType::Statefulset,
    ];
}

impl std::fmt::Display for WorkloadType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkloadType::Server => "server",
            WorkloadType::Cronjob => "cronjob",
            WorkloadType::Daemonset => "daemonset",
            WorkloadType::Statefulset => "statefulset",
        };
        f.write_str(s)
    }
}

/// How an environment variable's value is resolved
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum EnvVarType {
    /// Value used as-is
    #[default]
    Static,
    /// Value is a key into the Application's shared env; absent entries are
    /// silently omitted
    External,
    /// Value is `<serviceName>/<portName>`, resolved to
    /// `<prefix><serviceName>.<namespace>:<port><suffix>`; dangling
    /// references fail the pass
    Linked,
}

/// One environment variable entry on a Component
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    /// Variable name
    pub name: String,

    /// Raw value; interpretation depends on `type`
    #[serde(default)]
    pub value: String,

    /// Resolution variant
    #[serde(rename = "type", default)]
    pub type_: EnvVarType,

    /// Prefix prepended to a resolved linked value
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prefix: String,

    /// Suffix appended to a resolved linked value
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub suffix: String,
}

/// One exposed port on a Component
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentPort {
    /// Port name, used by linked env references
    pub name: String,

    /// Port the container listens on
    pub container_port: i32,

    /// Port the Service exposes; defaults to `container_port` when zero
    #[serde(default)]
    pub service_port: i32,

    /// Protocol (TCP/UDP); orchestrator default when empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

/// Storage variant for a Component volume
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum VolumeType {
    /// Durable storage backed by a PersistentVolumeClaim
    #[default]
    PersistentVolumeClaim,
    /// Ephemeral scratch space on disk
    TemporaryDisk,
    /// Ephemeral scratch space in memory
    TemporaryMemory,
}

/// One volume declared on a Component
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentVolume {
    /// Mount path inside the container
    pub path: String,

    /// Storage variant
    #[serde(rename = "type", default)]
    pub type_: VolumeType,

    /// Requested size (persistent claims only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Quantity>,

    /// Storage class for the claim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,

    /// Explicit claim name; when empty the controller derives a
    /// deterministic name from (component, path) and persists it here
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub persistent_volume_claim_name: String,
}

/// Shared configuration files mounted from the namespace config tree
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentConfig {
    /// Directory the resolved files are mounted under
    pub mount_path: String,

    /// Paths into the shared config tree; directories are resolved
    /// recursively
    #[serde(default)]
    pub paths: Vec<String>,
}

/// Inline configuration mounted as a single file
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DirectConfig {
    /// Absolute file path the content is mounted at
    pub mount_file_path: String,

    /// File content
    #[serde(default)]
    pub content: String,
}

/// Pod co-location preference for a Component's own pods
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PodAffinityType {
    /// No preference
    #[default]
    None,
    /// Prefer co-locating pods on the same host
    PreferGather,
    /// Prefer spreading pods across hosts
    PreferFanout,
}

/// Specification for a Component
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "flotilla.dev",
    version = "v1alpha1",
    kind = "Component",
    plural = "components",
    shortname = "comp",
    namespaced,
    printcolumn = r#"{"name":"Kind","type":"string","jsonPath":".spec.workloadType"}"#,
    printcolumn = r#"{"name":"Image","type":"string","jsonPath":".spec.image"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    /// Container image
    pub image: String,

    /// Container entrypoint override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,

    /// Container arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,

    /// Workload kind realizing this Component
    #[serde(default)]
    pub workload_type: WorkloadType,

    /// Replica count for server workloads; `None` leaves the count to the
    /// orchestrator (or an external autoscaler)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Cron schedule, required for cronjob workloads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,

    /// Exposed ports; a Service exists iff at least one is declared
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ComponentPort>,

    /// Environment variables
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,

    /// Declared volumes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<ComponentVolume>,

    /// Shared configuration file mounts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub configs: Vec<ComponentConfig>,

    /// Inline configuration file mounts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub direct_configs: Vec<DirectConfig>,

    /// CPU request/limit; only applied when set and non-zero
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<Quantity>,

    /// Memory limit; only applied when set and non-zero
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<Quantity>,

    /// Readiness probe, copied verbatim to the container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness_probe: Option<Probe>,

    /// Liveness probe, copied verbatim to the container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness_probe: Option<Probe>,

    /// Required node placement: label -> value, ANDed across labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector_labels: BTreeMap<String, String>,

    /// Preferred co-location of this Component's own pods
    #[serde(default)]
    pub pod_affinity_type: PodAffinityType,

    /// Pod restart policy; cronjobs force `OnFailure` when unset or `Always`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<String>,

    /// Pod DNS policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_policy: Option<String>,

    /// Grace period before pod termination
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_grace_period_seconds: Option<i64>,
}

impl ComponentSpec {
    /// Validate the Component specification
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.image.is_empty() {
            return Err(crate::Error::validation("component image must not be empty"));
        }

        if self.workload_type == WorkloadType::Cronjob
            && self.schedule.as_deref().unwrap_or("").is_empty()
        {
            return Err(crate::Error::validation(
                "cronjob component requires a schedule",
            ));
        }

        Ok(())
    }
}

/// Check whether a resource quantity is absent, empty, or zero
///
/// Requests and limits are only populated for quantities explicitly set and
/// non-zero.
pub(crate) fn quantity_is_zero(quantity: &Quantity) -> bool {
    let raw = quantity.0.trim();
    raw.is_empty() || raw == "0" || raw.trim_end_matches(|c: char| c.is_alphabetic()) == "0"
}
