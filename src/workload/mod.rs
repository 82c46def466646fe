//! Workload materialization for Components
//!
//! This module turns a Component (plus its parent Application) into the
//! concrete Kubernetes resources realizing it:
//! - a pod template ([`Materializer`]) with resolved env, volumes, claims,
//!   mounted configuration, and scheduling preferences
//! - exactly one workload object per Component, chosen by workload kind
//! - an optional Service exposing the Component's declared ports
//!
//! Everything here recomputes the full desired state deterministically from
//! the Component spec; no diffing is performed, which is what makes
//! re-running a pass with no external change a no-op.

mod configs;
mod template;

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{
    DaemonSet, DaemonSetSpec, Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec,
};
use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec, JobSpec, JobTemplateSpec};
use k8s_openapi::api::core::v1::{PodTemplateSpec, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::Resource;

use crate::crd::{Application, Component, WorkloadType};
use crate::{Error, APPLICATION_LABEL, COMPONENT_LABEL};

pub use configs::{direct_config_entries, direct_config_key, encode_file_path};
pub use template::{pvc_name, Materializer};

/// Number of finished jobs a cronjob keeps for inspection
const CRONJOB_SUCCESS_HISTORY_LIMIT: i32 = 3;
/// Number of failed jobs a cronjob keeps for inspection
const CRONJOB_FAILED_HISTORY_LIMIT: i32 = 5;

/// The concrete orchestrator-level resource realizing a Component
///
/// Exactly one variant exists per workload kind; all dispatch over workload
/// kinds is an exhaustive `match` on this type or on
/// [`WorkloadType`](crate::crd::WorkloadType).
#[derive(Clone, Debug, PartialEq)]
pub enum WorkloadObject {
    /// Long-running service
    Server(Deployment),
    /// Scheduled job
    CronJob(CronJob),
    /// One pod per eligible node
    DaemonSet(DaemonSet),
    /// Stable per-pod identity set
    StatefulSet(StatefulSet),
}

impl WorkloadObject {
    /// The workload kind of this object
    pub fn kind(&self) -> WorkloadType {
        match self {
            WorkloadObject::Server(_) => WorkloadType::Server,
            WorkloadObject::CronJob(_) => WorkloadType::Cronjob,
            WorkloadObject::DaemonSet(_) => WorkloadType::Daemonset,
            WorkloadObject::StatefulSet(_) => WorkloadType::Statefulset,
        }
    }

    /// The object's name
    pub fn name(&self) -> String {
        self.metadata().name.clone().unwrap_or_default()
    }

    /// The object's namespace
    pub fn namespace(&self) -> String {
        self.metadata().namespace.clone().unwrap_or_default()
    }

    fn metadata(&self) -> &ObjectMeta {
        match self {
            WorkloadObject::Server(d) => &d.metadata,
            WorkloadObject::CronJob(c) => &c.metadata,
            WorkloadObject::DaemonSet(d) => &d.metadata,
            WorkloadObject::StatefulSet(s) => &s.metadata,
        }
    }
}

/// Label set stamped on every produced object
///
/// The same set is used as the Service selector and as the pod template's
/// own labels, which is what ties Services to the pods they expose.
pub fn component_labels(application: &str, component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (APPLICATION_LABEL.to_string(), application.to_string()),
        (COMPONENT_LABEL.to_string(), component.to_string()),
    ])
}

/// Owner references tying a produced object to its Component
///
/// Owner references enable orchestrator-level garbage collection when a
/// Component is deleted directly. Empty when the Component has no uid yet
/// (only the case in tests).
pub fn owner_references(component: &Component) -> Option<Vec<OwnerReference>> {
    component.controller_owner_ref(&()).map(|r| vec![r])
}

/// Object metadata shared by every produced resource
fn object_meta(component: &Component, application: &Application) -> ObjectMeta {
    ObjectMeta {
        name: component.metadata.name.clone(),
        namespace: component.metadata.namespace.clone(),
        labels: Some(component_labels(
            application.metadata.name.as_deref().unwrap_or_default(),
            component.metadata.name.as_deref().unwrap_or_default(),
        )),
        owner_references: owner_references(component),
        ..Default::default()
    }
}

// =============================================================================
// Service
// =============================================================================

/// Build the desired Service for a Component
///
/// Each declared port becomes one service port; a port with no explicit
/// service port exposes the container port directly.
pub fn desired_service(component: &Component, application: &Application) -> Service {
    let labels = component_labels(
        application.metadata.name.as_deref().unwrap_or_default(),
        component.metadata.name.as_deref().unwrap_or_default(),
    );

    let ports: Vec<ServicePort> = component
        .spec
        .ports
        .iter()
        .map(|port| {
            let service_port = if port.service_port == 0 {
                port.container_port
            } else {
                port.service_port
            };

            ServicePort {
                name: Some(port.name.clone()),
                port: service_port,
                target_port: Some(IntOrString::Int(port.container_port)),
                protocol: port.protocol.clone(),
                ..Default::default()
            }
        })
        .collect();

    Service {
        metadata: object_meta(component, application),
        spec: Some(ServiceSpec {
            selector: Some(labels),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    }
}

// =============================================================================
// Per-kind workload builders
// =============================================================================

/// Build the desired workload object for a Component's selected kind
///
/// The template is reused verbatim by every kind; kind-specific shaping
/// (replicas, schedule, restart policy) happens here.
pub fn desired_workload(
    component: &Component,
    application: &Application,
    template: PodTemplateSpec,
) -> Result<WorkloadObject, Error> {
    match component.spec.workload_type {
        WorkloadType::Server => Ok(WorkloadObject::Server(desired_deployment(
            component,
            application,
            template,
        ))),
        WorkloadType::Cronjob => Ok(WorkloadObject::CronJob(desired_cron_job(
            component,
            application,
            template,
        )?)),
        WorkloadType::Daemonset => Ok(WorkloadObject::DaemonSet(desired_daemon_set(
            component,
            application,
            template,
        ))),
        WorkloadType::Statefulset => Ok(WorkloadObject::StatefulSet(desired_stateful_set(
            component,
            application,
            template,
        ))),
    }
}

fn selector(component: &Component, application: &Application) -> LabelSelector {
    LabelSelector {
        match_labels: Some(component_labels(
            application.metadata.name.as_deref().unwrap_or_default(),
            component.metadata.name.as_deref().unwrap_or_default(),
        )),
        ..Default::default()
    }
}

/// Build the desired Deployment for a server Component
///
/// A `None` replica count is passed through: the count is then managed by
/// the orchestrator or an external autoscaler.
fn desired_deployment(
    component: &Component,
    application: &Application,
    template: PodTemplateSpec,
) -> Deployment {
    Deployment {
        metadata: object_meta(component, application),
        spec: Some(DeploymentSpec {
            replicas: component.spec.replicas,
            selector: selector(component, application),
            template,
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build the desired CronJob for a cronjob Component
///
/// The pod restart policy is forced to `OnFailure` when unset or `Always`,
/// since `Always` is invalid inside a Job.
fn desired_cron_job(
    component: &Component,
    application: &Application,
    mut template: PodTemplateSpec,
) -> Result<CronJob, Error> {
    let schedule = component
        .spec
        .schedule
        .clone()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::validation("cronjob component requires a schedule"))?;

    if let Some(spec) = template.spec.as_mut() {
        match spec.restart_policy.as_deref() {
            None | Some("Always") | Some("") => {
                spec.restart_policy = Some("OnFailure".to_string());
            }
            _ => {}
        }
    }

    Ok(CronJob {
        metadata: object_meta(component, application),
        spec: Some(CronJobSpec {
            schedule,
            job_template: JobTemplateSpec {
                spec: Some(JobSpec {
                    template,
                    ..Default::default()
                }),
                ..Default::default()
            },
            successful_jobs_history_limit: Some(CRONJOB_SUCCESS_HISTORY_LIMIT),
            failed_jobs_history_limit: Some(CRONJOB_FAILED_HISTORY_LIMIT),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Build the desired DaemonSet for a daemonset Component
///
/// One pod per eligible node; there is no replica concept.
fn desired_daemon_set(
    component: &Component,
    application: &Application,
    template: PodTemplateSpec,
) -> DaemonSet {
    DaemonSet {
        metadata: object_meta(component, application),
        spec: Some(DaemonSetSpec {
            selector: selector(component, application),
            template,
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build the desired StatefulSet for a statefulset Component
fn desired_stateful_set(
    component: &Component,
    application: &Application,
    template: PodTemplateSpec,
) -> StatefulSet {
    StatefulSet {
        metadata: object_meta(component, application),
        spec: Some(StatefulSetSpec {
            selector: selector(component, application),
            service_name: component.metadata.name.clone().unwrap_or_default(),
            template,
            ..Default::default()
        }),
        ..Default::default()
    }
}

// =============================================================================
// Tests
// =============================================================================
