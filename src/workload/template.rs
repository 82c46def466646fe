//! Pod template materialization
//!
//! The [`Materializer`] turns a Component spec into the pod template every
//! workload kind shares: container, resolved environment, volumes with
//! their claims, config mounts, and scheduling preferences. Resolution is
//! read-mostly; the only write is creating a missing PersistentVolumeClaim.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Affinity, Container, ContainerPort, EmptyDirVolumeSource, EnvVar as PodEnvVar,
    LocalObjectReference, NodeAffinity, NodeSelector, NodeSelectorRequirement, NodeSelectorTerm,
    PersistentVolumeClaim, PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource,
    PodAffinity, PodAffinityTerm, PodAntiAffinity, PodSpec, PodTemplateSpec, ResourceRequirements,
    Volume, VolumeMount, VolumeResourceRequirements, WeightedPodAffinityTerm,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::crd::{quantity_is_zero, Application, Component, EnvVar, EnvVarType, PodAffinityType, VolumeType};
use crate::store::KubeStore;
use crate::{Error, CONFIG_FILES_MAP};

use super::{component_labels, configs};

const HOSTNAME_TOPOLOGY_KEY: &str = "kubernetes.io/hostname";

/// Short stable digest used in derived resource names
pub(crate) fn short_hash(input: &str) -> String {
    hex::encode(&Sha256::digest(input.as_bytes())[..8])
}

/// Deterministic claim name for a Component volume
///
/// Derived purely from (component name, mount path) so every pass resolves
/// the same claim; this is the only mechanism preventing claim duplication.
pub fn pvc_name(component: &str, path: &str) -> String {
    format!("{}-{}", component, short_hash(path))
}

/// Builds the pod template shared by every workload kind
pub struct Materializer<'a> {
    store: &'a dyn KubeStore,
    application: &'a Application,
    component: &'a Component,
}

impl<'a> Materializer<'a> {
    /// Create a materializer for one Component under its parent Application
    pub fn new(
        store: &'a dyn KubeStore,
        application: &'a Application,
        component: &'a Component,
    ) -> Self {
        Self {
            store,
            application,
            component,
        }
    }

    fn namespace(&self) -> &str {
        self.component.metadata.namespace.as_deref().unwrap_or_default()
    }

    fn component_name(&self) -> &str {
        self.component.metadata.name.as_deref().unwrap_or_default()
    }

    fn labels(&self) -> BTreeMap<String, String> {
        component_labels(
            self.application.metadata.name.as_deref().unwrap_or_default(),
            self.component_name(),
        )
    }

    /// Build the full pod template
    ///
    /// Also returns claim names derived for volumes that did not carry an
    /// explicit one, as (volume index, claim name) pairs; the caller
    /// persists them back onto the Component so later passes reuse them.
    pub async fn pod_template(
        &self,
    ) -> Result<(PodTemplateSpec, Vec<(usize, String)>), Error> {
        let spec = &self.component.spec;

        let env = self.resolve_env().await?;
        let (mut volumes, mut volume_mounts, derived_claims) = self.resolve_volumes().await?;

        if !spec.configs.is_empty() || !spec.direct_configs.is_empty() {
            let config_map = if spec.configs.is_empty() {
                None
            } else {
                self.store
                    .get_config_map(self.namespace(), CONFIG_FILES_MAP)
                    .await?
            };
            let (config_volumes, config_mounts) =
                configs::resolve_config_mounts(self.component, config_map.as_ref());
            volumes.extend(config_volumes);
            volume_mounts.extend(config_mounts);
        }

        let ports: Vec<ContainerPort> = spec
            .ports
            .iter()
            .map(|port| ContainerPort {
                name: Some(port.name.clone()),
                container_port: port.container_port,
                protocol: port.protocol.clone(),
                ..Default::default()
            })
            .collect();

        let container = Container {
            name: self.component_name().to_string(),
            image: Some(spec.image.clone()),
            command: spec.command.clone(),
            args: spec.args.clone(),
            env: (!env.is_empty()).then_some(env),
            ports: (!ports.is_empty()).then_some(ports),
            readiness_probe: spec.readiness_probe.clone(),
            liveness_probe: spec.liveness_probe.clone(),
            resources: self.resources(),
            volume_mounts: (!volume_mounts.is_empty()).then_some(volume_mounts),
            ..Default::default()
        };

        let pod_spec = PodSpec {
            containers: vec![container],
            volumes: (!volumes.is_empty()).then_some(volumes),
            affinity: self.affinity(),
            node_selector: None,
            restart_policy: spec.restart_policy.clone(),
            dns_policy: spec.dns_policy.clone(),
            termination_grace_period_seconds: spec.termination_grace_period_seconds,
            image_pull_secrets: self.application.spec.image_pull_secret_name.as_ref().map(
                |secret| {
                    vec![LocalObjectReference {
                        name: secret.clone(),
                    }]
                },
            ),
            ..Default::default()
        };

        let template = PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(self.labels()),
                ..Default::default()
            }),
            spec: Some(pod_spec),
        };

        Ok((template, derived_claims))
    }

    // =========================================================================
    // Environment
    // =========================================================================

    /// Resolve every env entry to a concrete value
    ///
    /// External entries with no matching shared entry are silently omitted;
    /// dangling linked references fail the pass.
    async fn resolve_env(&self) -> Result<Vec<PodEnvVar>, Error> {
        let mut resolved = Vec::with_capacity(self.component.spec.env.len());

        for entry in &self.component.spec.env {
            let value = match entry.type_ {
                EnvVarType::Static => Some(entry.value.clone()),
                EnvVarType::External => self.resolve_shared_env(&entry.value).await?,
                EnvVarType::Linked => Some(self.resolve_linked_env(entry).await?),
            };

            if let Some(value) = value {
                resolved.push(PodEnvVar {
                    name: entry.name.clone(),
                    value: Some(value),
                    ..Default::default()
                });
            } else {
                debug!(name = %entry.name, "shared env entry absent, omitting");
            }
        }

        Ok(resolved)
    }

    /// Look up an external entry in the Application's shared env
    ///
    /// The entry's value is the lookup key, not its name. Shared entries may
    /// themselves be linked, in which case they resolve with their own
    /// prefix and suffix.
    async fn resolve_shared_env(&self, key: &str) -> Result<Option<String>, Error> {
        match self.application.spec.shared_env_entry(key) {
            None => Ok(None),
            Some(shared) if shared.type_ == EnvVarType::Linked => {
                Ok(Some(self.resolve_linked_env(shared).await?))
            }
            Some(shared) => Ok(Some(shared.value.clone())),
        }
    }

    /// Resolve a `<serviceName>/<portName>` reference to a service address
    async fn resolve_linked_env(&self, entry: &EnvVar) -> Result<String, Error> {
        if entry.value.is_empty() {
            return Ok(String::new());
        }

        let (service_name, port_name) = entry.value.split_once('/').ok_or_else(|| {
            Error::validation(format!(
                "linked env {} must be <serviceName>/<portName>, got {:?}",
                entry.name, entry.value
            ))
        })?;
        if service_name.is_empty() || port_name.is_empty() || port_name.contains('/') {
            return Err(Error::validation(format!(
                "linked env {} must be <serviceName>/<portName>, got {:?}",
                entry.name, entry.value
            )));
        }

        let namespace = self.namespace();
        let service = self
            .store
            .get_service(namespace, service_name)
            .await?
            .ok_or_else(|| {
                Error::dependency_missing(format!(
                    "linked env {} references missing service {}/{}",
                    entry.name, namespace, service_name
                ))
            })?;

        let port = service
            .spec
            .as_ref()
            .and_then(|s| s.ports.as_ref())
            .and_then(|ports| {
                ports
                    .iter()
                    .find(|p| p.name.as_deref() == Some(port_name))
            })
            .ok_or_else(|| {
                Error::dependency_missing(format!(
                    "linked env {} references missing port {} on service {}/{}",
                    entry.name, port_name, namespace, service_name
                ))
            })?;

        Ok(format!(
            "{}{}.{}:{}{}",
            entry.prefix, service_name, namespace, port.port, entry.suffix
        ))
    }

    // =========================================================================
    // Volumes
    // =========================================================================

    /// Resolve declared volumes, creating any missing persistent claim
    async fn resolve_volumes(
        &self,
    ) -> Result<(Vec<Volume>, Vec<VolumeMount>, Vec<(usize, String)>), Error> {
        let mut volumes = Vec::new();
        let mut mounts = Vec::new();
        let mut derived_claims = Vec::new();

        for (index, volume) in self.component.spec.volumes.iter().enumerate() {
            let (name, source) = match volume.type_ {
                VolumeType::PersistentVolumeClaim => {
                    let claim_name = if volume.persistent_volume_claim_name.is_empty() {
                        let derived = pvc_name(self.component_name(), &volume.path);
                        derived_claims.push((index, derived.clone()));
                        derived
                    } else {
                        volume.persistent_volume_claim_name.clone()
                    };

                    self.ensure_claim(&claim_name, volume.size.as_ref(), volume.storage_class_name.clone())
                        .await?;

                    let source = Volume {
                        name: claim_name.clone(),
                        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                            claim_name: claim_name.clone(),
                            ..Default::default()
                        }),
                        ..Default::default()
                    };
                    (claim_name, source)
                }
                VolumeType::TemporaryDisk => {
                    let name = format!("scratch-{}", short_hash(&volume.path));
                    let source = Volume {
                        name: name.clone(),
                        empty_dir: Some(EmptyDirVolumeSource::default()),
                        ..Default::default()
                    };
                    (name, source)
                }
                VolumeType::TemporaryMemory => {
                    let name = format!("scratch-{}", short_hash(&volume.path));
                    let source = Volume {
                        name: name.clone(),
                        empty_dir: Some(EmptyDirVolumeSource {
                            medium: Some("Memory".to_string()),
                            ..Default::default()
                        }),
                        ..Default::default()
                    };
                    (name, source)
                }
            };

            volumes.push(source);
            mounts.push(VolumeMount {
                name,
                mount_path: volume.path.clone(),
                ..Default::default()
            });
        }

        Ok((volumes, mounts, derived_claims))
    }

    /// Create the claim when it does not exist yet; existing claims are
    /// reused untouched
    async fn ensure_claim(
        &self,
        claim_name: &str,
        size: Option<&Quantity>,
        storage_class_name: Option<String>,
    ) -> Result<(), Error> {
        if self
            .store
            .get_pvc(self.namespace(), claim_name)
            .await?
            .is_some()
        {
            return Ok(());
        }

        let size = size
            .filter(|q| !quantity_is_zero(q))
            .cloned()
            .ok_or_else(|| {
                Error::validation(format!(
                    "persistent volume backing claim {claim_name} requires a size"
                ))
            })?;

        let claim = PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(claim_name.to_string()),
                namespace: Some(self.namespace().to_string()),
                labels: Some(self.labels()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(BTreeMap::from([("storage".to_string(), size)])),
                    ..Default::default()
                }),
                storage_class_name,
                ..Default::default()
            }),
            ..Default::default()
        };

        self.store.create_pvc(&claim).await
    }

    // =========================================================================
    // Resources and scheduling
    // =========================================================================

    /// Requests/limits from the Component's cpu and memory quantities
    ///
    /// Unset or zero quantities are left entirely absent rather than pinned
    /// to zero.
    fn resources(&self) -> Option<ResourceRequirements> {
        let mut quantities = BTreeMap::new();
        if let Some(cpu) = self.component.spec.cpu.as_ref().filter(|q| !quantity_is_zero(q)) {
            quantities.insert("cpu".to_string(), cpu.clone());
        }
        if let Some(memory) = self
            .component
            .spec
            .memory
            .as_ref()
            .filter(|q| !quantity_is_zero(q))
        {
            quantities.insert("memory".to_string(), memory.clone());
        }

        if quantities.is_empty() {
            return None;
        }

        Some(ResourceRequirements {
            requests: Some(quantities.clone()),
            limits: Some(quantities),
            ..Default::default()
        })
    }

    /// Node placement and pod co-location preferences
    ///
    /// Node selector labels are required and ANDed: a node must match every
    /// label. Pod (anti-)affinity is always a weighted preference over
    /// hosts, never a hard constraint.
    fn affinity(&self) -> Option<Affinity> {
        let spec = &self.component.spec;

        let node_affinity = if spec.node_selector_labels.is_empty() {
            None
        } else {
            let match_expressions: Vec<NodeSelectorRequirement> = spec
                .node_selector_labels
                .iter()
                .map(|(label, value)| NodeSelectorRequirement {
                    key: label.clone(),
                    operator: "In".to_string(),
                    values: Some(vec![value.clone()]),
                })
                .collect();

            Some(NodeAffinity {
                required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                    node_selector_terms: vec![NodeSelectorTerm {
                        match_expressions: Some(match_expressions),
                        ..Default::default()
                    }],
                }),
                ..Default::default()
            })
        };

        let weighted_term = || WeightedPodAffinityTerm {
            weight: 1,
            pod_affinity_term: PodAffinityTerm {
                label_selector: Some(LabelSelector {
                    match_labels: Some(self.labels()),
                    ..Default::default()
                }),
                topology_key: HOSTNAME_TOPOLOGY_KEY.to_string(),
                ..Default::default()
            },
        };

        let (pod_affinity, pod_anti_affinity) = match spec.pod_affinity_type {
            PodAffinityType::None => (None, None),
            PodAffinityType::PreferGather => (
                Some(PodAffinity {
                    preferred_during_scheduling_ignored_during_execution: Some(vec![
                        weighted_term(),
                    ]),
                    ..Default::default()
                }),
                None,
            ),
            PodAffinityType::PreferFanout => (
                None,
                Some(PodAntiAffinity {
                    preferred_during_scheduling_ignored_during_execution: Some(vec![
                        weighted_term(),
                    ]),
                    ..Default::default()
                }),
            ),
        };

        if node_affinity.is_none() && pod_affinity.is_none() && pod_anti_affinity.is_none() {
            return None;
        }

        Some(Affinity {
            node_affinity,
            pod_affinity,
            pod_anti_affinity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        ApplicationSpec, ComponentSpec, ComponentVolume, EnvVar, EnvVarType, PodAffinityType,
        VolumeType,
    };
    use crate::store::MockKubeStore;
    use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
    use mockall::predicate::eq;

    fn make_application(spec: ApplicationSpec) -> Application {
        let mut app = Application::new("shop", spec);
        app.metadata.name = Some("shop".to_string());
        app
    }

    fn make_component(spec: ComponentSpec) -> Component {
        let mut component = Component::new("web", spec);
        component.metadata.name = Some("web".to_string());
        component.metadata.namespace = Some("shop".to_string());
        component
    }

    fn service_with_port(name: &str, namespace: &str, port_name: &str, port: i32) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                ports: Some(vec![ServicePort {
                    name: Some(port_name.to_string()),
                    port,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn env(name: &str, value: &str, type_: EnvVarType) -> EnvVar {
        EnvVar {
            name: name.into(),
            value: value.into(),
            type_,
            prefix: String::new(),
            suffix: String::new(),
        }
    }

    // =========================================================================
    // Story: Environment Resolution
    // =========================================================================

    #[tokio::test]
    async fn story_static_env_is_used_verbatim() {
        let store = MockKubeStore::new();
        let app = make_application(ApplicationSpec::default());
        let component = make_component(ComponentSpec {
            image: "nginx".into(),
            env: vec![env("LOG_LEVEL", "debug", EnvVarType::Static)],
            ..Default::default()
        });

        let materializer = Materializer::new(&store, &app, &component);
        let (template, _) = materializer.pod_template().await.unwrap();

        let container = &template.spec.unwrap().containers[0];
        let resolved = container.env.as_ref().unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].name, "LOG_LEVEL");
        assert_eq!(resolved[0].value.as_deref(), Some("debug"));
    }

    #[tokio::test]
    async fn story_linked_env_resolves_to_service_address() {
        let mut store = MockKubeStore::new();
        store
            .expect_get_service()
            .with(eq("shop"), eq("svc-a"))
            .returning(|_, _| Ok(Some(service_with_port("svc-a", "shop", "main", 9090))));

        let app = make_application(ApplicationSpec::default());
        let component = make_component(ComponentSpec {
            image: "nginx".into(),
            env: vec![EnvVar {
                name: "API".into(),
                value: "svc-a/main".into(),
                type_: EnvVarType::Linked,
                prefix: "http://".into(),
                suffix: "/api".into(),
            }],
            ..Default::default()
        });

        let materializer = Materializer::new(&store, &app, &component);
        let (template, _) = materializer.pod_template().await.unwrap();

        let container = &template.spec.unwrap().containers[0];
        let resolved = container.env.as_ref().unwrap();
        assert_eq!(resolved[0].value.as_deref(), Some("http://svc-a.shop:9090/api"));
    }

    #[tokio::test]
    async fn story_malformed_linked_env_fails_validation() {
        let store = MockKubeStore::new();
        let app = make_application(ApplicationSpec::default());
        let component = make_component(ComponentSpec {
            image: "nginx".into(),
            env: vec![env("API", "no-slash-here", EnvVarType::Linked)],
            ..Default::default()
        });

        let materializer = Materializer::new(&store, &app, &component);
        let err = materializer.pod_template().await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn story_linked_env_to_missing_service_is_dependency_missing() {
        let mut store = MockKubeStore::new();
        store.expect_get_service().returning(|_, _| Ok(None));

        let app = make_application(ApplicationSpec::default());
        let component = make_component(ComponentSpec {
            image: "nginx".into(),
            env: vec![env("API", "gone/main", EnvVarType::Linked)],
            ..Default::default()
        });

        let materializer = Materializer::new(&store, &app, &component);
        let err = materializer.pod_template().await.unwrap_err();
        assert!(matches!(err, Error::DependencyMissing(_)));
    }

    #[tokio::test]
    async fn story_linked_env_to_missing_port_is_dependency_missing() {
        let mut store = MockKubeStore::new();
        store
            .expect_get_service()
            .returning(|_, _| Ok(Some(service_with_port("svc-a", "shop", "main", 9090))));

        let app = make_application(ApplicationSpec::default());
        let component = make_component(ComponentSpec {
            image: "nginx".into(),
            env: vec![env("API", "svc-a/absent", EnvVarType::Linked)],
            ..Default::default()
        });

        let materializer = Materializer::new(&store, &app, &component);
        let err = materializer.pod_template().await.unwrap_err();
        assert!(matches!(err, Error::DependencyMissing(_)));
    }

    #[tokio::test]
    async fn story_absent_shared_env_is_silently_omitted() {
        let store = MockKubeStore::new();
        let app = make_application(ApplicationSpec::default());
        let component = make_component(ComponentSpec {
            image: "nginx".into(),
            env: vec![
                env("MISSING", "NOT_IN_SHARED_ENV", EnvVarType::External),
                env("KEPT", "x", EnvVarType::Static),
            ],
            ..Default::default()
        });

        let materializer = Materializer::new(&store, &app, &component);
        let (template, _) = materializer.pod_template().await.unwrap();

        let container = &template.spec.unwrap().containers[0];
        let resolved = container.env.as_ref().unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].name, "KEPT");
    }

    #[tokio::test]
    async fn story_external_env_looks_up_by_value_not_name() {
        let store = MockKubeStore::new();
        let app = make_application(ApplicationSpec {
            is_active: true,
            shared_env: vec![env("SHARED_DB", "postgres://db", EnvVarType::Static)],
            image_pull_secret_name: None,
        });
        let component = make_component(ComponentSpec {
            image: "nginx".into(),
            env: vec![env("DB", "SHARED_DB", EnvVarType::External)],
            ..Default::default()
        });

        let materializer = Materializer::new(&store, &app, &component);
        let (template, _) = materializer.pod_template().await.unwrap();

        let container = &template.spec.unwrap().containers[0];
        let resolved = container.env.as_ref().unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].name, "DB");
        assert_eq!(resolved[0].value.as_deref(), Some("postgres://db"));
    }

    #[tokio::test]
    async fn story_shared_env_may_itself_be_linked() {
        let mut store = MockKubeStore::new();
        store
            .expect_get_service()
            .with(eq("shop"), eq("db"))
            .returning(|_, _| Ok(Some(service_with_port("db", "shop", "pg", 5432))));

        let app = make_application(ApplicationSpec {
            is_active: true,
            shared_env: vec![EnvVar {
                name: "DB_URL".into(),
                value: "db/pg".into(),
                type_: EnvVarType::Linked,
                prefix: "postgres://".into(),
                suffix: String::new(),
            }],
            image_pull_secret_name: None,
        });
        let component = make_component(ComponentSpec {
            image: "nginx".into(),
            env: vec![env("DATABASE_URL", "DB_URL", EnvVarType::External)],
            ..Default::default()
        });

        let materializer = Materializer::new(&store, &app, &component);
        let (template, _) = materializer.pod_template().await.unwrap();

        let container = &template.spec.unwrap().containers[0];
        let resolved = container.env.as_ref().unwrap();
        assert_eq!(resolved[0].name, "DATABASE_URL");
        assert_eq!(resolved[0].value.as_deref(), Some("postgres://db.shop:5432"));
    }

    // =========================================================================
    // Story: Volume Resolution
    // =========================================================================

    #[tokio::test]
    async fn story_missing_claim_is_created_with_derived_name() {
        let expected = pvc_name("web", "/data");

        let mut store = MockKubeStore::new();
        store
            .expect_get_pvc()
            .with(eq("shop"), eq(expected.clone()))
            .returning(|_, _| Ok(None));
        store
            .expect_create_pvc()
            .times(1)
            .returning(|_| Ok(()))
            .withf(move |pvc| {
                let spec = pvc.spec.as_ref().unwrap();
                pvc.metadata.name.as_deref() == Some(pvc_name("web", "/data").as_str())
                    && spec
                        .resources
                        .as_ref()
                        .and_then(|r| r.requests.as_ref())
                        .and_then(|r| r.get("storage"))
                        == Some(&Quantity("1Gi".into()))
            });

        let app = make_application(ApplicationSpec::default());
        let component = make_component(ComponentSpec {
            image: "nginx".into(),
            volumes: vec![ComponentVolume {
                path: "/data".into(),
                type_: VolumeType::PersistentVolumeClaim,
                size: Some(Quantity("1Gi".into())),
                storage_class_name: None,
                persistent_volume_claim_name: String::new(),
            }],
            ..Default::default()
        });

        let materializer = Materializer::new(&store, &app, &component);
        let (template, derived) = materializer.pod_template().await.unwrap();

        assert_eq!(derived, vec![(0, expected.clone())]);

        let spec = template.spec.unwrap();
        let volumes = spec.volumes.as_ref().unwrap();
        assert_eq!(volumes[0].name, expected);
        assert_eq!(
            volumes[0]
                .persistent_volume_claim
                .as_ref()
                .unwrap()
                .claim_name,
            expected
        );
    }

    #[tokio::test]
    async fn story_existing_claim_is_reused_untouched() {
        let mut store = MockKubeStore::new();
        store
            .expect_get_pvc()
            .with(eq("shop"), eq("my-claim"))
            .returning(|_, _| Ok(Some(PersistentVolumeClaim::default())));
        store.expect_create_pvc().never();

        let app = make_application(ApplicationSpec::default());
        let component = make_component(ComponentSpec {
            image: "nginx".into(),
            volumes: vec![ComponentVolume {
                path: "/data".into(),
                type_: VolumeType::PersistentVolumeClaim,
                size: Some(Quantity("1Gi".into())),
                storage_class_name: None,
                persistent_volume_claim_name: "my-claim".into(),
            }],
            ..Default::default()
        });

        let materializer = Materializer::new(&store, &app, &component);
        let (_, derived) = materializer.pod_template().await.unwrap();

        // explicit claim names are never re-derived
        assert!(derived.is_empty());
    }

    #[tokio::test]
    async fn story_derived_claim_names_are_deterministic() {
        assert_eq!(pvc_name("web", "/data"), pvc_name("web", "/data"));
        assert_ne!(pvc_name("web", "/data"), pvc_name("web", "/cache"));
        assert_ne!(pvc_name("web", "/data"), pvc_name("worker", "/data"));
    }

    #[tokio::test]
    async fn story_temporary_volumes_become_scratch_space() {
        let store = MockKubeStore::new();
        let app = make_application(ApplicationSpec::default());
        let component = make_component(ComponentSpec {
            image: "nginx".into(),
            volumes: vec![
                ComponentVolume {
                    path: "/tmp/work".into(),
                    type_: VolumeType::TemporaryDisk,
                    ..Default::default()
                },
                ComponentVolume {
                    path: "/tmp/fast".into(),
                    type_: VolumeType::TemporaryMemory,
                    ..Default::default()
                },
            ],
            ..Default::default()
        });

        let materializer = Materializer::new(&store, &app, &component);
        let (template, derived) = materializer.pod_template().await.unwrap();
        assert!(derived.is_empty());

        let spec = template.spec.unwrap();
        let volumes = spec.volumes.as_ref().unwrap();
        assert!(volumes[0].empty_dir.as_ref().unwrap().medium.is_none());
        assert_eq!(
            volumes[1].empty_dir.as_ref().unwrap().medium.as_deref(),
            Some("Memory")
        );

        let mounts = spec.containers[0].volume_mounts.as_ref().unwrap();
        assert_eq!(mounts[0].mount_path, "/tmp/work");
        assert_eq!(mounts[1].mount_path, "/tmp/fast");
    }

    // =========================================================================
    // Story: Resources and Scheduling
    // =========================================================================

    #[tokio::test]
    async fn story_zero_quantities_leave_resources_absent() {
        let store = MockKubeStore::new();
        let app = make_application(ApplicationSpec::default());
        let component = make_component(ComponentSpec {
            image: "nginx".into(),
            cpu: Some(Quantity("0".into())),
            memory: None,
            ..Default::default()
        });

        let materializer = Materializer::new(&store, &app, &component);
        let (template, _) = materializer.pod_template().await.unwrap();
        assert!(template.spec.unwrap().containers[0].resources.is_none());
    }

    #[tokio::test]
    async fn story_cpu_and_memory_set_requests_and_limits() {
        let store = MockKubeStore::new();
        let app = make_application(ApplicationSpec::default());
        let component = make_component(ComponentSpec {
            image: "nginx".into(),
            cpu: Some(Quantity("100m".into())),
            memory: Some(Quantity("256Mi".into())),
            ..Default::default()
        });

        let materializer = Materializer::new(&store, &app, &component);
        let (template, _) = materializer.pod_template().await.unwrap();

        let spec = template.spec.unwrap();
        let resources = spec.containers[0].resources.as_ref().unwrap();
        let requests = resources.requests.as_ref().unwrap();
        let limits = resources.limits.as_ref().unwrap();
        assert_eq!(requests.get("cpu"), Some(&Quantity("100m".into())));
        assert_eq!(limits.get("memory"), Some(&Quantity("256Mi".into())));
    }

    #[tokio::test]
    async fn story_node_labels_are_anded_in_one_term() {
        let store = MockKubeStore::new();
        let app = make_application(ApplicationSpec::default());
        let component = make_component(ComponentSpec {
            image: "nginx".into(),
            node_selector_labels: BTreeMap::from([
                ("disk".to_string(), "ssd".to_string()),
                ("zone".to_string(), "a".to_string()),
            ]),
            ..Default::default()
        });

        let materializer = Materializer::new(&store, &app, &component);
        let (template, _) = materializer.pod_template().await.unwrap();

        let spec = template.spec.unwrap();
        let node_affinity = spec.affinity.as_ref().unwrap().node_affinity.as_ref().unwrap();
        let selector = node_affinity
            .required_during_scheduling_ignored_during_execution
            .as_ref()
            .unwrap();

        // one term with every label: a node must match all of them
        assert_eq!(selector.node_selector_terms.len(), 1);
        let expressions = selector.node_selector_terms[0]
            .match_expressions
            .as_ref()
            .unwrap();
        assert_eq!(expressions.len(), 2);
        assert!(expressions.iter().all(|e| e.operator == "In"));
    }

    #[tokio::test]
    async fn story_gather_and_fanout_are_weighted_preferences() {
        let store = MockKubeStore::new();
        let app = make_application(ApplicationSpec::default());

        let gather = make_component(ComponentSpec {
            image: "nginx".into(),
            pod_affinity_type: PodAffinityType::PreferGather,
            ..Default::default()
        });
        let materializer = Materializer::new(&store, &app, &gather);
        let (template, _) = materializer.pod_template().await.unwrap();
        let affinity = template.spec.unwrap().affinity.unwrap();
        let terms = affinity
            .pod_affinity
            .unwrap()
            .preferred_during_scheduling_ignored_during_execution
            .unwrap();
        assert!(affinity.pod_anti_affinity.is_none());
        assert_eq!(terms[0].weight, 1);
        assert_eq!(terms[0].pod_affinity_term.topology_key, HOSTNAME_TOPOLOGY_KEY);

        let fanout = make_component(ComponentSpec {
            image: "nginx".into(),
            pod_affinity_type: PodAffinityType::PreferFanout,
            ..Default::default()
        });
        let materializer = Materializer::new(&store, &app, &fanout);
        let (template, _) = materializer.pod_template().await.unwrap();
        let affinity = template.spec.unwrap().affinity.unwrap();
        assert!(affinity.pod_affinity.is_none());
        assert!(affinity.pod_anti_affinity.is_some());
    }

    // =========================================================================
    // Story: Pod-Level Passthrough
    // =========================================================================

    #[tokio::test]
    async fn story_pull_secret_and_pod_policies_are_applied() {
        let store = MockKubeStore::new();
        let app = make_application(ApplicationSpec {
            is_active: true,
            shared_env: vec![],
            image_pull_secret_name: Some("registry-creds".into()),
        });
        let component = make_component(ComponentSpec {
            image: "nginx".into(),
            restart_policy: Some("Never".into()),
            dns_policy: Some("ClusterFirst".into()),
            termination_grace_period_seconds: Some(30),
            ..Default::default()
        });

        let materializer = Materializer::new(&store, &app, &component);
        let (template, _) = materializer.pod_template().await.unwrap();

        let spec = template.spec.unwrap();
        assert_eq!(spec.image_pull_secrets.unwrap()[0].name, "registry-creds");
        assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
        assert_eq!(spec.dns_policy.as_deref(), Some("ClusterFirst"));
        assert_eq!(spec.termination_grace_period_seconds, Some(30));

        let labels = template.metadata.unwrap().labels.unwrap();
        assert_eq!(labels.get(crate::APPLICATION_LABEL).unwrap(), "shop");
        assert_eq!(labels.get(crate::COMPONENT_LABEL).unwrap(), "web");
    }
}
