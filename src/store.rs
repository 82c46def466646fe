//! Typed read/write access to the cluster's object store
//!
//! The reconciler never talks to the Kubernetes API directly; it goes
//! through the [`KubeStore`] trait so tests can substitute a mock. The real
//! implementation wraps a [`kube::Client`] and uses server-side apply for
//! every create-or-update path, which makes recomputing the full desired
//! object every pass cheap: a no-op apply is a no-op on the server.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Service};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use serde::Serialize;

#[cfg(test)]
use mockall::automock;

use crate::crd::{Application, Component, ComponentPluginBinding, WorkloadType};
use crate::error::{ignore_not_found, ignore_not_found_on_delete};
use crate::workload::WorkloadObject;
use crate::{Error, FIELD_MANAGER};

/// Trait abstracting Kubernetes store operations for Component reconciliation
///
/// "Not found" on reads is `Ok(None)`, a recoverable signal rather than an
/// error; deletes absorb NotFound so cleanup of an already-gone dependent is
/// a success.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeStore: Send + Sync {
    /// Fetch a Component by namespace and name
    async fn get_component(&self, namespace: &str, name: &str)
        -> Result<Option<Component>, Error>;

    /// Persist a Component (finalizer changes, derived claim names)
    async fn update_component(&self, component: &Component) -> Result<Component, Error>;

    /// Fetch the cluster-scoped Application with the given name
    async fn get_application(&self, name: &str) -> Result<Option<Application>, Error>;

    /// Fetch a Service by namespace and name
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, Error>;

    /// Create-or-update a Service
    async fn apply_service(&self, service: &Service) -> Result<(), Error>;

    /// Delete a Service; a missing Service is not an error
    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Fetch the workload object of the given kind, if it exists
    async fn get_workload(
        &self,
        kind: WorkloadType,
        namespace: &str,
        name: &str,
    ) -> Result<Option<WorkloadObject>, Error>;

    /// Create-or-update a workload object
    async fn apply_workload(&self, workload: &WorkloadObject) -> Result<(), Error>;

    /// Delete the workload object of the given kind; absence is not an error
    async fn delete_workload(
        &self,
        kind: WorkloadType,
        namespace: &str,
        name: &str,
    ) -> Result<(), Error>;

    /// Fetch a PersistentVolumeClaim by namespace and name
    async fn get_pvc(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PersistentVolumeClaim>, Error>;

    /// Create a PersistentVolumeClaim (claims are created once, never updated)
    async fn create_pvc(&self, pvc: &PersistentVolumeClaim) -> Result<(), Error>;

    /// Fetch a ConfigMap by namespace and name
    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, Error>;

    /// Merge entries into a ConfigMap's data, creating the map when absent
    ///
    /// Entries not named in `entries` are left untouched; several writers
    /// share the namespace config tree.
    async fn merge_config_map_data(
        &self,
        namespace: &str,
        name: &str,
        entries: BTreeMap<String, String>,
    ) -> Result<(), Error>;

    /// List every plugin binding in a namespace
    async fn list_plugin_bindings(
        &self,
        namespace: &str,
    ) -> Result<Vec<ComponentPluginBinding>, Error>;

    /// Delete a plugin binding; absence is not an error
    async fn delete_plugin_binding(&self, namespace: &str, name: &str) -> Result<(), Error>;
}

/// Real store implementation over a Kubernetes client
pub struct KubeStoreImpl {
    client: Client,
}

impl KubeStoreImpl {
    /// Create a new KubeStoreImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build the server-side apply payload for a typed object
    ///
    /// k8s-openapi structs do not carry apiVersion/kind, but apply patches
    /// must include both.
    fn apply_payload<K>(obj: &K) -> Result<serde_json::Value, Error>
    where
        K: k8s_openapi::Resource + Serialize,
    {
        let mut value = serde_json::to_value(obj).map_err(|e| Error::serialization(e.to_string()))?;
        value["apiVersion"] = serde_json::Value::String(K::API_VERSION.to_string());
        value["kind"] = serde_json::Value::String(K::KIND.to_string());
        Ok(value)
    }

    fn apply_params() -> PatchParams {
        PatchParams::apply(FIELD_MANAGER).force()
    }

    async fn apply_named<K>(&self, namespace: &str, name: &str, obj: &K) -> Result<(), Error>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>
            + k8s_openapi::Resource
            + Serialize
            + serde::de::DeserializeOwned
            + Clone
            + std::fmt::Debug,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let payload = Self::apply_payload(obj)?;
        api.patch(name, &Self::apply_params(), &Patch::Apply(&payload))
            .await?;
        Ok(())
    }

    async fn delete_named<K>(&self, namespace: &str, name: &str) -> Result<(), Error>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>
            + Clone
            + std::fmt::Debug
            + serde::de::DeserializeOwned,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        ignore_not_found_on_delete(api.delete(name, &DeleteParams::default()).await)
    }
}

#[async_trait]
impl KubeStore for KubeStoreImpl {
    async fn get_component(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Component>, Error> {
        let api: Api<Component> = Api::namespaced(self.client.clone(), namespace);
        ignore_not_found(api.get(name).await)
    }

    async fn update_component(&self, component: &Component) -> Result<Component, Error> {
        let namespace = component
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| Error::validation("component has no namespace"))?;
        let name = component
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| Error::validation("component has no name"))?;

        let api: Api<Component> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.replace(name, &PostParams::default(), component).await?)
    }

    async fn get_application(&self, name: &str) -> Result<Option<Application>, Error> {
        let api: Api<Application> = Api::all(self.client.clone());
        ignore_not_found(api.get(name).await)
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, Error> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        ignore_not_found(api.get(name).await)
    }

    async fn apply_service(&self, service: &Service) -> Result<(), Error> {
        let namespace = service.metadata.namespace.as_deref().unwrap_or_default();
        let name = service.metadata.name.as_deref().unwrap_or_default();
        self.apply_named(namespace, name, service).await
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), Error> {
        self.delete_named::<Service>(namespace, name).await
    }

    async fn get_workload(
        &self,
        kind: WorkloadType,
        namespace: &str,
        name: &str,
    ) -> Result<Option<WorkloadObject>, Error> {
        match kind {
            WorkloadType::Server => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
                Ok(ignore_not_found(api.get(name).await)?.map(WorkloadObject::Server))
            }
            WorkloadType::Cronjob => {
                let api: Api<CronJob> = Api::namespaced(self.client.clone(), namespace);
                Ok(ignore_not_found(api.get(name).await)?.map(WorkloadObject::CronJob))
            }
            WorkloadType::Daemonset => {
                let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), namespace);
                Ok(ignore_not_found(api.get(name).await)?.map(WorkloadObject::DaemonSet))
            }
            WorkloadType::Statefulset => {
                let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
                Ok(ignore_not_found(api.get(name).await)?.map(WorkloadObject::StatefulSet))
            }
        }
    }

    async fn apply_workload(&self, workload: &WorkloadObject) -> Result<(), Error> {
        let namespace = workload.namespace();
        let name = workload.name();
        match workload {
            WorkloadObject::Server(deployment) => {
                self.apply_named(&namespace, &name, deployment).await
            }
            WorkloadObject::CronJob(cron_job) => self.apply_named(&namespace, &name, cron_job).await,
            WorkloadObject::DaemonSet(daemon_set) => {
                self.apply_named(&namespace, &name, daemon_set).await
            }
            WorkloadObject::StatefulSet(stateful_set) => {
                self.apply_named(&namespace, &name, stateful_set).await
            }
        }
    }

    async fn delete_workload(
        &self,
        kind: WorkloadType,
        namespace: &str,
        name: &str,
    ) -> Result<(), Error> {
        match kind {
            WorkloadType::Server => self.delete_named::<Deployment>(namespace, name).await,
            WorkloadType::Cronjob => self.delete_named::<CronJob>(namespace, name).await,
            WorkloadType::Daemonset => self.delete_named::<DaemonSet>(namespace, name).await,
            WorkloadType::Statefulset => self.delete_named::<StatefulSet>(namespace, name).await,
        }
    }

    async fn get_pvc(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PersistentVolumeClaim>, Error> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        ignore_not_found(api.get(name).await)
    }

    async fn create_pvc(&self, pvc: &PersistentVolumeClaim) -> Result<(), Error> {
        let namespace = pvc.metadata.namespace.as_deref().unwrap_or_default();
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), pvc).await?;
        Ok(())
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        ignore_not_found(api.get(name).await)
    }

    async fn merge_config_map_data(
        &self,
        namespace: &str,
        name: &str,
        entries: BTreeMap<String, String>,
    ) -> Result<(), Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "data": entries });

        match api
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                let config_map = ConfigMap {
                    metadata: kube::api::ObjectMeta {
                        name: Some(name.to_string()),
                        namespace: Some(namespace.to_string()),
                        ..Default::default()
                    },
                    data: Some(entries),
                    ..Default::default()
                };
                api.create(&PostParams::default(), &config_map).await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_plugin_bindings(
        &self,
        namespace: &str,
    ) -> Result<Vec<ComponentPluginBinding>, Error> {
        let api: Api<ComponentPluginBinding> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&ListParams::default()).await?;
        Ok(list.items)
    }

    async fn delete_plugin_binding(&self, namespace: &str, name: &str) -> Result<(), Error> {
        self.delete_named::<ComponentPluginBinding>(namespace, name)
            .await
    }
}
