//! Component controller implementation
//!
//! Each reconcile pass recomputes the full desired state of one Component
//! from scratch and applies it: pod template, workload object, Service, and
//! claims. There is no diffing; server-side apply makes an unchanged pass a
//! no-op on the cluster. The pass order is fixed: load, finalize/clean up,
//! materialize, run plugin hooks, sync Service, sync workload.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use crate::crd::{Component, WorkloadType};
use crate::plugin::{PluginHook, PluginLookup, PluginPipeline};
use crate::store::{KubeStore, KubeStoreImpl};
use crate::workload::{
    desired_service, desired_workload, direct_config_entries, Materializer, WorkloadObject,
};
use crate::{Error, COMPONENT_FINALIZER, CONFIG_FILES_MAP};

/// Shared state every reconcile pass receives
pub struct Context {
    /// Cluster store (trait object for testability)
    pub store: Arc<dyn KubeStore>,
    /// Compiled plugin programs, kept current by the plugin watcher
    pub plugins: Arc<dyn PluginLookup>,
}

impl Context {
    /// Create a context over a real Kubernetes client
    pub fn new(client: Client, plugins: Arc<dyn PluginLookup>) -> Self {
        Self {
            store: Arc::new(KubeStoreImpl::new(client)),
            plugins,
        }
    }

    /// Create a context from explicit store and plugin implementations
    pub fn with_store(store: Arc<dyn KubeStore>, plugins: Arc<dyn PluginLookup>) -> Self {
        Self { store, plugins }
    }
}

/// Reconcile a single Component to its desired state
#[instrument(skip(component, ctx), fields(component = %component.name_any(), namespace = %component.namespace().unwrap_or_default()))]
pub async fn reconcile(component: Arc<Component>, ctx: Arc<Context>) -> Result<Action, Error> {
    let namespace = component
        .namespace()
        .ok_or_else(|| Error::validation("component has no namespace"))?;
    let name = component.name_any();

    info!("reconciling component");

    // work from a fresh copy, not the watch cache; a Component gone between
    // the trigger and this pass is nothing to act on
    let Some(mut component) = ctx.store.get_component(&namespace, &name).await? else {
        debug!("component no longer present");
        return Ok(Action::await_change());
    };

    // cleanup must run no matter how broken the rest of the spec is, or a
    // deleting Component could never shed its finalizer
    if component.metadata.deletion_timestamp.is_some() {
        return handle_delete(&ctx, &mut component, &namespace, &name).await;
    }

    component.spec.validate()?;

    // the parent Application shares the namespace's name
    let Some(application) = ctx.store.get_application(&namespace).await? else {
        warn!("parent application not found, waiting for it to appear");
        return Ok(Action::requeue(Duration::from_secs(30)));
    };

    ensure_finalizer(&ctx, &mut component).await?;

    if !application.spec.is_active {
        info!("application inactive, removing materialized objects");
        delete_materialized_objects(&ctx, &namespace, &name).await?;
        return Ok(Action::await_change());
    }

    if !component.spec.direct_configs.is_empty() {
        ctx.store
            .merge_config_map_data(
                &namespace,
                CONFIG_FILES_MAP,
                direct_config_entries(&component),
            )
            .await?;
    }

    let bindings = ctx.store.list_plugin_bindings(&namespace).await?;

    let (mut template, derived_claims) = Materializer::new(ctx.store.as_ref(), &application, &component)
        .pod_template()
        .await?;
    persist_derived_claims(&ctx, &mut component, derived_claims).await?;

    let pipeline = PluginPipeline::new(ctx.plugins.as_ref(), &application, &component, bindings);
    pipeline.run_hook(PluginHook::AfterPodTemplateGeneration, &mut template)?;

    // a Service exists iff at least one port is declared
    if component.spec.ports.is_empty() {
        ctx.store.delete_service(&namespace, &name).await?;
    } else {
        let service = desired_service(&component, &application);
        ctx.store.apply_service(&service).await?;
    }

    let mut workload = desired_workload(&component, &application, template)?;
    if let WorkloadObject::Server(deployment) = &mut workload {
        pipeline.run_hook(PluginHook::BeforeWorkloadSave, deployment)?;
    }
    ctx.store.apply_workload(&workload).await?;

    // a kind change leaves the previously selected kind's object behind;
    // sweep the other kinds so exactly one workload object remains
    for kind in WorkloadType::ALL {
        if kind != workload.kind()
            && ctx
                .store
                .get_workload(kind, &namespace, &name)
                .await?
                .is_some()
        {
            info!(stale_kind = %kind, "removing workload object of previously selected kind");
            ctx.store.delete_workload(kind, &namespace, &name).await?;
        }
    }

    debug!("component reconciled");
    Ok(Action::await_change())
}

/// Decide what to do when reconciliation fails
pub fn error_policy(component: Arc<Component>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        component = %component.name_any(),
        "reconciliation failed"
    );

    match error {
        // only a spec edit can fix these, and an edit re-triggers on its own
        Error::Validation(_) => Action::requeue(Duration::from_secs(300)),
        // a dangling reference usually resolves once the dependency appears
        Error::DependencyMissing(_) => Action::requeue(Duration::from_secs(10)),
        _ => Action::requeue(Duration::from_secs(5)),
    }
}

/// Tear down everything the Component materialized, then release it
///
/// Runs when the Component carries a deletion timestamp. Component-specific
/// plugin bindings go with it; namespace-wide bindings stay.
async fn handle_delete(
    ctx: &Context,
    component: &mut Component,
    namespace: &str,
    name: &str,
) -> Result<Action, Error> {
    if !component
        .metadata
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|f| f == COMPONENT_FINALIZER))
    {
        // nothing to clean up, deletion proceeds without us
        return Ok(Action::await_change());
    }

    info!("component deleting, cleaning up");

    delete_materialized_objects(ctx, namespace, name).await?;

    for binding in ctx.store.list_plugin_bindings(namespace).await? {
        if binding.spec.component_name.as_deref() == Some(name) {
            ctx.store
                .delete_plugin_binding(namespace, &binding.name_any())
                .await?;
        }
    }

    if let Some(finalizers) = component.metadata.finalizers.as_mut() {
        finalizers.retain(|f| f != COMPONENT_FINALIZER);
    }
    ctx.store.update_component(component).await?;

    info!("cleanup complete, finalizer removed");
    Ok(Action::await_change())
}

/// Delete the Service and the workload objects of every kind
async fn delete_materialized_objects(
    ctx: &Context,
    namespace: &str,
    name: &str,
) -> Result<(), Error> {
    ctx.store.delete_service(namespace, name).await?;
    for kind in WorkloadType::ALL {
        ctx.store.delete_workload(kind, namespace, name).await?;
    }
    Ok(())
}

/// Add the cleanup finalizer if the Component does not carry it yet
async fn ensure_finalizer(ctx: &Context, component: &mut Component) -> Result<(), Error> {
    let finalizers = component.metadata.finalizers.get_or_insert_with(Vec::new);
    if finalizers.iter().any(|f| f == COMPONENT_FINALIZER) {
        return Ok(());
    }

    finalizers.push(COMPONENT_FINALIZER.to_string());
    *component = ctx.store.update_component(component).await?;
    debug!("finalizer added");
    Ok(())
}

/// Write derived claim names back onto the Component spec
///
/// Later passes then reuse the recorded names instead of re-deriving them,
/// and the names stay visible to users inspecting the Component.
async fn persist_derived_claims(
    ctx: &Context,
    component: &mut Component,
    derived_claims: Vec<(usize, String)>,
) -> Result<(), Error> {
    let mut changed = false;
    for (index, claim_name) in derived_claims {
        let volume = &mut component.spec.volumes[index];
        if volume.persistent_volume_claim_name != claim_name {
            volume.persistent_volume_claim_name = claim_name;
            changed = true;
        }
    }

    if changed {
        *component = ctx.store.update_component(component).await?;
        debug!("derived claim names persisted");
    }
    Ok(())
}
