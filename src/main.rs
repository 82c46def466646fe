//! Flotilla Operator - Component reconciliation for Kubernetes

use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use kube::api::{Patch, PatchParams};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::{self, Config as WatcherConfig};
use kube::runtime::{Controller, WatchStreamExt};
use kube::{Api, Client, CustomResourceExt, ResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::Service;

use flotilla::controller::{error_policy, reconcile, Context};
use flotilla::crd::{Application, Component, ComponentPlugin, ComponentPluginBinding};
use flotilla::plugin::PluginCache;
use flotilla::FIELD_MANAGER;

/// Flotilla - CRD-driven component reconciliation with a plugin pipeline
#[derive(Parser, Debug)]
#[command(name = "flotilla", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    ///
    /// Watches Component CRDs and reconciles them into workload objects,
    /// Services, and claims. Owned objects are watched too, so drift in a
    /// dependent re-triggers its Component. A separate watch keeps the
    /// plugin program cache current.
    Controller,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.crd {
        let crds = [
            serde_yaml::to_string(&Application::crd())?,
            serde_yaml::to_string(&Component::crd())?,
            serde_yaml::to_string(&ComponentPlugin::crd())?,
            serde_yaml::to_string(&ComponentPluginBinding::crd())?,
        ];
        println!("{}", crds.join("---\n"));
        return Ok(());
    }

    match cli.command {
        Some(Commands::Controller) | None => run_controller().await,
    }
}

/// Ensure all Flotilla CRDs are installed
///
/// The operator installs its own CRDs on startup using server-side apply,
/// so the CRD versions always match the operator version.
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for (name, crd) in [
        ("applications.flotilla.dev", Application::crd()),
        ("components.flotilla.dev", Component::crd()),
        ("componentplugins.flotilla.dev", ComponentPlugin::crd()),
        (
            "componentpluginbindings.flotilla.dev",
            ComponentPluginBinding::crd(),
        ),
    ] {
        tracing::info!(crd = name, "Installing CRD");
        crds.patch(name, &params, &Patch::Apply(&crd))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to install CRD {}: {}", name, e))?;
    }

    tracing::info!("All Flotilla CRDs installed/updated");
    Ok(())
}

/// Run in controller mode - reconciles Components
async fn run_controller() -> anyhow::Result<()> {
    tracing::info!("Flotilla controller starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crds_installed(&client).await?;

    let plugin_cache = Arc::new(PluginCache::new());
    let ctx = Arc::new(Context::new(client.clone(), plugin_cache.clone()));

    // plugin programs are compiled as their CRDs appear and change, never
    // during a reconcile pass
    let plugins: Api<ComponentPlugin> = Api::all(client.clone());
    let plugin_watch = {
        let cache = plugin_cache.clone();
        watcher::watcher(plugins, WatcherConfig::default())
            .default_backoff()
            .for_each(move |event| {
                let cache = cache.clone();
                async move {
                    match event {
                        Ok(watcher::Event::Apply(plugin))
                        | Ok(watcher::Event::InitApply(plugin)) => {
                            let name = plugin.name_any();
                            match cache.compile_and_insert(&plugin) {
                                Ok(()) => tracing::info!(plugin = %name, "plugin compiled"),
                                Err(e) => {
                                    tracing::error!(plugin = %name, error = %e, "plugin failed to compile")
                                }
                            }
                        }
                        Ok(watcher::Event::Delete(plugin)) => {
                            let name = plugin.name_any();
                            cache.remove(&name);
                            tracing::info!(plugin = %name, "plugin removed from cache");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::warn!(error = %e, "plugin watch error"),
                    }
                }
            })
    };

    let components: Api<Component> = Api::all(client.clone());
    let bindings: Api<ComponentPluginBinding> = Api::all(client.clone());

    tracing::info!("Starting Component controller...");

    let component_controller = Controller::new(components, WatcherConfig::default())
        .owns(
            Api::<Deployment>::all(client.clone()),
            WatcherConfig::default(),
        )
        .owns(
            Api::<CronJob>::all(client.clone()),
            WatcherConfig::default(),
        )
        .owns(
            Api::<DaemonSet>::all(client.clone()),
            WatcherConfig::default(),
        )
        .owns(
            Api::<StatefulSet>::all(client.clone()),
            WatcherConfig::default(),
        )
        .owns(
            Api::<Service>::all(client.clone()),
            WatcherConfig::default(),
        )
        // a binding naming one Component re-triggers that Component;
        // namespace-wide bindings take effect on the next natural pass
        .watches(bindings, WatcherConfig::default(), |binding| {
            let namespace = binding.namespace().unwrap_or_default();
            binding
                .spec
                .component_name
                .as_deref()
                .map(|component| ObjectRef::new(component).within(&namespace))
                .into_iter()
        })
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(object) => {
                    tracing::debug!(?object, "Component reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Component reconciliation error");
                }
            }
        });

    tokio::select! {
        _ = component_controller => {
            tracing::info!("Component controller completed");
        }
        _ = plugin_watch => {
            tracing::info!("Plugin watch completed");
        }
    }

    tracing::info!("Flotilla controller shutting down");
    Ok(())
}
