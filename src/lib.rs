//! Flotilla - PaaS control-plane operator for Kubernetes
//!
//! Flotilla converges declarative Component descriptions (image, ports, env,
//! volumes, scaling shape) into concrete running infrastructure: a workload
//! object, a network-exposing Service, storage claims, and mounted
//! configuration. Third-party logic can alter that materialization through a
//! sandboxed plugin pipeline invoked at fixed extension points.
//!
//! # Architecture
//!
//! - Components are grouped under Applications; the Application named after a
//!   Component's namespace is its parent and carries shared environment and
//!   the active/inactive switch
//! - The controller is level-triggered: every pass recomputes the full
//!   desired state and applies it, so re-running with no external change is
//!   a no-op
//! - Plugins are externally authored scripts, compiled once into a shared
//!   cache and executed on a fresh, state-isolated runtime per hook
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (Application, Component, plugins)
//! - [`controller`] - Component reconciliation logic
//! - [`store`] - Typed read/write access to the cluster's object store
//! - [`workload`] - Pod template and per-kind workload materialization
//! - [`plugin`] - Plugin program cache and hook execution pipeline
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod controller;
pub mod crd;
pub mod error;
pub mod plugin;
pub mod store;
pub mod workload;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================
// These constants define names shared between the reconciler, the
// materializer, and test fixtures. Centralizing them here keeps the label
// set used as Service selectors identical to the one stamped on pod
// templates.

/// Label carrying the owning Application's name on every produced object
pub const APPLICATION_LABEL: &str = "flotilla-application";

/// Label carrying the Component's name on every produced object
pub const COMPONENT_LABEL: &str = "flotilla-component";

/// Finalizer preventing Component removal until dependents are cleaned up
pub const COMPONENT_FINALIZER: &str = "flotilla.dev/component-cleanup";

/// Name of the per-namespace ConfigMap holding shared configuration files
pub const CONFIG_FILES_MAP: &str = "flotilla-config-files";

/// Field manager name used for server-side apply
pub const FIELD_MANAGER: &str = "flotilla-controller";
