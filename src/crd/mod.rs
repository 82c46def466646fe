//! Custom Resource Definitions for Flotilla
//!
//! This module contains all CRD definitions used by the Flotilla operator.

mod application;
mod component;
mod plugin;

pub use application::{Application, ApplicationSpec};
pub(crate) use component::quantity_is_zero;
pub use component::{
    Component, ComponentConfig, ComponentPort, ComponentSpec, ComponentVolume, DirectConfig,
    EnvVar, EnvVarType, PodAffinityType, VolumeType, WorkloadType,
};
pub use plugin::{
    ComponentPlugin, ComponentPluginBinding, ComponentPluginBindingSpec, ComponentPluginSpec,
};
