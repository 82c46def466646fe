//! Configuration file mounts
//!
//! Each namespace carries one shared ConfigMap holding its whole
//! configuration file tree. Keys are full file paths with `/` encoded as
//! `..` (ConfigMap keys cannot contain slashes); values are file contents.
//!
//! A Component mounts from this tree two ways:
//! - `configs`: paths into the tree (files or directories, resolved
//!   recursively), projected into one volume per mount path
//! - `directConfigs`: inline content the reconciler itself writes into the
//!   tree, mounted as a single file per entry

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, KeyToPath, Volume, VolumeMount,
};
use tracing::warn;

use crate::crd::Component;
use crate::CONFIG_FILES_MAP;

/// Sub-path every direct config file is projected under inside its volume
const DIRECT_CONFIG_FILE: &str = "inline-file";

/// Encode a file path into a ConfigMap data key
pub fn encode_file_path(path: &str) -> String {
    path.replace('/', "..")
}

fn decode_file_path(key: &str) -> String {
    key.replace("..", "/")
}

fn file_name(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}

fn direct_config_path(component: &str, index: usize) -> String {
    format!("/inline/{component}/{index}")
}

/// ConfigMap data key holding a Component's direct config entry
pub fn direct_config_key(component: &str, index: usize) -> String {
    encode_file_path(&direct_config_path(component, index))
}

/// The ConfigMap entries a Component's direct configs contribute to the
/// shared config tree, keyed for merge into [`CONFIG_FILES_MAP`]
pub fn direct_config_entries(component: &Component) -> BTreeMap<String, String> {
    let name = component.metadata.name.as_deref().unwrap_or_default();
    component
        .spec
        .direct_configs
        .iter()
        .enumerate()
        .map(|(i, dc)| (direct_config_key(name, i), dc.content.clone()))
        .collect()
}

/// Resolve a Component's config mounts into volumes and volume mounts
///
/// Shared config paths that match nothing in the tree are skipped with a
/// warning rather than failing the pass; the tree is maintained by an
/// external collaborator and may briefly lag behind Component specs.
pub fn resolve_config_mounts(
    component: &Component,
    config_map: Option<&ConfigMap>,
) -> (Vec<Volume>, Vec<VolumeMount>) {
    let mut volumes = Vec::new();
    let mut mounts = Vec::new();

    let component_name = component.metadata.name.as_deref().unwrap_or_default();

    // configs: group resolved files by mount path
    let mut by_mount_path: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();
    for config in &component.spec.configs {
        for path in &config.paths {
            let matched = resolve_tree_path(config_map, path);
            if matched.is_empty() {
                warn!(path = %path, "config path matches nothing in the shared tree");
                continue;
            }
            by_mount_path
                .entry(config.mount_path.as_str())
                .or_default()
                .extend(matched);
        }
    }

    for (mount_path, raw_paths) in by_mount_path {
        let name = format!("configs-{}", super::template::short_hash(mount_path));

        let items: Vec<KeyToPath> = raw_paths
            .iter()
            .map(|raw| KeyToPath {
                key: encode_file_path(raw),
                path: file_name(raw),
                ..Default::default()
            })
            .collect();

        volumes.push(Volume {
            name: name.clone(),
            config_map: Some(ConfigMapVolumeSource {
                name: CONFIG_FILES_MAP.to_string(),
                items: Some(items),
                ..Default::default()
            }),
            ..Default::default()
        });

        mounts.push(VolumeMount {
            name,
            mount_path: mount_path.to_string(),
            ..Default::default()
        });
    }

    // directConfigs: one single-file volume per entry, named by index
    for (i, direct_config) in component.spec.direct_configs.iter().enumerate() {
        let name = format!("direct-config-{component_name}-{i}");

        volumes.push(Volume {
            name: name.clone(),
            config_map: Some(ConfigMapVolumeSource {
                name: CONFIG_FILES_MAP.to_string(),
                items: Some(vec![KeyToPath {
                    key: direct_config_key(component_name, i),
                    path: DIRECT_CONFIG_FILE.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        });

        mounts.push(VolumeMount {
            name,
            mount_path: direct_config.mount_file_path.clone(),
            sub_path: Some(DIRECT_CONFIG_FILE.to_string()),
            ..Default::default()
        });
    }

    (volumes, mounts)
}

/// All file paths in the tree at or below the given path
///
/// An exact key match is a single file; otherwise the path is treated as a
/// directory and every file under it is included.
fn resolve_tree_path(config_map: Option<&ConfigMap>, path: &str) -> Vec<String> {
    let Some(data) = config_map.and_then(|cm| cm.data.as_ref()) else {
        return Vec::new();
    };

    let dir_prefix = format!("{}/", path.trim_end_matches('/'));

    data.keys()
        .map(|key| decode_file_path(key))
        .filter(|decoded| decoded == path || decoded.starts_with(&dir_prefix))
        .collect()
}
