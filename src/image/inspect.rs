//! Local, read-only inspection of image-export archives
//!
//! Unlike the push path, inspection does not rehash layers. Layer digests
//! come from the member path, or from the config's rootfs diff ids for the
//! legacy `<id>/layer.tar` layout.

use crate::error::{RegistryError, Result};
use crate::image::archive::{
    ArchiveIndex, DEFAULT_ARCHITECTURE, DEFAULT_OS, MANIFEST_FILE, TarManifestEntry, digest_from_member_path,
    parse_created, platform_field,
};
use crate::image::manifest::LAYER_TAR_MEDIA_TYPE;
use crate::image::validator::validate_index;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
pub struct ImageInspect {
    /// Config digest
    pub id: String,
    pub repo_tags: Vec<String>,
    pub created: DateTime<Utc>,
    pub architecture: String,
    pub os: String,
    pub config: ImageConfigDetails,
    pub layers: Vec<InspectLayer>,
    pub size: u64,
    pub rootfs_layers: Vec<String>,
}

/// Runtime settings recorded in the image config
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImageConfigDetails {
    pub cmd: Vec<String>,
    pub entrypoint: Vec<String>,
    pub env: Vec<String>,
    pub user: String,
    pub working_dir: Option<String>,
    pub exposed_ports: Vec<String>,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InspectLayer {
    pub digest: Option<String>,
    pub size: u64,
    pub media_type: String,
    pub path: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    architecture: Option<String>,
    #[serde(default)]
    os: Option<String>,
    #[serde(default)]
    created: Option<String>,
    #[serde(default)]
    config: Option<RawRuntimeConfig>,
    #[serde(default)]
    rootfs: Option<RawRootFs>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawRuntimeConfig {
    #[serde(default)]
    cmd: Option<Vec<String>>,
    #[serde(default)]
    entrypoint: Option<Vec<String>>,
    #[serde(default)]
    env: Option<Vec<String>>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    working_dir: Option<String>,
    #[serde(default)]
    exposed_ports: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawRootFs {
    #[serde(default)]
    diff_ids: Vec<String>,
}

pub fn inspect_docker_tar(path: impl AsRef<Path>) -> Result<ImageInspect> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(RegistryError::Validation(format!(
            "Tar file does not exist: {}",
            path.display()
        )));
    }
    let index = ArchiveIndex::scan(path)
        .ok()
        .filter(validate_index)
        .ok_or_else(|| {
            RegistryError::Validation(format!("Invalid Docker tar file: {}", path.display()))
        })?;
    let manifest: Vec<TarManifestEntry> = serde_json::from_slice(&index.read_member(MANIFEST_FILE)?)
        .map_err(|e| RegistryError::ArchiveRead(format!("Failed to inspect tar file: {}", e)))?;
    let entry = manifest
        .into_iter()
        .next()
        .ok_or_else(|| RegistryError::ArchiveRead("Invalid manifest.json".to_string()))?;

    let config_bytes = index.read_member(&entry.config)?;
    let raw: RawConfig = serde_json::from_slice(&config_bytes).map_err(|e| {
        RegistryError::ArchiveRead(format!("Cannot read config file {}: {}", entry.config, e))
    })?;
    let diff_ids = raw.rootfs.map(|rootfs| rootfs.diff_ids).unwrap_or_default();
    let layer_sources = entry.layer_sources.clone().unwrap_or_default();

    let layers: Vec<InspectLayer> = entry
        .layers
        .iter()
        .enumerate()
        .map(|(position, layer_path)| {
            let digest = digest_from_member_path(layer_path)
                .map(|d| d.to_string())
                .or_else(|| diff_ids.get(position).cloned());
            let source = digest.as_ref().and_then(|d| layer_sources.get(d));
            InspectLayer {
                size: source
                    .and_then(|s| s.size)
                    .or_else(|| index.member_size(layer_path))
                    .unwrap_or(0),
                media_type: source
                    .and_then(|s| s.media_type.clone())
                    .unwrap_or_else(|| LAYER_TAR_MEDIA_TYPE.to_string()),
                digest,
                path: layer_path.clone(),
            }
        })
        .collect();

    let runtime = raw.config.unwrap_or_default();
    let config = ImageConfigDetails {
        cmd: runtime.cmd.unwrap_or_default(),
        entrypoint: runtime.entrypoint.unwrap_or_default(),
        env: runtime.env.unwrap_or_default(),
        user: runtime.user.unwrap_or_default(),
        working_dir: runtime.working_dir.filter(|dir| !dir.is_empty()),
        exposed_ports: runtime
            .exposed_ports
            .map(|ports| ports.into_keys().collect())
            .unwrap_or_default(),
        labels: runtime.labels.unwrap_or_default(),
    };

    let id = digest_from_member_path(&entry.config)
        .map(|d| d.to_string())
        .unwrap_or_else(|| {
            let name = entry.config.rsplit('/').next().unwrap_or(&entry.config);
            format!("sha256:{}", name.trim_end_matches(".json"))
        });

    Ok(ImageInspect {
        id,
        repo_tags: entry.repo_tags.unwrap_or_default(),
        created: parse_created(raw.created.as_deref()),
        architecture: platform_field(raw.architecture.as_deref(), DEFAULT_ARCHITECTURE),
        os: platform_field(raw.os.as_deref(), DEFAULT_OS),
        config,
        size: layers.iter().map(|layer| layer.size).sum(),
        layers,
        rootfs_layers: diff_ids,
    })
}
