//! Structural validation of image-export archives

use crate::error::{RegistryError, Result};
use crate::image::archive::{ArchiveIndex, MANIFEST_FILE, TarManifestEntry};
use serde_json::Value;
use std::path::Path;

/// Check that the archive is a tar holding a usable `manifest.json` whose
/// every entry points at members that exist.
///
/// Only a missing path is an error; any content problem yields `false`.
pub fn validate_docker_tar(path: impl AsRef<Path>) -> Result<bool> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(missing_archive(path));
    }
    Ok(ArchiveIndex::scan(path).is_ok_and(|index| validate_index(&index)))
}

/// Same checks as [`validate_docker_tar`] on an archive already indexed
pub fn validate_index(index: &ArchiveIndex) -> bool {
    if !index.contains(MANIFEST_FILE) {
        return false;
    }
    let Ok(bytes) = index.read_member(MANIFEST_FILE) else {
        return false;
    };
    let Ok(manifest) = serde_json::from_slice::<Value>(&bytes) else {
        return false;
    };

    match manifest.as_array() {
        Some(entries) if !entries.is_empty() => {
            entries.iter().all(|entry| validate_manifest_entry(entry, index))
        }
        _ => false,
    }
}

fn validate_manifest_entry(entry: &Value, index: &ArchiveIndex) -> bool {
    let (Some(config), Some(layers)) = (entry.get("Config"), entry.get("Layers")) else {
        return false;
    };
    let Some(config) = config.as_str() else {
        return false;
    };
    if !index.contains(config) {
        return false;
    }
    let Some(layers) = layers.as_array() else {
        return false;
    };
    layers
        .iter()
        .all(|layer| layer.as_str().is_some_and(|layer| index.contains(layer)))
}

fn missing_archive(path: &Path) -> RegistryError {
    RegistryError::Validation(format!("Tar file does not exist: {}", path.display()))
}

/// Manifest entries of an archive that passes validation
pub fn get_tar_manifest(path: impl AsRef<Path>) -> Result<Vec<TarManifestEntry>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(missing_archive(path));
    }
    let index = ArchiveIndex::scan(path)
        .ok()
        .filter(validate_index)
        .ok_or_else(|| {
            RegistryError::Validation(format!("Invalid Docker tar file: {}", path.display()))
        })?;
    let bytes = index.read_member(MANIFEST_FILE)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| RegistryError::Validation(format!("Error reading manifest: {}", e)))
}
