//! Image manifest v2 construction

use crate::error::Result;
use crate::image::archive::ImageArchiveInfo;
use crate::image::digest::Digest;
use serde::{Deserialize, Serialize};

pub const MANIFEST_V2_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const CONFIG_MEDIA_TYPE: &str = "application/vnd.docker.container.image.v1+json";
pub const LAYER_GZIP_MEDIA_TYPE: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";
pub const LAYER_TAR_MEDIA_TYPE: &str = "application/vnd.docker.image.rootfs.diff.tar";

/// Pick the layer media type from the first bytes of the layer
pub fn layer_media_type(head: &[u8]) -> &'static str {
    if head.starts_with(&[0x1f, 0x8b]) {
        LAYER_GZIP_MEDIA_TYPE
    } else {
        LAYER_TAR_MEDIA_TYPE
    }
}

/// A pushable object (config or layer) found in an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobDescriptor {
    pub digest: Digest,
    pub size: u64,
    pub media_type: String,
    /// Member path inside the archive
    pub source: String,
}

/// Inputs for one wire manifest
#[derive(Debug, Clone)]
pub struct ManifestInfo {
    pub config: BlobDescriptor,
    /// Bottom layer first
    pub layers: Vec<BlobDescriptor>,
    pub schema_version: u32,
    pub media_type: String,
}

impl ManifestInfo {
    pub fn from_archive(info: &ImageArchiveInfo) -> Self {
        Self {
            config: BlobDescriptor {
                digest: info.config_digest.clone(),
                size: info.config_size,
                media_type: CONFIG_MEDIA_TYPE.to_string(),
                source: info.config_path.clone(),
            },
            layers: info.layers.clone(),
            schema_version: 2,
            media_type: MANIFEST_V2_MEDIA_TYPE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub size: u64,
    pub digest: String,
}

impl From<&BlobDescriptor> for Descriptor {
    fn from(blob: &BlobDescriptor) -> Self {
        Self {
            media_type: blob.media_type.clone(),
            size: blob.size,
            digest: blob.digest.to_string(),
        }
    }
}

/// Docker image manifest, schema version 2
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifestV2 {
    pub schema_version: u32,
    pub media_type: String,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
}

impl ImageManifestV2 {
    /// Compact JSON with a fixed field order, the bytes that get pushed
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

pub struct ManifestBuilder;

impl ManifestBuilder {
    pub fn create_manifest_v2(info: &ManifestInfo) -> ImageManifestV2 {
        ImageManifestV2 {
            schema_version: info.schema_version,
            media_type: info.media_type.clone(),
            config: Descriptor::from(&info.config),
            layers: info.layers.iter().map(Descriptor::from).collect(),
        }
    }

    /// SHA-256 over the serialized manifest
    pub fn calculate_manifest_digest(manifest: &ImageManifestV2) -> Result<Digest> {
        Ok(Digest::sha256(&manifest.to_bytes()?))
    }
}
