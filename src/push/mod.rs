//! Push workflow: archive in, tagged manifests out
//!
//! Every push follows the same order. The registry is probed first, then the
//! archive is indexed once and that index serves tag resolution, validation
//! and parsing. Config and layer blobs are uploaded with bounded concurrency
//! (skipping blobs the registry already has), and finally one manifest is
//! written per requested tag.

pub mod pipeline;

use crate::config::{PushConfig, RegistryConfig};
use crate::error::{RegistryError, Result};
use crate::image::archive::{ArchiveIndex, TarImageReader};
use crate::image::digest::DigestUtils;
use crate::image::manifest::{CONFIG_MEDIA_TYPE, ManifestBuilder, ManifestInfo};
use crate::image::tags::{DEFAULT_TAG, extract_original_tags_from, parse_repository_tag, primary_tag_from};
use crate::image::validator::validate_index;
use crate::logging::Logger;
use crate::registry::client::{RegistryClient, RegistryClientBuilder};
use crate::registry::operations::BlobPayload;
use crate::registry::progress::ProgressCallback;
use futures::future;
use std::path::Path;
use std::sync::Arc;

#[derive(Clone)]
pub struct ImagePusher {
    client: RegistryClient,
    config: PushConfig,
    output: Logger,
    progress: Option<Arc<dyn ProgressCallback>>,
}

impl ImagePusher {
    pub fn new(client: RegistryClient, config: PushConfig) -> Self {
        Self {
            client,
            config,
            output: Logger::new_quiet(),
            progress: None,
        }
    }

    pub fn with_logger(mut self, output: Logger) -> Self {
        self.output = output;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn client(&self) -> &RegistryClient {
        &self.client
    }

    /// Push under `repository:tag`, filling whichever is missing from the
    /// archive's own tags. Returns the manifest digest.
    pub async fn push_tar(
        &self,
        path: impl AsRef<Path>,
        repository: Option<&str>,
        tag: Option<&str>,
    ) -> Result<String> {
        let path = path.as_ref().to_path_buf();
        self.config.validate()?;
        self.ensure_registry().await?;

        let indexed = index_archive(&path).await;
        let extracted = match &indexed {
            Ok(index) if repository.is_none() || tag.is_none() => primary_tag_from(index),
            _ => None,
        };

        let repository = repository
            .map(str::to_string)
            .or_else(|| extracted.as_ref().map(|(repository, _)| repository.clone()))
            .filter(|repository| !repository.is_empty())
            .ok_or(RegistryError::NoRepositorySpecified)?;
        let tag = tag
            .map(str::to_string)
            .or_else(|| extracted.map(|(_, tag)| tag))
            .unwrap_or_else(|| DEFAULT_TAG.to_string());

        self.output.section(&format!("Pushing {}:{}", repository, tag));
        let (reader, manifest) = self.open_validated(indexed?).await?;
        self.upload_blobs(&reader, &manifest, &repository).await?;
        let digest = self.push_manifest(&manifest, &repository, &tag).await?;

        self.output.success(&format!(
            "Pushed {}:{} ({}) in {}",
            repository,
            tag,
            digest,
            self.output.format_duration(self.output.elapsed())
        ));
        Ok(digest)
    }

    /// Push under the archive's first original tag
    pub async fn push_with_original_tags(&self, path: impl AsRef<Path>) -> Result<String> {
        self.push_tar(path, None, None).await
    }

    /// Push once and tag the manifest with every original tag. Blobs go to
    /// the first tag's repository. Digests are returned in tag order.
    pub async fn push_with_all_original_tags(&self, path: impl AsRef<Path>) -> Result<Vec<String>> {
        let path = path.as_ref().to_path_buf();
        self.config.validate()?;
        self.ensure_registry().await?;

        let index = index_archive(&path).await?;
        let original_tags = extract_original_tags_from(&index);
        if original_tags.is_empty() {
            return Err(RegistryError::NoOriginalTags);
        }
        let targets: Vec<(String, String)> = original_tags
            .iter()
            .map(|repo_tag| parse_repository_tag(repo_tag))
            .collect();

        self.output.section(&format!(
            "Pushing {} with {} tags",
            path.display(),
            targets.len()
        ));
        let (reader, manifest) = self.open_validated(index).await?;
        let (first_repository, _) = &targets[0];
        self.upload_blobs(&reader, &manifest, first_repository).await?;

        let digests = future::try_join_all(
            targets
                .iter()
                .map(|(repository, tag)| self.push_manifest(&manifest, repository, tag)),
        )
        .await?;

        self.output
            .success(&format!("Pushed tags: {}", original_tags.join(", ")));
        Ok(digests)
    }

    async fn ensure_registry(&self) -> Result<()> {
        if self.client.check_v2_support().await {
            Ok(())
        } else {
            Err(RegistryError::RegistryUnreachable(self.client.address().to_string()))
        }
    }

    /// Validate, then parse the archive once
    async fn open_validated(&self, index: ArchiveIndex) -> Result<(TarImageReader, ManifestInfo)> {
        let index = tokio::task::spawn_blocking(move || {
            if validate_index(&index) {
                Ok(index)
            } else {
                Err(invalid_archive(index.path()))
            }
        })
        .await??;

        let reader = TarImageReader::from_index(index).await?;
        let info = reader.extract_image_info().await?;
        self.output.info(&format!(
            "Image {}/{} with {} layers, {}",
            info.os,
            info.architecture,
            info.layers.len(),
            self.output.format_size(info.total_size)
        ));
        Ok((reader, ManifestInfo::from_archive(&info)))
    }

    /// Config and layers, `concurrent_uploads` at a time
    async fn upload_blobs(
        &self,
        reader: &TarImageReader,
        manifest: &ManifestInfo,
        repository: &str,
    ) -> Result<()> {
        let mut blobs = vec![manifest.config.clone()];
        blobs.extend(manifest.layers.iter().cloned());

        self.output.step(&format!(
            "Uploading {} blobs to {} ({} concurrent)",
            blobs.len(),
            repository,
            self.config.concurrent_uploads
        ));

        let uploaded = pipeline::run_bounded(self.config.concurrent_uploads, blobs, |blob| {
            let client = self.client.clone();
            let reader = reader.clone();
            let output = self.output.clone();
            let progress = self.progress.clone();
            let repository = repository.to_string();
            let chunk_size = self.config.chunk_size;
            let is_config = blob.media_type == CONFIG_MEDIA_TYPE;
            async move {
                let digest = blob.digest.to_string();
                if client.blob_exists(&repository, &digest).await {
                    output.detail(&format!(
                        "Skipping {}, already in registry",
                        DigestUtils::format_short(&digest)
                    ));
                    return Ok::<bool, RegistryError>(false);
                }

                let payload = if is_config {
                    BlobPayload::Buffer(reader.read_member(&blob.source).await?)
                } else {
                    BlobPayload::Stream {
                        chunks: reader.layer_stream(&blob.source, chunk_size)?,
                        total_size: Some(blob.size),
                    }
                };
                client
                    .upload_blob(&repository, payload, &digest, chunk_size, progress.as_deref())
                    .await?;
                Ok(true)
            }
        })
        .await?;

        let sent = uploaded.iter().filter(|sent| **sent).count();
        self.output.info(&format!(
            "{} blobs uploaded, {} already present",
            sent,
            uploaded.len() - sent
        ));
        Ok(())
    }

    /// Upload the manifest; falls back to the locally computed digest when
    /// the registry does not echo one
    async fn push_manifest(&self, manifest: &ManifestInfo, repository: &str, tag: &str) -> Result<String> {
        let wire = ManifestBuilder::create_manifest_v2(manifest);
        let bytes = wire.to_bytes()?;
        let digest = self
            .client
            .upload_manifest(repository, tag, bytes, &manifest.media_type)
            .await?;
        if digest.is_empty() {
            Ok(ManifestBuilder::calculate_manifest_digest(&wire)?.to_string())
        } else {
            Ok(digest)
        }
    }
}

/// Index the archive. A missing or unreadable file is a validation failure.
async fn index_archive(path: &Path) -> Result<ArchiveIndex> {
    if !path.exists() {
        return Err(RegistryError::Validation(format!(
            "Tar file does not exist: {}",
            path.display()
        )));
    }
    let scan_path = path.to_path_buf();
    tokio::task::spawn_blocking(move || ArchiveIndex::scan(&scan_path))
        .await?
        .map_err(|e| {
            RegistryError::Validation(format!("Invalid Docker tar file: {}: {}", path.display(), e))
        })
}

fn invalid_archive(path: &Path) -> RegistryError {
    RegistryError::Validation(format!("Invalid Docker tar file: {}", path.display()))
}

fn pusher_for(registry_url: &str, timeout: u64) -> Result<ImagePusher> {
    let client = RegistryClientBuilder::new(RegistryConfig::new(registry_url).with_timeout(timeout)).build()?;
    Ok(ImagePusher::new(client, PushConfig::default()))
}

/// Push an archive with default concurrency. `timeout` is per request, in
/// seconds; [`crate::config::DEFAULT_PUSH_TIMEOUT`] is the usual choice.
pub async fn push_tar(
    path: impl AsRef<Path>,
    registry_url: &str,
    repository: Option<&str>,
    tag: Option<&str>,
    timeout: u64,
) -> Result<String> {
    pusher_for(registry_url, timeout)?
        .push_tar(path, repository, tag)
        .await
}

pub async fn push_with_original_tags(path: impl AsRef<Path>, registry_url: &str, timeout: u64) -> Result<String> {
    pusher_for(registry_url, timeout)?
        .push_with_original_tags(path)
        .await
}

pub async fn push_with_all_original_tags(
    path: impl AsRef<Path>,
    registry_url: &str,
    timeout: u64,
) -> Result<Vec<String>> {
    pusher_for(registry_url, timeout)?
        .push_with_all_original_tags(path)
        .await
}

/// Whether `registry_url` answers the v2 API probe
pub async fn check_registry_connectivity(registry_url: &str) -> Result<bool> {
    let client = RegistryClientBuilder::new(RegistryConfig::new(registry_url)).build()?;
    Ok(client.check_v2_support().await)
}
