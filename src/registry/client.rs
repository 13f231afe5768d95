//! Registry client composing blob, manifest and repository operations
//!
//! ```no_run
//! use docker_tar_pusher::config::RegistryConfig;
//! use docker_tar_pusher::registry::RegistryClientBuilder;
//!
//! # async fn example() -> docker_tar_pusher::error::Result<()> {
//! let client = RegistryClientBuilder::new(RegistryConfig::new("http://localhost:5000")).build()?;
//! if client.check_v2_support().await {
//!     println!("{:?}", client.list_tags("nginx").await?);
//! }
//! # Ok(())
//! # }
//! ```

use crate::config::RegistryConfig;
use crate::error::handlers::NetworkErrorHandler;
use crate::error::{RegistryError, Result};
use crate::image::archive::{DEFAULT_ARCHITECTURE, DEFAULT_OS, parse_created, platform_field};
use crate::logging::Logger;
use crate::registry::operations::{BlobOperations, BlobPayload, ManifestOperations, RepositoryOperations};
use crate::registry::progress::ProgressCallback;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Serialize;

pub struct RegistryClientBuilder {
    config: RegistryConfig,
    output: Logger,
}

impl RegistryClientBuilder {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            output: Logger::new_quiet(),
        }
    }

    pub fn with_logger(mut self, output: Logger) -> Self {
        self.output = output;
        self
    }

    pub fn build(self) -> Result<RegistryClient> {
        self.config.validate()?;
        let client = self.config.build_http_client()?;
        let address = self.config.url.clone();

        Ok(RegistryClient {
            blobs: BlobOperations::new(client.clone(), address.clone(), self.output.clone()),
            manifests: ManifestOperations::new(client.clone(), address.clone(), self.output.clone()),
            repositories: RepositoryOperations::new(client.clone(), address, self.output.clone()),
            client,
            config: self.config,
            output: self.output,
        })
    }
}

/// Summary of an image stored in a registry
#[derive(Debug, Clone, Serialize)]
pub struct RemoteImageInfo {
    pub repository: String,
    pub tag: String,
    /// Manifest digest, when the registry reports one
    pub digest: Option<String>,
    pub config_digest: String,
    pub architecture: String,
    pub os: String,
    pub created: DateTime<Utc>,
    pub layer_count: usize,
    /// Config size plus every layer's size
    pub size: u64,
}

#[derive(Clone)]
pub struct RegistryClient {
    client: Client,
    config: RegistryConfig,
    output: Logger,
    blobs: BlobOperations,
    manifests: ManifestOperations,
    repositories: RepositoryOperations,
}

impl RegistryClient {
    pub fn builder(config: RegistryConfig) -> RegistryClientBuilder {
        RegistryClientBuilder::new(config)
    }

    pub fn address(&self) -> &str {
        &self.config.url
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// GET /v2/; true only on 200, network errors included
    pub async fn check_v2_support(&self) -> bool {
        let url = format!("{}/v2/", self.config.url);
        match self.client.get(&url).send().await {
            Ok(response) => {
                let supported = response.status() == StatusCode::OK;
                if !supported {
                    self.output.detail(&format!(
                        "Registry API v2 probe at {} returned {}",
                        url,
                        response.status()
                    ));
                }
                supported
            }
            Err(e) => {
                self.output
                    .detail(&NetworkErrorHandler::describe(&e, "registry API v2 probe"));
                false
            }
        }
    }

    pub async fn blob_exists(&self, repository: &str, digest: &str) -> bool {
        self.blobs.blob_exists(repository, digest).await
    }

    pub async fn upload_blob(
        &self,
        repository: &str,
        payload: BlobPayload,
        digest: &str,
        chunk_size: usize,
        progress: Option<&dyn ProgressCallback>,
    ) -> Result<String> {
        self.blobs
            .upload_blob(repository, payload, digest, chunk_size, progress)
            .await
    }

    pub async fn get_blob(&self, repository: &str, digest: &str) -> Result<Vec<u8>> {
        self.blobs.get_blob(repository, digest).await
    }

    pub async fn upload_manifest(
        &self,
        repository: &str,
        reference: &str,
        manifest: Vec<u8>,
        media_type: &str,
    ) -> Result<String> {
        self.manifests
            .upload_manifest(repository, reference, manifest, media_type)
            .await
    }

    pub async fn get_manifest(&self, repository: &str, reference: &str) -> Result<serde_json::Value> {
        self.manifests.get_manifest(repository, reference).await
    }

    pub async fn get_manifest_digest(&self, repository: &str, reference: &str) -> Result<String> {
        self.manifests.get_manifest_digest(repository, reference).await
    }

    pub async fn delete_manifest(&self, repository: &str, digest: &str) -> Result<()> {
        self.manifests.delete_manifest(repository, digest).await
    }

    pub async fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
        self.repositories.list_tags(repository).await
    }

    pub async fn list_repositories(&self) -> Result<Vec<String>> {
        self.repositories.list_repositories().await
    }

    /// Manifest plus config summary for `repository:tag`
    pub async fn get_image_info(&self, repository: &str, tag: &str) -> Result<RemoteImageInfo> {
        let manifest = self.get_manifest(repository, tag).await?;
        let digest = self.get_manifest_digest(repository, tag).await.ok();

        let config_descriptor = &manifest["config"];
        let config_digest = config_descriptor["digest"]
            .as_str()
            .ok_or_else(|| {
                RegistryError::Registry(format!(
                    "Manifest for {}:{} has no config digest",
                    repository, tag
                ))
            })?
            .to_string();
        let layers = manifest["layers"].as_array().cloned().unwrap_or_default();
        let size = config_descriptor["size"].as_u64().unwrap_or(0)
            + layers
                .iter()
                .filter_map(|layer| layer["size"].as_u64())
                .sum::<u64>();

        let config_bytes = self.get_blob(repository, &config_digest).await?;
        let config: serde_json::Value = serde_json::from_slice(&config_bytes).map_err(|e| {
            RegistryError::Registry(format!("Invalid config blob {}: {}", config_digest, e))
        })?;

        Ok(RemoteImageInfo {
            repository: repository.to_string(),
            tag: tag.to_string(),
            digest,
            architecture: platform_field(config["architecture"].as_str(), DEFAULT_ARCHITECTURE),
            os: platform_field(config["os"].as_str(), DEFAULT_OS),
            created: parse_created(config["created"].as_str()),
            layer_count: layers.len(),
            config_digest,
            size,
        })
    }

    /// Delete the manifest `tag` points at. Every tag sharing that manifest
    /// goes with it.
    pub async fn delete_image(&self, repository: &str, tag: &str) -> Result<bool> {
        let digest = self.get_manifest_digest(repository, tag).await?;
        self.delete_image_by_digest(repository, &digest).await
    }

    pub async fn delete_image_by_digest(&self, repository: &str, digest: &str) -> Result<bool> {
        self.delete_manifest(repository, digest).await?;
        self.output
            .success(&format!("Deleted {}@{}", repository, digest));
        Ok(true)
    }
}
