//! Manifest operations for registry client
//!
//! PUT/GET/HEAD/DELETE on /v2/{name}/manifests/{reference}

use crate::error::handlers::{HttpErrorHandler, NetworkErrorHandler};
use crate::error::{RegistryError, Result};
use crate::image::manifest::MANIFEST_V2_MEDIA_TYPE;
use crate::logging::Logger;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response};

pub const DOCKER_CONTENT_DIGEST: &str = "Docker-Content-Digest";

#[derive(Clone)]
pub struct ManifestOperations {
    client: Client,
    address: String,
    output: Logger,
}

impl ManifestOperations {
    pub fn new(client: Client, address: String, output: Logger) -> Self {
        Self {
            client,
            address,
            output,
        }
    }

    fn manifest_url(&self, repository: &str, reference: &str) -> String {
        format!("{}/v2/{}/manifests/{}", self.address, repository, reference)
    }

    /// PUT a manifest; returns the registry's `Docker-Content-Digest`, or an
    /// empty string when the header is absent
    pub async fn upload_manifest(
        &self,
        repository: &str,
        reference: &str,
        manifest: Vec<u8>,
        media_type: &str,
    ) -> Result<String> {
        let failed = |message: String| RegistryError::ManifestUploadFailed {
            repository: repository.to_string(),
            reference: reference.to_string(),
            message,
        };

        let response = self
            .client
            .put(self.manifest_url(repository, reference))
            .header(CONTENT_TYPE, media_type)
            .body(manifest)
            .send()
            .await
            .map_err(|e| failed(NetworkErrorHandler::describe(&e, "manifest upload")))?;

        let status = response.status();
        if !status.is_success() {
            let body = HttpErrorHandler::error_body(response).await;
            return Err(failed(HttpErrorHandler::describe_upload_error(
                status,
                &body,
                "manifest upload",
            )));
        }

        let digest = content_digest(&response).unwrap_or_default();
        self.output.detail(&format!(
            "Manifest {}:{} stored{}",
            repository,
            reference,
            if digest.is_empty() {
                String::new()
            } else {
                format!(" as {}", digest)
            }
        ));
        Ok(digest)
    }

    /// Fetch a manifest as JSON
    pub async fn get_manifest(&self, repository: &str, reference: &str) -> Result<serde_json::Value> {
        let context = format!("manifest fetch {}:{}", repository, reference);
        let response = self
            .send_checked(
                self.client
                    .get(self.manifest_url(repository, reference))
                    .header(ACCEPT, MANIFEST_V2_MEDIA_TYPE),
                &context,
            )
            .await?;
        response
            .json()
            .await
            .map_err(|e| RegistryError::Registry(format!("{}: invalid manifest JSON: {}", context, e)))
    }

    /// Resolve a reference to its manifest digest without downloading the body
    pub async fn get_manifest_digest(&self, repository: &str, reference: &str) -> Result<String> {
        let context = format!("manifest digest lookup {}:{}", repository, reference);
        let response = self
            .send_checked(
                self.client
                    .head(self.manifest_url(repository, reference))
                    .header(ACCEPT, MANIFEST_V2_MEDIA_TYPE),
                &context,
            )
            .await?;
        content_digest(&response).ok_or_else(|| {
            RegistryError::Registry(format!(
                "{}: registry returned no {} header",
                context, DOCKER_CONTENT_DIGEST
            ))
        })
    }

    pub async fn delete_manifest(&self, repository: &str, digest: &str) -> Result<()> {
        let context = format!("manifest delete {}@{}", repository, digest);
        self.send_checked(self.client.delete(self.manifest_url(repository, digest)), &context)
            .await?;
        self.output.detail(&format!("Deleted manifest {}@{}", repository, digest));
        Ok(())
    }

    async fn send_checked(&self, request: reqwest::RequestBuilder, context: &str) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| RegistryError::Registry(NetworkErrorHandler::describe(&e, context)))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = HttpErrorHandler::error_body(response).await;
        Err(RegistryError::Registry(
            HttpErrorHandler::describe_registry_error(status, &body, context),
        ))
    }
}

fn content_digest(response: &Response) -> Option<String> {
    response
        .headers()
        .get(DOCKER_CONTENT_DIGEST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
