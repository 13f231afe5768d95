//! Blob operations for registry client
//!
//! Implements Docker Registry v2 blob operations:
//! - Blob existence checks (HEAD /v2/{name}/blobs/{digest})
//! - Chunked upload sessions (POST /v2/{name}/blobs/uploads/, PATCH, PUT ?digest=)
//! - Blob download (GET /v2/{name}/blobs/{digest})
//!
//! An upload moves through session opened, chunks patched, finalized. Any
//! non-2xx response ends that upload; nothing is retried here.

use crate::error::handlers::{HttpErrorHandler, NetworkErrorHandler};
use crate::error::{RegistryError, Result};
use crate::image::archive::ChunkStream;
use crate::image::digest::DigestUtils;
use crate::logging::Logger;
use crate::registry::progress::ProgressCallback;
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, LOCATION};
use reqwest::{Client, Response, StatusCode};
use url::Url;

/// Bytes to upload, either already in memory or read lazily
pub enum BlobPayload {
    Buffer(Vec<u8>),
    Stream {
        chunks: ChunkStream,
        /// Payload length when known, for progress reporting
        total_size: Option<u64>,
    },
}

impl BlobPayload {
    pub fn total_size(&self) -> Option<u64> {
        match self {
            BlobPayload::Buffer(data) => Some(data.len() as u64),
            BlobPayload::Stream { total_size, .. } => *total_size,
        }
    }

    /// Uniform chunk sequence; buffers are split at `chunk_size`
    fn into_chunks(self, chunk_size: usize) -> ChunkStream {
        match self {
            BlobPayload::Buffer(data) => {
                let chunks: Vec<Result<Vec<u8>>> = data
                    .chunks(chunk_size)
                    .map(|chunk| Ok(chunk.to_vec()))
                    .collect();
                stream::iter(chunks).boxed()
            }
            BlobPayload::Stream { chunks, .. } => chunks,
        }
    }
}

impl From<Vec<u8>> for BlobPayload {
    fn from(data: Vec<u8>) -> Self {
        BlobPayload::Buffer(data)
    }
}

/// In-progress chunked upload
#[derive(Debug, Clone)]
pub struct UploadSession {
    /// Where the next PATCH or the final PUT goes
    pub location: Url,
    pub bytes_transferred: u64,
    pub digest: String,
}

#[derive(Clone)]
pub struct BlobOperations {
    client: Client,
    address: String,
    output: Logger,
}

impl BlobOperations {
    pub fn new(client: Client, address: String, output: Logger) -> Self {
        Self {
            client,
            address,
            output,
        }
    }

    /// HEAD the blob; anything but 200, including network failure, is `false`
    pub async fn blob_exists(&self, repository: &str, digest: &str) -> bool {
        let url = format!("{}/v2/{}/blobs/{}", self.address, repository, digest);
        match self.client.head(&url).send().await {
            Ok(response) => {
                let exists = response.status() == StatusCode::OK;
                self.output.detail(&format!(
                    "Blob {} {} in {}",
                    DigestUtils::format_short(digest),
                    if exists { "exists" } else { "missing" },
                    repository
                ));
                exists
            }
            Err(e) => {
                self.output.detail(&NetworkErrorHandler::describe(&e, "blob existence check"));
                false
            }
        }
    }

    /// Upload one blob through a chunked session and return its digest
    pub async fn upload_blob(
        &self,
        repository: &str,
        payload: BlobPayload,
        digest: &str,
        chunk_size: usize,
        progress: Option<&dyn ProgressCallback>,
    ) -> Result<String> {
        if !DigestUtils::validate(digest) {
            return Err(RegistryError::InvalidDigestFormat(digest.to_string()));
        }
        if chunk_size == 0 {
            return Err(RegistryError::InvalidInput(
                "Chunk size must be greater than 0".to_string(),
            ));
        }

        let total_size = payload.total_size();
        let label = format!("Uploading {}...", short_hex(digest));
        let mut session = self.start_upload(repository, digest).await?;
        self.output.detail(&format!(
            "Upload session for {} opened at {}",
            DigestUtils::format_short(digest),
            session.location
        ));

        let mut chunks = payload.into_chunks(chunk_size);
        while let Some(chunk) = chunks.try_next().await? {
            if chunk.is_empty() {
                continue;
            }
            self.upload_chunk(&mut session, chunk).await?;
            if let Some(progress) = progress {
                progress
                    .on_progress(session.bytes_transferred, total_size.unwrap_or(0), &label)
                    .await;
            }
        }

        self.finalize_upload(&session).await?;
        self.output.detail(&format!(
            "Blob {} uploaded ({})",
            DigestUtils::format_short(digest),
            self.output.format_size(session.bytes_transferred)
        ));
        Ok(session.digest)
    }

    async fn start_upload(&self, repository: &str, digest: &str) -> Result<UploadSession> {
        let url = format!("{}/v2/{}/blobs/uploads/", self.address, repository);
        let response = self
            .client
            .post(&url)
            .header(CONTENT_LENGTH, 0)
            .send()
            .await
            .map_err(|e| upload_failed(digest, NetworkErrorHandler::describe(&e, "upload start")))?;
        let response = check_upload_response(response, digest, "upload start").await?;

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| upload_failed(digest, "registry returned no upload Location".to_string()))?;

        Ok(UploadSession {
            location: resolve_location(&self.address, location)
                .map_err(|e| upload_failed(digest, e.to_string()))?,
            bytes_transferred: 0,
            digest: digest.to_string(),
        })
    }

    async fn upload_chunk(&self, session: &mut UploadSession, chunk: Vec<u8>) -> Result<()> {
        let start = session.bytes_transferred;
        let len = chunk.len() as u64;
        let response = self
            .client
            .patch(session.location.clone())
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, len)
            .header(CONTENT_RANGE, format!("{}-{}", start, start + len - 1))
            .body(chunk)
            .send()
            .await
            .map_err(|e| {
                upload_failed(&session.digest, NetworkErrorHandler::describe(&e, "chunk upload"))
            })?;
        let response = check_upload_response(response, &session.digest, "chunk upload").await?;

        if let Some(location) = response.headers().get(LOCATION).and_then(|v| v.to_str().ok()) {
            session.location = resolve_location(&self.address, location)
                .map_err(|e| upload_failed(&session.digest, e.to_string()))?;
        }
        session.bytes_transferred += len;
        Ok(())
    }

    async fn finalize_upload(&self, session: &UploadSession) -> Result<()> {
        let url = finalize_url(&session.location, &session.digest);
        let response = self
            .client
            .put(&url)
            .header(CONTENT_LENGTH, 0)
            .send()
            .await
            .map_err(|e| {
                upload_failed(&session.digest, NetworkErrorHandler::describe(&e, "upload finalization"))
            })?;
        check_upload_response(response, &session.digest, "upload finalization").await?;
        Ok(())
    }

    /// Download a blob's bytes
    pub async fn get_blob(&self, repository: &str, digest: &str) -> Result<Vec<u8>> {
        let url = format!("{}/v2/{}/blobs/{}", self.address, repository, digest);
        let context = format!("blob download {}@{}", repository, digest);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| RegistryError::Registry(NetworkErrorHandler::describe(&e, &context)))?;

        let status = response.status();
        if !status.is_success() {
            let body = HttpErrorHandler::error_body(response).await;
            return Err(RegistryError::Registry(
                HttpErrorHandler::describe_registry_error(status, &body, &context),
            ));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| RegistryError::Registry(NetworkErrorHandler::describe(&e, &context)))?;
        Ok(bytes.to_vec())
    }
}

fn upload_failed(digest: &str, message: String) -> RegistryError {
    RegistryError::BlobUploadFailed {
        digest: digest.to_string(),
        message,
    }
}

async fn check_upload_response(response: Response, digest: &str, context: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = HttpErrorHandler::error_body(response).await;
    Err(upload_failed(
        digest,
        HttpErrorHandler::describe_upload_error(status, &body, context),
    ))
}

fn short_hex(digest: &str) -> &str {
    let hex = digest.split_once(':').map(|(_, hex)| hex).unwrap_or(digest);
    &hex[..hex.len().min(12)]
}

/// Resolve an upload Location, which may be relative, against the registry base
pub fn resolve_location(base: &str, location: &str) -> Result<Url> {
    match Url::parse(location) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => Ok(Url::parse(base)?.join(location)?),
        Err(e) => Err(e.into()),
    }
}

/// The zero-length PUT target that completes an upload
pub fn finalize_url(location: &Url, digest: &str) -> String {
    let separator = if location.query().is_some() { "&" } else { "?" };
    format!("{}{}digest={}", location, separator, digest)
}
