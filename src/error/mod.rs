//! Error types and handlers for archive and registry operations

pub mod handlers;

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// The archive path does not exist
    #[error("Tar file not found: {}", .0.display())]
    ArchiveNotFound(PathBuf),
    /// Missing or malformed archive member
    #[error("Archive read error: {0}")]
    ArchiveRead(String),
    /// Structural archive invalidity or unusable input
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("Invalid digest format: {0}")]
    InvalidDigestFormat(String),
    /// Content does not hash to the digest it is stored under
    #[error("Digest mismatch for {context}: expected {expected}, computed {actual}")]
    DigestMismatch {
        context: String,
        expected: String,
        actual: String,
    },
    #[error("Failed to upload blob {digest}: {message}")]
    BlobUploadFailed { digest: String, message: String },
    #[error("Failed to upload manifest {repository}:{reference}: {message}")]
    ManifestUploadFailed {
        repository: String,
        reference: String,
        message: String,
    },
    #[error("Registry at {0} does not support v2 API")]
    RegistryUnreachable(String),
    #[error(
        "No repository specified and could not extract repository from tar file. \
         Provide a repository name or ensure the tar file contains valid repository tags"
    )]
    NoRepositorySpecified,
    #[error(
        "No original tags found in tar file. \
         Ensure the tar file contains valid repository tags"
    )]
    NoOriginalTags,
    /// Listing, get and delete failures
    #[error("Registry error: {0}")]
    Registry(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<std::io::Error> for RegistryError {
    fn from(err: std::io::Error) -> Self {
        RegistryError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        RegistryError::Parse(err.to_string())
    }
}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        RegistryError::Network(err.to_string())
    }
}

impl From<url::ParseError> for RegistryError {
    fn from(err: url::ParseError) -> Self {
        RegistryError::Validation(err.to_string())
    }
}

impl From<tokio::task::JoinError> for RegistryError {
    fn from(err: tokio::task::JoinError) -> Self {
        RegistryError::Io(format!("Background task failed: {}", err))
    }
}
