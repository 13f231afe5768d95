//! Registry operations grouped by resource kind
//!
//! [`RegistryClient`](crate::registry::RegistryClient) composes these and
//! exposes them as one API.

pub mod blob_operations;
pub mod manifest_operations;
pub mod repository_operations;

pub use blob_operations::{BlobOperations, BlobPayload, UploadSession};
pub use manifest_operations::ManifestOperations;
pub use repository_operations::RepositoryOperations;
