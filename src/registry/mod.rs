//! Docker Registry HTTP API v2 transport
//!
//! No authentication is performed; the registry is expected to accept
//! anonymous pushes and reads.

pub mod client;
pub mod operations;
pub mod progress;

pub use client::{RegistryClient, RegistryClientBuilder, RemoteImageInfo};
pub use operations::{BlobPayload, UploadSession};
pub use progress::{ProgressCallback, ProgressTracker};
