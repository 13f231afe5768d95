//! Docker Tar Pusher
//!
//! Pushes image-export tar archives (the output of `docker save`) to a
//! Docker Registry HTTP API v2 endpoint, and offers a few registry
//! introspection calls alongside.
//!
//! The archive is validated, its config and layers are hashed and described
//! as blobs, missing blobs are uploaded through resumable chunked sessions
//! with bounded concurrency, and a schema 2 manifest is written for the
//! requested tag or for every tag recorded in the archive.

pub mod cli;
pub mod config;
pub mod error;
pub mod image;
pub mod logging;
pub mod push;
pub mod registry;

pub use config::{PushConfig, RegistryConfig};
pub use error::{RegistryError, Result};
pub use logging::Logger;
pub use push::{
    ImagePusher, check_registry_connectivity, push_tar, push_with_all_original_tags,
    push_with_original_tags,
};
pub use registry::{RegistryClient, RegistryClientBuilder};
