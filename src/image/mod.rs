//! Image-export archive handling
//!
//! Everything here works on the local tar file only:
//!
//! - [`archive`]: member index, manifest/config reads and chunked layer streams
//! - [`tags`]: original `repository:tag` extraction
//! - [`validator`]: structural checks before anything is uploaded
//! - [`manifest`]: registry manifest v2 construction
//! - [`digest`]: content digests
//! - [`inspect`]: read-only summaries for display
//!
//! ```no_run
//! use docker_tar_pusher::image::TarImageReader;
//!
//! # async fn example() -> docker_tar_pusher::error::Result<()> {
//! let reader = TarImageReader::open("nginx.tar").await?;
//! let info = reader.extract_image_info().await?;
//! println!("{}:{} has {} layers", info.repository, info.tag, info.layers.len());
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod digest;
pub mod inspect;
pub mod manifest;
pub mod tags;
pub mod validator;

pub use archive::{ArchiveIndex, ChunkStream, ImageArchiveInfo, TarImageReader, TarManifestEntry};
pub use digest::{Digest, DigestAlgorithm, DigestUtils};
pub use inspect::{ImageInspect, inspect_docker_tar};
pub use manifest::{BlobDescriptor, ImageManifestV2, ManifestBuilder, ManifestInfo};
pub use tags::{
    extract_original_tags, extract_original_tags_from, extract_repo_tags_from_manifest,
    extract_repo_tags_from_repositories, get_primary_tag, parse_repository_tag, primary_tag_from,
};
pub use validator::{get_tar_manifest, validate_docker_tar, validate_index};
