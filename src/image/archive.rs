//! Image-export tar reader
//!
//! The archive is scanned once to record where every regular member's data
//! starts. The scan seeks over member data instead of reading it. After that, whole-member reads (manifest, config, repositories)
//! and chunked layer reads seek directly into the file. One file handle is
//! shared by all readers of an archive and its cursor is guarded by a mutex,
//! so concurrent layer streams each take the lock per chunk.
//!
//! The handle is reference counted. It is closed once the reader and every
//! stream produced from it have been dropped.

use crate::error::{RegistryError, Result};
use crate::image::digest::{Digest, DigestAlgorithm};
use crate::image::manifest::{BlobDescriptor, layer_media_type};
use crate::image::tags::parse_repository_tag;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const REPOSITORIES_FILE: &str = "repositories";

/// Platform assumed when an image config leaves it out
pub const DEFAULT_ARCHITECTURE: &str = "amd64";
pub const DEFAULT_OS: &str = "linux";

/// Chunk size used when hashing layers during extraction
const HASH_CHUNK_SIZE: usize = 1024 * 1024;

/// Lazy sequence of byte chunks for one archive member
pub type ChunkStream = BoxStream<'static, Result<Vec<u8>>>;

/// `{repository: {tag: id}}` from the legacy `repositories` file, in file order
pub type Repositories = Vec<(String, Vec<(String, String)>)>;

/// One entry of `manifest.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TarManifestEntry {
    #[serde(rename = "Config")]
    pub config: String,
    #[serde(rename = "RepoTags", default)]
    pub repo_tags: Option<Vec<String>>,
    #[serde(rename = "Layers")]
    pub layers: Vec<String>,
    #[serde(rename = "LayerSources", default, skip_serializing_if = "Option::is_none")]
    pub layer_sources: Option<HashMap<String, LayerSource>>,
}

/// Foreign layer description keyed by layer digest
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerSource {
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub digest: Option<String>,
}

/// Parsed summary of an archive, ready to push
#[derive(Debug, Clone)]
pub struct ImageArchiveInfo {
    pub repository: String,
    pub tag: String,
    pub config_digest: Digest,
    pub config_size: u64,
    pub config_path: String,
    /// Bottom layer first
    pub layers: Vec<BlobDescriptor>,
    pub architecture: String,
    pub os: String,
    pub created: DateTime<Utc>,
    /// Config bytes plus every layer's size
    pub total_size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MemberLocation {
    offset: u64,
    size: u64,
}

/// Member name to data location map for one archive file
#[derive(Debug, Clone)]
pub struct ArchiveIndex {
    path: PathBuf,
    members: HashMap<String, MemberLocation>,
}

impl ArchiveIndex {
    /// Walk every header of the archive. Blocking.
    pub fn scan(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| {
            RegistryError::ArchiveRead(format!("Failed to open {}: {}", path.display(), e))
        })?;
        Self::scan_reader(file, path)
    }

    /// Index a seekable tar stream whose bytes live at `path`
    fn scan_reader<R: Read + Seek>(reader: R, path: &Path) -> Result<Self> {
        let mut archive = tar::Archive::new(reader);
        let mut members = HashMap::new();
        let mut links = Vec::new();

        let entries = archive
            .entries_with_seek()
            .map_err(|e| RegistryError::ArchiveRead(format!("Failed to read tar entries: {}", e)))?;

        for entry in entries {
            let entry = entry
                .map_err(|e| RegistryError::ArchiveRead(format!("Failed to read tar entry: {}", e)))?;
            let name = entry
                .path()
                .map_err(|e| RegistryError::ArchiveRead(format!("Failed to read entry path: {}", e)))?
                .to_string_lossy()
                .to_string();
            let name = normalize_member_name(&name);
            let entry_type = entry.header().entry_type();

            if entry_type.is_file() {
                members.insert(
                    name,
                    MemberLocation {
                        offset: entry.raw_file_position(),
                        size: entry.size(),
                    },
                );
            } else if entry_type.is_symlink() || entry_type.is_hard_link() {
                // docker save links duplicate layers to the first copy
                if let Ok(Some(target)) = entry.link_name() {
                    let target = target.to_string_lossy().to_string();
                    let target = if entry_type.is_symlink() {
                        resolve_relative(&name, &target)
                    } else {
                        normalize_member_name(&target)
                    };
                    links.push((name, target));
                }
            }
        }

        for (name, target) in links {
            if let Some(location) = members.get(&target).copied() {
                members.insert(name, location);
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            members,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, name: &str) -> bool {
        self.members.contains_key(name)
    }

    /// Sorted member names
    pub fn members(&self) -> Vec<String> {
        let mut names: Vec<String> = self.members.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn member_size(&self, name: &str) -> Option<u64> {
        self.members.get(name).map(|location| location.size)
    }

    fn location(&self, name: &str) -> Result<MemberLocation> {
        self.members.get(name).copied().ok_or_else(|| {
            RegistryError::ArchiveRead(format!("File {} not found in tar", name))
        })
    }

    /// Read a whole member with a fresh file handle. Blocking.
    pub fn read_member(&self, name: &str) -> Result<Vec<u8>> {
        let location = self.location(name)?;
        let read = || -> std::io::Result<Vec<u8>> {
            let mut file = std::fs::File::open(&self.path)?;
            file.seek(SeekFrom::Start(location.offset))?;
            let mut buf = vec![0u8; location.size as usize];
            file.read_exact(&mut buf)?;
            Ok(buf)
        };
        read().map_err(|e| RegistryError::ArchiveRead(format!("Failed to extract {}: {}", name, e)))
    }
}

fn normalize_member_name(name: &str) -> String {
    let mut name = name;
    while let Some(stripped) = name.strip_prefix("./") {
        name = stripped;
    }
    name.trim_end_matches('/').to_string()
}

/// Resolve a symlink target relative to the directory holding the link
fn resolve_relative(link: &str, target: &str) -> String {
    let mut parts: Vec<&str> = if target.starts_with('/') {
        Vec::new()
    } else {
        link.split('/').collect()
    };
    parts.pop();
    for component in target.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

/// Digest carried by a member path such as `<hex>.json` or `blobs/sha256/<hex>`
pub fn digest_from_member_path(path: &str) -> Option<Digest> {
    let mut segments = path.rsplit('/');
    let file = segments.next()?;
    let hex = file.strip_suffix(".json").unwrap_or(file);
    let algorithm = match (segments.next(), path.starts_with("blobs/")) {
        (Some(algorithm), true) => algorithm.parse::<DigestAlgorithm>().ok()?,
        (_, false) => DigestAlgorithm::Sha256,
        (None, true) => return None,
    };
    if hex.len() != algorithm.hex_len() {
        return None;
    }
    format!("{}:{}", algorithm, hex).parse().ok()
}

struct ArchiveHandle {
    file: Mutex<tokio::fs::File>,
    index: ArchiveIndex,
}

impl ArchiveHandle {
    async fn read_at(&self, offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf).await?;
        Ok(buf)
    }
}

/// Async reader over an image-export archive
#[derive(Clone)]
pub struct TarImageReader {
    handle: Arc<ArchiveHandle>,
}

impl TarImageReader {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(RegistryError::ArchiveNotFound(path));
        }

        let index = tokio::task::spawn_blocking(move || ArchiveIndex::scan(&path)).await??;
        Self::from_index(index).await
    }

    /// Reader over an archive that has already been indexed
    pub async fn from_index(index: ArchiveIndex) -> Result<Self> {
        let path = index.path();
        let file = tokio::fs::File::open(path).await.map_err(|e| {
            RegistryError::ArchiveRead(format!("Failed to open {}: {}", path.display(), e))
        })?;

        Ok(Self {
            handle: Arc::new(ArchiveHandle {
                file: Mutex::new(file),
                index,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        self.handle.index.path()
    }

    pub fn index(&self) -> &ArchiveIndex {
        &self.handle.index
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handle.index.contains(name)
    }

    pub async fn read_member(&self, name: &str) -> Result<Vec<u8>> {
        let location = self.handle.index.location(name)?;
        self.handle
            .read_at(location.offset, location.size as usize)
            .await
            .map_err(|e| RegistryError::ArchiveRead(format!("Failed to extract {}: {}", name, e)))
    }

    pub async fn get_manifest(&self) -> Result<Vec<TarManifestEntry>> {
        let bytes = self
            .read_member(MANIFEST_FILE)
            .await
            .map_err(|e| RegistryError::ArchiveRead(format!("Failed to read manifest.json: {}", e)))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| RegistryError::ArchiveRead(format!("Failed to read manifest.json: {}", e)))
    }

    /// Config blob stored under the digest's hex, in either archive layout
    pub async fn get_config(&self, config_digest: &Digest) -> Result<Vec<u8>> {
        let candidates = [
            format!("{}.json", config_digest.hex),
            format!("blobs/{}/{}", config_digest.algorithm, config_digest.hex),
        ];
        for candidate in &candidates {
            if self.contains(candidate) {
                return self.read_member(candidate).await;
            }
        }
        Err(RegistryError::ArchiveRead(format!(
            "Failed to read config {}: not found as {}",
            config_digest,
            candidates.join(" or ")
        )))
    }

    /// Legacy tag map; empty when the file is missing or malformed
    pub async fn get_repositories(&self) -> Repositories {
        match self.read_member(REPOSITORIES_FILE).await {
            Ok(bytes) => parse_repositories(&bytes).unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    /// Stream one member in chunks of at most `chunk_size` bytes
    pub fn layer_stream(&self, layer_path: &str, chunk_size: usize) -> Result<ChunkStream> {
        if chunk_size == 0 {
            return Err(RegistryError::InvalidInput(
                "Chunk size must be greater than 0".to_string(),
            ));
        }
        let location = self.handle.index.location(layer_path).map_err(|_| {
            RegistryError::ArchiveRead(format!("Failed to read layer {}: not in archive", layer_path))
        })?;
        let handle = Arc::clone(&self.handle);
        let name = layer_path.to_string();

        let chunks = stream::try_unfold(0u64, move |position| {
            let handle = Arc::clone(&handle);
            let name = name.clone();
            async move {
                if position >= location.size {
                    return Ok::<_, RegistryError>(None);
                }
                let len = (location.size - position).min(chunk_size as u64) as usize;
                let chunk = handle
                    .read_at(location.offset + position, len)
                    .await
                    .map_err(|e| {
                        RegistryError::ArchiveRead(format!("Failed to read layer {}: {}", name, e))
                    })?;
                Ok(Some((chunk, position + len as u64)))
            }
        });
        Ok(chunks.boxed())
    }

    /// Parse the first manifest entry into a push-ready summary.
    ///
    /// Every layer is rehashed from its bytes. A digest carried in a member
    /// path must match the rehash or extraction fails.
    pub async fn extract_image_info(&self) -> Result<ImageArchiveInfo> {
        let manifest = self.get_manifest().await?;
        let entry = manifest
            .into_iter()
            .next()
            .ok_or_else(|| RegistryError::ArchiveRead("Empty manifest".to_string()))?;

        let config_bytes = self.read_member(&entry.config).await?;
        let config_digest = match digest_from_member_path(&entry.config) {
            Some(expected) => {
                let actual = hash_bytes(expected.algorithm, &config_bytes);
                if actual != expected {
                    return Err(RegistryError::DigestMismatch {
                        context: format!("config {}", entry.config),
                        expected: expected.to_string(),
                        actual: actual.to_string(),
                    });
                }
                expected
            }
            None => Digest::sha256(&config_bytes),
        };
        let config: serde_json::Value = serde_json::from_slice(&config_bytes)
            .map_err(|e| RegistryError::ArchiveRead(format!("Failed to parse config {}: {}", entry.config, e)))?;

        let (repository, tag) = self.resolve_name(&entry).await;

        let mut layers = Vec::with_capacity(entry.layers.len());
        for layer_path in &entry.layers {
            layers.push(self.describe_layer(layer_path).await?);
        }

        let total_size = config_bytes.len() as u64 + layers.iter().map(|l| l.size).sum::<u64>();

        Ok(ImageArchiveInfo {
            repository,
            tag,
            config_size: config_bytes.len() as u64,
            config_path: entry.config.clone(),
            config_digest,
            layers,
            architecture: platform_field(config["architecture"].as_str(), DEFAULT_ARCHITECTURE),
            os: platform_field(config["os"].as_str(), DEFAULT_OS),
            created: parse_created(config.get("created").and_then(|v| v.as_str())),
            total_size,
        })
    }

    /// Repository and tag: `repositories` file first, then RepoTags
    async fn resolve_name(&self, entry: &TarManifestEntry) -> (String, String) {
        let repositories = self.get_repositories().await;
        if let Some((repository, tags)) = repositories.into_iter().next() {
            let tag = tags
                .into_iter()
                .next()
                .map(|(tag, _)| tag)
                .unwrap_or_else(|| "latest".to_string());
            return (repository, tag);
        }
        match entry.repo_tags.as_ref().and_then(|tags| tags.first()) {
            Some(repo_tag) => parse_repository_tag(repo_tag),
            None => ("unknown".to_string(), "latest".to_string()),
        }
    }

    async fn describe_layer(&self, layer_path: &str) -> Result<BlobDescriptor> {
        let embedded = digest_from_member_path(layer_path);
        let algorithm = embedded
            .as_ref()
            .map(|d| d.algorithm)
            .unwrap_or(DigestAlgorithm::Sha256);

        let mut hasher = algorithm.hasher();
        let mut size = 0u64;
        let mut media_type = None;
        let mut chunks = self.layer_stream(layer_path, HASH_CHUNK_SIZE)?;
        while let Some(chunk) = chunks.try_next().await? {
            if media_type.is_none() {
                media_type = Some(layer_media_type(&chunk));
            }
            size += chunk.len() as u64;
            hasher.update(&chunk);
        }
        let digest = hasher.finalize();

        if let Some(expected) = embedded {
            if expected != digest {
                return Err(RegistryError::DigestMismatch {
                    context: format!("layer {}", layer_path),
                    expected: expected.to_string(),
                    actual: digest.to_string(),
                });
            }
        }

        Ok(BlobDescriptor {
            digest,
            size,
            media_type: media_type.unwrap_or_else(|| layer_media_type(&[])).to_string(),
            source: layer_path.to_string(),
        })
    }
}

pub(crate) fn parse_repositories(bytes: &[u8]) -> Option<Repositories> {
    let map: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(bytes).ok()?;
    Some(
        map.into_iter()
            .filter_map(|(repository, tags)| {
                let tags = tags.as_object()?;
                let tags = tags
                    .iter()
                    .map(|(tag, id)| {
                        let id = id.as_str().map(str::to_string).unwrap_or_else(|| id.to_string());
                        (tag.clone(), id)
                    })
                    .collect();
                Some((repository, tags))
            })
            .collect(),
    )
}

fn hash_bytes(algorithm: DigestAlgorithm, data: &[u8]) -> Digest {
    let mut hasher = algorithm.hasher();
    hasher.update(data);
    hasher.finalize()
}

/// Absent or empty platform values fall back to `default`
pub(crate) fn platform_field(value: Option<&str>, default: &str) -> String {
    value.filter(|s| !s.is_empty()).unwrap_or(default).to_string()
}

/// RFC 3339 creation time; falls back to now when absent or unparsable
pub(crate) fn parse_created(created: Option<&str>) -> DateTime<Utc> {
    created
        .filter(|s| !s.is_empty())
        .and_then(|s| DateTime::parse_from_rfc3339(&s.replace('Z', "+00:00")).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::cell::Cell;
    use std::io::Cursor;
    use std::rc::Rc;

    struct CountingReader<R> {
        inner: R,
        bytes_read: Rc<Cell<u64>>,
    }

    impl<R: Read> Read for CountingReader<R> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = self.inner.read(buf)?;
            self.bytes_read.set(self.bytes_read.get() + n as u64);
            Ok(n)
        }
    }

    impl<R: Seek> Seek for CountingReader<R> {
        fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    fn tar_bytes(members: &[(&str, Vec<u8>)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in members {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, data.as_slice()).unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn test_scan_skips_member_data() {
        let layer_size = 8 * 1024 * 1024;
        let bytes = tar_bytes(&[
            ("manifest.json", b"[]".to_vec()),
            ("abc/layer.tar", vec![7u8; layer_size]),
            ("def/layer.tar", vec![9u8; layer_size]),
        ]);
        let bytes_read = Rc::new(Cell::new(0));
        let reader = CountingReader {
            inner: Cursor::new(bytes),
            bytes_read: Rc::clone(&bytes_read),
        };

        let index = ArchiveIndex::scan_reader(reader, Path::new("image.tar")).unwrap();

        assert_eq!(index.member_size("abc/layer.tar"), Some(layer_size as u64));
        assert_eq!(index.member_size("def/layer.tar"), Some(layer_size as u64));
        assert!(
            bytes_read.get() < 64 * 1024,
            "scan read {} bytes",
            bytes_read.get()
        );
    }

    #[test]
    fn test_normalize_member_name() {
        assert_eq!(normalize_member_name("./manifest.json"), "manifest.json");
        assert_eq!(normalize_member_name("abc/"), "abc");
        assert_eq!(normalize_member_name("blobs/sha256/ff"), "blobs/sha256/ff");
    }

    #[test]
    fn test_resolve_relative_symlink() {
        assert_eq!(resolve_relative("b/layer.tar", "../a/layer.tar"), "a/layer.tar");
        assert_eq!(resolve_relative("b/layer.tar", "other.tar"), "b/other.tar");
    }

    #[test]
    fn test_digest_from_member_path() {
        let hex = "a".repeat(64);
        let legacy = digest_from_member_path(&format!("{}.json", hex)).unwrap();
        assert_eq!(legacy.to_string(), format!("sha256:{}", hex));

        let oci = digest_from_member_path(&format!("blobs/sha256/{}", hex)).unwrap();
        assert_eq!(oci, legacy);

        assert!(digest_from_member_path("config.json").is_none());
        assert!(digest_from_member_path(&format!("{}/layer.tar", hex)).is_none());
        assert!(digest_from_member_path("abc.json").is_none());
        assert!(digest_from_member_path(&format!("blobs/blake3/{}", hex)).is_none());
    }

    #[test]
    fn test_parse_repositories_keeps_file_order() {
        let repos = parse_repositories(br#"{"zeta":{"v2":"x","v1":"y"},"alpha":{"latest":"z"}}"#)
            .unwrap();
        assert_eq!(repos[0].0, "zeta");
        assert_eq!(repos[0].1[0].0, "v2");
        assert_eq!(repos[1].0, "alpha");
        assert!(parse_repositories(b"not json").is_none());
    }

    #[test]
    fn test_platform_field_defaults() {
        assert_eq!(platform_field(Some("arm64"), DEFAULT_ARCHITECTURE), "arm64");
        assert_eq!(platform_field(Some(""), DEFAULT_ARCHITECTURE), "amd64");
        assert_eq!(platform_field(None, DEFAULT_OS), "linux");
    }

    #[test]
    fn test_parse_created() {
        let parsed = parse_created(Some("2024-03-01T12:30:00.123456789Z"));
        assert_eq!(parsed.date_naive(), Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap().date_naive());

        let before = Utc::now();
        let fallback = parse_created(Some("yesterday"));
        assert!(fallback >= before);
        assert!(parse_created(None) >= before);
    }
}
