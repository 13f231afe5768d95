//! Shared fixtures: synthetic image archives and an in-process registry
#![allow(dead_code)]

use flate2::Compression;
use flate2::write::GzEncoder;
use serde_json::json;
use sha2::{Digest as _, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::any;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const MANIFEST_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{}", sha256_hex(data))
}

/// One member of an outer archive
pub enum Member {
    File(String, Vec<u8>),
    Symlink(String, String),
}

pub fn file(name: &str, data: impl Into<Vec<u8>>) -> Member {
    Member::File(name.to_string(), data.into())
}

pub fn write_tar(path: &Path, members: &[Member]) {
    let out = std::fs::File::create(path).unwrap();
    let mut builder = tar::Builder::new(out);
    for member in members {
        match member {
            Member::File(name, data) => {
                let mut header = tar::Header::new_gnu();
                header.set_size(data.len() as u64);
                header.set_mode(0o644);
                header.set_mtime(0);
                builder.append_data(&mut header, name, data.as_slice()).unwrap();
            }
            Member::Symlink(name, target) => {
                let mut header = tar::Header::new_gnu();
                header.set_entry_type(tar::EntryType::Symlink);
                header.set_size(0);
                header.set_mode(0o777);
                header.set_mtime(0);
                header.set_link_name(target).unwrap();
                builder.append_data(&mut header, name, std::io::empty()).unwrap();
            }
        }
    }
    builder.finish().unwrap();
}

/// A small uncompressed layer holding one file
pub fn layer_tar(name: &str, contents: &[u8]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    builder.append_data(&mut header, name, contents).unwrap();
    builder.into_inner().unwrap()
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// `<hex>.json` config and `<id>/layer.tar` layers
    Legacy,
    /// Everything under `blobs/sha256/<hex>`
    Oci,
}

/// Builder for an image-export archive on disk
pub struct ImageFixture {
    pub config: Vec<u8>,
    pub layers: Vec<Vec<u8>>,
    pub repo_tags: Option<Vec<String>>,
    pub repositories: Option<String>,
    pub layout: Layout,
}

impl ImageFixture {
    pub fn new(layer_count: usize) -> Self {
        let layers: Vec<Vec<u8>> = (0..layer_count)
            .map(|i| layer_tar(&format!("file{}.txt", i), format!("layer {} contents\n", i).as_bytes()))
            .collect();
        Self {
            config: Vec::new(),
            layers,
            repo_tags: Some(vec!["test/app:v1".to_string()]),
            repositories: None,
            layout: Layout::Legacy,
        }
        .refresh_config()
    }

    pub fn oci(mut self) -> Self {
        self.layout = Layout::Oci;
        self
    }

    pub fn with_repo_tags(mut self, tags: &[&str]) -> Self {
        self.repo_tags = Some(tags.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn without_repo_tags(mut self) -> Self {
        self.repo_tags = None;
        self
    }

    pub fn with_repositories(mut self, json: &str) -> Self {
        self.repositories = Some(json.to_string());
        self
    }

    /// Replace the bottom layer with a gzip-compressed one
    pub fn with_gzip_layer(mut self) -> Self {
        if let Some(first) = self.layers.first_mut() {
            *first = gzip(first.as_slice());
        }
        self.refresh_config()
    }

    fn refresh_config(mut self) -> Self {
        let diff_ids: Vec<String> = self.layers.iter().map(|l| sha256_digest(l)).collect();
        self.config = serde_json::to_vec(&json!({
            "architecture": "arm64",
            "os": "linux",
            "created": "2024-05-01T10:00:00Z",
            "config": {
                "Cmd": ["nginx", "-g", "daemon off;"],
                "Env": ["PATH=/usr/bin"],
                "WorkingDir": "/srv",
                "ExposedPorts": {"80/tcp": {}},
                "Labels": {"maintainer": "ops"}
            },
            "rootfs": {"type": "layers", "diff_ids": diff_ids}
        }))
        .unwrap();
        self
    }

    pub fn config_path(&self) -> String {
        match self.layout {
            Layout::Legacy => format!("{}.json", sha256_hex(&self.config)),
            Layout::Oci => format!("blobs/sha256/{}", sha256_hex(&self.config)),
        }
    }

    pub fn layer_paths(&self) -> Vec<String> {
        self.layers
            .iter()
            .enumerate()
            .map(|(i, layer)| match self.layout {
                Layout::Legacy => format!("layer{:02}/layer.tar", i),
                Layout::Oci => format!("blobs/sha256/{}", sha256_hex(layer)),
            })
            .collect()
    }

    pub fn manifest_json(&self) -> Vec<u8> {
        let mut entry = json!({
            "Config": self.config_path(),
            "Layers": self.layer_paths(),
        });
        if let Some(tags) = &self.repo_tags {
            entry["RepoTags"] = json!(tags);
        }
        serde_json::to_vec(&json!([entry])).unwrap()
    }

    pub fn members(&self) -> Vec<Member> {
        let mut members = vec![file(&self.config_path(), self.config.clone())];
        let mut seen = Vec::new();
        for (path, layer) in self.layer_paths().into_iter().zip(&self.layers) {
            if !seen.contains(&path) {
                members.push(file(&path, layer.clone()));
                seen.push(path);
            }
        }
        members.push(file("manifest.json", self.manifest_json()));
        if let Some(repositories) = &self.repositories {
            members.push(file("repositories", repositories.clone()));
        }
        members
    }

    pub fn write(&self, dir: &Path) -> PathBuf {
        let path = dir.join("image.tar");
        write_tar(&path, &self.members());
        path
    }

    pub fn layer_digests(&self) -> Vec<String> {
        self.layers.iter().map(|l| sha256_digest(l)).collect()
    }

    pub fn config_digest(&self) -> String {
        sha256_digest(&self.config)
    }
}

/// Request counters recorded by [`FakeRegistry`]
#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub blob_heads: usize,
    pub upload_starts: usize,
    pub patches: usize,
    pub blob_puts: usize,
    pub manifest_puts: usize,
    pub open_sessions: usize,
    pub max_open_sessions: usize,
}

#[derive(Default)]
struct RegistryState {
    blobs: HashMap<(String, String), Vec<u8>>,
    uploads: HashMap<String, Vec<u8>>,
    /// (repository, reference) to manifest bytes
    manifests: HashMap<(String, String), Vec<u8>>,
    next_upload: usize,
    omit_manifest_digest: bool,
    /// Status returned for every manifest PUT instead of storing it
    manifest_rejection: Option<u16>,
    stats: Stats,
}

struct RegistryResponder {
    state: Arc<Mutex<RegistryState>>,
    patch_delay: Duration,
}

impl Respond for RegistryResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let mut state = self.state.lock().unwrap();
        let method = request.method.as_str().to_string();
        let path = request.url.path().to_string();

        if path == "/v2/" || path == "/v2" {
            return ResponseTemplate::new(200).set_body_json(json!({}));
        }
        let Some(rest) = path.strip_prefix("/v2/") else {
            return ResponseTemplate::new(404);
        };

        if rest == "_catalog" {
            let mut repositories: Vec<String> = state.manifests.keys().map(|(r, _)| r.clone()).collect();
            repositories.sort();
            repositories.dedup();
            return ResponseTemplate::new(200).set_body_json(json!({ "repositories": repositories }));
        }

        if let Some(repository) = rest.strip_suffix("/tags/list") {
            let mut tags: Vec<String> = state
                .manifests
                .keys()
                .filter(|(r, reference)| r == repository && !reference.starts_with("sha256:"))
                .map(|(_, reference)| reference.clone())
                .collect();
            if tags.is_empty() {
                return ResponseTemplate::new(404);
            }
            tags.sort();
            return ResponseTemplate::new(200).set_body_json(json!({ "name": repository, "tags": tags }));
        }

        if let Some(at) = rest.find("/blobs/uploads/") {
            let repository = rest[..at].to_string();
            let id = rest[at + "/blobs/uploads/".len()..].to_string();
            return match method.as_str() {
                "POST" => {
                    state.next_upload += 1;
                    let id = format!("upload-{}", state.next_upload);
                    state.uploads.insert(id.clone(), Vec::new());
                    state.stats.upload_starts += 1;
                    state.stats.open_sessions += 1;
                    state.stats.max_open_sessions =
                        state.stats.max_open_sessions.max(state.stats.open_sessions);
                    ResponseTemplate::new(202).insert_header(
                        "Location",
                        format!("/v2/{}/blobs/uploads/{}?_state=s0", repository, id).as_str(),
                    )
                }
                "PATCH" => {
                    state.stats.patches += 1;
                    let Some(buffer) = state.uploads.get_mut(&id) else {
                        return ResponseTemplate::new(404);
                    };
                    buffer.extend_from_slice(&request.body);
                    let end = buffer.len();
                    ResponseTemplate::new(202)
                        .insert_header(
                            "Location",
                            format!("/v2/{}/blobs/uploads/{}?_state=s{}", repository, id, end).as_str(),
                        )
                        .insert_header("Range", format!("0-{}", end.saturating_sub(1)).as_str())
                        .set_delay(self.patch_delay)
                }
                "PUT" => {
                    state.stats.blob_puts += 1;
                    state.stats.open_sessions = state.stats.open_sessions.saturating_sub(1);
                    let Some(mut buffer) = state.uploads.remove(&id) else {
                        return ResponseTemplate::new(404);
                    };
                    buffer.extend_from_slice(&request.body);
                    let digest = request
                        .url
                        .query_pairs()
                        .find(|(key, _)| key == "digest")
                        .map(|(_, value)| value.to_string())
                        .unwrap_or_default();
                    if sha256_digest(&buffer) != digest {
                        return ResponseTemplate::new(400)
                            .set_body_json(json!({"errors": [{"code": "DIGEST_INVALID"}]}));
                    }
                    state.blobs.insert((repository, digest.clone()), buffer);
                    ResponseTemplate::new(201).insert_header("Docker-Content-Digest", digest.as_str())
                }
                _ => ResponseTemplate::new(405),
            };
        }

        if let Some(at) = rest.find("/blobs/") {
            let key = (rest[..at].to_string(), rest[at + "/blobs/".len()..].to_string());
            if method == "HEAD" {
                state.stats.blob_heads += 1;
            }
            return match state.blobs.get(&key) {
                Some(blob) if method == "GET" => ResponseTemplate::new(200).set_body_bytes(blob.clone()),
                Some(_) => ResponseTemplate::new(200),
                None => ResponseTemplate::new(404),
            };
        }

        if let Some(at) = rest.find("/manifests/") {
            let repository = rest[..at].to_string();
            let reference = rest[at + "/manifests/".len()..].to_string();
            return match method.as_str() {
                "PUT" => {
                    state.stats.manifest_puts += 1;
                    if let Some(status) = state.manifest_rejection {
                        return ResponseTemplate::new(status)
                            .set_body_json(json!({"errors": [{"code": "MANIFEST_INVALID"}]}));
                    }
                    let body = request.body.clone();
                    let digest = sha256_digest(&body);
                    state
                        .manifests
                        .insert((repository.clone(), reference), body.clone());
                    state.manifests.insert((repository, digest.clone()), body);
                    if state.omit_manifest_digest {
                        ResponseTemplate::new(201)
                    } else {
                        ResponseTemplate::new(201).insert_header("Docker-Content-Digest", digest.as_str())
                    }
                }
                "GET" | "HEAD" => match state.manifests.get(&(repository, reference)) {
                    Some(body) => ResponseTemplate::new(200)
                        .insert_header("Docker-Content-Digest", sha256_digest(body).as_str())
                        .set_body_raw(body.clone(), MANIFEST_MEDIA_TYPE),
                    None => ResponseTemplate::new(404)
                        .set_body_json(json!({"errors": [{"code": "MANIFEST_UNKNOWN"}]})),
                },
                "DELETE" => {
                    let before = state.manifests.len();
                    state.manifests.retain(|(r, _), body| {
                        !(r == &repository && sha256_digest(body) == reference)
                    });
                    if state.manifests.len() < before {
                        ResponseTemplate::new(202)
                    } else {
                        ResponseTemplate::new(404)
                    }
                }
                _ => ResponseTemplate::new(405),
            };
        }

        ResponseTemplate::new(404)
    }
}

/// Stateful registry speaking enough of the v2 API for pushes and lookups
pub struct FakeRegistry {
    pub server: MockServer,
    state: Arc<Mutex<RegistryState>>,
}

impl FakeRegistry {
    pub async fn start() -> Self {
        Self::start_with_patch_delay(Duration::ZERO).await
    }

    /// Every PATCH response is held back by `delay`, so uploads overlap
    pub async fn start_with_patch_delay(delay: Duration) -> Self {
        let server = MockServer::start().await;
        let state = Arc::new(Mutex::new(RegistryState::default()));
        Mock::given(any())
            .respond_with(RegistryResponder {
                state: Arc::clone(&state),
                patch_delay: delay,
            })
            .mount(&server)
            .await;
        Self { server, state }
    }

    pub fn url(&self) -> String {
        self.server.uri()
    }

    pub fn omit_manifest_digest(&self) {
        self.state.lock().unwrap().omit_manifest_digest = true;
    }

    pub fn reject_manifests(&self, status: u16) {
        self.state.lock().unwrap().manifest_rejection = Some(status);
    }

    pub fn stats(&self) -> Stats {
        self.state.lock().unwrap().stats.clone()
    }

    pub fn reset_stats(&self) {
        self.state.lock().unwrap().stats = Stats::default();
    }

    pub fn blob(&self, repository: &str, digest: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .blobs
            .get(&(repository.to_string(), digest.to_string()))
            .cloned()
    }

    pub fn blob_count(&self) -> usize {
        self.state.lock().unwrap().blobs.len()
    }

    pub fn manifest(&self, repository: &str, reference: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .manifests
            .get(&(repository.to_string(), reference.to_string()))
            .cloned()
    }
}

/// Address with nothing listening
pub const UNREACHABLE_REGISTRY: &str = "http://127.0.0.1:9";
