//! Original repository:tag extraction from image-export archives
//!
//! `extract_original_tags` fails only when the archive itself cannot be
//! read; missing or malformed tag sources just fall through to an empty
//! list. `get_primary_tag` swallows every failure.

use crate::error::{RegistryError, Result};
use crate::image::archive::{ArchiveIndex, MANIFEST_FILE, REPOSITORIES_FILE, parse_repositories};
use std::path::Path;

pub const DEFAULT_TAG: &str = "latest";

/// RepoTags of the first `manifest.json` entry
pub fn extract_repo_tags_from_manifest(path: impl AsRef<Path>) -> Result<Vec<String>> {
    manifest_repo_tags(&ArchiveIndex::scan(path.as_ref())?)
}

fn manifest_repo_tags(index: &ArchiveIndex) -> Result<Vec<String>> {
    if !index.contains(MANIFEST_FILE) {
        return Err(RegistryError::Validation(
            "manifest.json not found in tar file".to_string(),
        ));
    }
    let bytes = index.read_member(MANIFEST_FILE)?;
    let manifest: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|e| RegistryError::Validation(format!("Invalid JSON in manifest.json: {}", e)))?;

    let first = manifest
        .as_array()
        .and_then(|entries| entries.first())
        .ok_or_else(|| {
            RegistryError::Validation("manifest.json must be a non-empty array".to_string())
        })?;
    let entry = first
        .as_object()
        .ok_or_else(|| RegistryError::Validation("Invalid manifest entry structure".to_string()))?;
    let repo_tags = entry
        .get("RepoTags")
        .and_then(|tags| tags.as_array())
        .ok_or_else(|| RegistryError::Validation("RepoTags must be a list".to_string()))?;

    Ok(repo_tags
        .iter()
        .filter_map(|tag| tag.as_str().map(str::to_string))
        .collect())
}

/// `repo:tag` strings flattened from the legacy `repositories` file
pub fn extract_repo_tags_from_repositories(path: impl AsRef<Path>) -> Result<Vec<String>> {
    repositories_repo_tags(&ArchiveIndex::scan(path.as_ref())?)
}

fn repositories_repo_tags(index: &ArchiveIndex) -> Result<Vec<String>> {
    if !index.contains(REPOSITORIES_FILE) {
        return Err(RegistryError::Validation(
            "repositories file not found in tar file".to_string(),
        ));
    }
    let bytes = index.read_member(REPOSITORIES_FILE)?;
    let repositories = parse_repositories(&bytes).ok_or_else(|| {
        RegistryError::Validation("Invalid JSON in repositories file".to_string())
    })?;

    Ok(repositories
        .into_iter()
        .flat_map(|(repository, tags)| {
            tags.into_iter()
                .map(move |(tag, _)| format!("{}:{}", repository, tag))
        })
        .collect())
}

/// Manifest RepoTags, falling back to the `repositories` file
pub fn extract_original_tags(path: impl AsRef<Path>) -> Result<Vec<String>> {
    Ok(extract_original_tags_from(&ArchiveIndex::scan(path.as_ref())?))
}

/// [`extract_original_tags`] on an archive already indexed
pub fn extract_original_tags_from(index: &ArchiveIndex) -> Vec<String> {
    match manifest_repo_tags(index) {
        Ok(tags) if !tags.is_empty() => tags,
        _ => repositories_repo_tags(index).unwrap_or_default(),
    }
}

/// Split on the last colon; a missing or empty tag becomes `latest`
pub fn parse_repository_tag(repo_tag: &str) -> (String, String) {
    match repo_tag.rsplit_once(':') {
        Some((repository, tag)) if !tag.is_empty() => (repository.to_string(), tag.to_string()),
        Some((repository, _)) => (repository.to_string(), DEFAULT_TAG.to_string()),
        None => (repo_tag.to_string(), DEFAULT_TAG.to_string()),
    }
}

/// First original tag, parsed; `None` when nothing usable is found
pub fn get_primary_tag(path: impl AsRef<Path>) -> Option<(String, String)> {
    primary_tag_from(&ArchiveIndex::scan(path.as_ref()).ok()?)
}

pub fn primary_tag_from(index: &ArchiveIndex) -> Option<(String, String)> {
    extract_original_tags_from(index)
        .first()
        .map(|tag| parse_repository_tag(tag))
}
