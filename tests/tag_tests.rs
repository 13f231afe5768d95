//! Original tag extraction from synthetic archives

mod common;

use common::{ImageFixture, file, write_tar};
use docker_tar_pusher::error::RegistryError;
use docker_tar_pusher::image::{
    extract_original_tags, extract_repo_tags_from_manifest, extract_repo_tags_from_repositories,
    get_primary_tag,
};
use std::collections::HashSet;
use tempfile::TempDir;

#[test]
fn test_manifest_repo_tags_in_order() {
    let dir = TempDir::new().unwrap();
    let path = ImageFixture::new(1)
        .with_repo_tags(&["nginx:alpine", "nginx:1.21-alpine", "my-nginx:latest"])
        .write(dir.path());

    assert_eq!(
        extract_original_tags(&path).unwrap(),
        vec!["nginx:alpine", "nginx:1.21-alpine", "my-nginx:latest"]
    );
    assert_eq!(
        get_primary_tag(&path),
        Some(("nginx".to_string(), "alpine".to_string()))
    );
}

#[test]
fn test_falls_back_to_repositories_file() {
    let dir = TempDir::new().unwrap();
    let path = ImageFixture::new(1)
        .with_repo_tags(&[])
        .with_repositories(r#"{"demo":{"v1.0":"0123abcd","latest":"0123abcd"}}"#)
        .write(dir.path());

    let tags: HashSet<String> = extract_original_tags(&path).unwrap().into_iter().collect();
    let expected: HashSet<String> = ["demo:v1.0", "demo:latest"]
        .iter()
        .map(|t| t.to_string())
        .collect();
    assert_eq!(tags, expected);

    let repository_tags = extract_repo_tags_from_repositories(&path).unwrap();
    assert_eq!(repository_tags.len(), 2);
}

#[test]
fn test_missing_repo_tags_also_falls_back() {
    let dir = TempDir::new().unwrap();
    let path = ImageFixture::new(1)
        .without_repo_tags()
        .with_repositories(r#"{"registry.local:5000/team/app":{"2.0":"ff"}}"#)
        .write(dir.path());

    assert_eq!(
        extract_original_tags(&path).unwrap(),
        vec!["registry.local:5000/team/app:2.0"]
    );
    assert_eq!(
        get_primary_tag(&path),
        Some(("registry.local:5000/team/app".to_string(), "2.0".to_string()))
    );
    assert!(matches!(
        extract_repo_tags_from_manifest(&path),
        Err(RegistryError::Validation(_))
    ));
}

#[test]
fn test_no_tags_anywhere() {
    let dir = TempDir::new().unwrap();
    let path = ImageFixture::new(1).without_repo_tags().write(dir.path());

    assert!(extract_original_tags(&path).unwrap().is_empty());
    assert_eq!(get_primary_tag(&path), None);
    assert!(matches!(
        extract_repo_tags_from_repositories(&path),
        Err(RegistryError::Validation(_))
    ));
}

#[test]
fn test_malformed_sources_are_absorbed() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.tar");
    write_tar(
        &path,
        &[
            file("manifest.json", "{not json"),
            file("repositories", "also not json"),
        ],
    );

    assert!(extract_original_tags(&path).unwrap().is_empty());
    assert_eq!(get_primary_tag(&path), None);
    assert!(matches!(
        extract_repo_tags_from_manifest(&path),
        Err(RegistryError::Validation(msg)) if msg.contains("Invalid JSON")
    ));
}

#[test]
fn test_unreadable_archive_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("missing.tar");
    assert!(extract_original_tags(&path).is_err());
    assert_eq!(get_primary_tag(&path), None);
}
