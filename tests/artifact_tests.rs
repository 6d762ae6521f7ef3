//! Artifact activities over the local store: file and directory
//! round-trips, optional tolerance.
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::indexing_slicing)]

use std::fs;

use stevedore::activity::{download_artifact, upload_artifact};
use stevedore::artifact::{
    Artifact, ArtifactMetadata, ArtifactStore, CONTENT_TYPE_GZIP, cleanup,
};
use stevedore::providers::LocalStore;
use tokio_util::sync::CancellationToken;

fn file_meta(name: &str) -> ArtifactMetadata {
    ArtifactMetadata::new("wf", "run1", "build", Artifact::file(name, "/unused"))
}

fn dir_meta(name: &str) -> ArtifactMetadata {
    ArtifactMetadata::new("wf", "run1", "build", Artifact::directory(name, "/unused"))
}

#[tokio::test]
async fn file_artifact_roundtrip_is_byte_identical() {
    let store_dir = tempfile::tempdir().unwrap();
    let work_dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(store_dir.path());
    let cancel = CancellationToken::new();

    let source = work_dir.path().join("report.txt");
    fs::write(&source, b"contents \x00 with bytes").unwrap();

    let uploaded = upload_artifact(&store, &file_meta("report"), &source, &cancel)
        .await
        .unwrap();
    assert_eq!(uploaded.size, 21);

    let dest = work_dir.path().join("fetched/report.txt");
    download_artifact(&store, &file_meta("report"), &dest, &cancel)
        .await
        .unwrap();
    assert_eq!(fs::read(&dest).unwrap(), fs::read(&source).unwrap());
}

#[tokio::test]
async fn directory_artifact_roundtrip_preserves_relative_tree() {
    let store_dir = tempfile::tempdir().unwrap();
    let work_dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(store_dir.path());
    let cancel = CancellationToken::new();

    let source = work_dir.path().join("site");
    fs::create_dir_all(source.join("assets/css")).unwrap();
    fs::write(source.join("index.html"), b"<html/>").unwrap();
    fs::write(source.join("assets/css/main.css"), b"body{}").unwrap();

    let uploaded = upload_artifact(&store, &dir_meta("site"), &source, &cancel)
        .await
        .unwrap();
    assert_eq!(uploaded.content_type.as_deref(), Some(CONTENT_TYPE_GZIP));

    let dest = work_dir.path().join("restored");
    download_artifact(&store, &dir_meta("site"), &dest, &cancel)
        .await
        .unwrap();
    assert_eq!(fs::read(dest.join("index.html")).unwrap(), b"<html/>");
    assert_eq!(fs::read(dest.join("assets/css/main.css")).unwrap(), b"body{}");
}

#[tokio::test]
async fn optional_missing_artifact_download_is_tolerated() {
    let store_dir = tempfile::tempdir().unwrap();
    let work_dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(store_dir.path());
    let cancel = CancellationToken::new();

    let meta = ArtifactMetadata::new(
        "wf",
        "run1",
        "build",
        Artifact::file("ghost", "/unused").optional(),
    );
    let dest = work_dir.path().join("ghost");
    download_artifact(&store, &meta, &dest, &cancel).await.unwrap();
    assert!(!dest.exists());
}

#[tokio::test]
async fn required_missing_artifact_download_fails() {
    let store_dir = tempfile::tempdir().unwrap();
    let work_dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(store_dir.path());
    let cancel = CancellationToken::new();

    let dest = work_dir.path().join("ghost");
    assert!(
        download_artifact(&store, &file_meta("ghost"), &dest, &cancel)
            .await
            .is_err()
    );
}

#[tokio::test]
async fn cleanup_sweeps_a_whole_run() {
    let store_dir = tempfile::tempdir().unwrap();
    let work_dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(store_dir.path());
    let cancel = CancellationToken::new();

    let source = work_dir.path().join("a.txt");
    fs::write(&source, b"a").unwrap();
    upload_artifact(&store, &file_meta("a"), &source, &cancel)
        .await
        .unwrap();
    upload_artifact(&store, &file_meta("b"), &source, &cancel)
        .await
        .unwrap();

    assert_eq!(store.list("wf/run1/", &cancel).await.unwrap().len(), 2);
    cleanup(&store, "wf", "run1", &cancel).await.unwrap();
    assert!(store.list("wf/run1/", &cancel).await.unwrap().is_empty());
}
