//! Artifact placement keyed by workflow, run, and step.
//!
//! Stores are a capability set behind [`ArtifactStore`]; the engine never
//! depends on a concrete backend. Two providers live under
//! `providers::artifact`: a local filesystem store and an S3-compatible
//! object store.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use tokio_util::sync::CancellationToken;

/// Content type recorded for archived directory artifacts.
pub const CONTENT_TYPE_GZIP: &str = "application/gzip";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("artifact not found: {key}"))]
    NotFound { key: String },

    #[snafu(display("artifact upload failed: {message}"))]
    Upload { message: String },

    #[snafu(display("artifact download failed: {message}"))]
    Download { message: String },

    #[snafu(display("artifact store I/O error: {source}"))]
    Io { source: std::io::Error },

    #[snafu(display("object store error: {message}"))]
    ObjectStore { message: String },

    #[snafu(display("invalid artifact store type: {kind}"))]
    Configuration { kind: String },

    #[snafu(display("artifact operation cancelled"))]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;

/// How an artifact's content is packaged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactType {
    #[default]
    File,
    /// A directory tree, stored as a gzip-compressed tar.
    Directory,
    /// Pre-archived content, extracted like a directory on download.
    Archive,
}

impl ArtifactType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactType::File => "file",
            ArtifactType::Directory => "directory",
            ArtifactType::Archive => "archive",
        }
    }
}

/// A named file or directory produced or consumed by a workflow step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    /// Path inside the container filesystem (host-visible via a mount).
    pub path: String,
    #[serde(default)]
    pub artifact_type: ArtifactType,
    /// A missing optional artifact is tolerated on download.
    #[serde(default)]
    pub optional: bool,
}

impl Artifact {
    #[must_use]
    pub fn file(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            artifact_type: ArtifactType::File,
            optional: false,
        }
    }

    #[must_use]
    pub fn directory(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            artifact_type: ArtifactType::Directory,
            ..Self::file(name, path)
        }
    }

    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// Artifact identity plus the coordinates that form its storage key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub artifact: Artifact,
    pub workflow_id: String,
    pub run_id: String,
    pub step_name: String,
    /// Populated on upload.
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub content_type: Option<String>,
}

impl ArtifactMetadata {
    #[must_use]
    pub fn new(
        workflow_id: impl Into<String>,
        run_id: impl Into<String>,
        step_name: impl Into<String>,
        artifact: Artifact,
    ) -> Self {
        Self {
            artifact,
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
            step_name: step_name.into(),
            size: 0,
            content_type: None,
        }
    }

    /// `{workflow}/{run}/{step}/{name}`, slash-joined with no leading or
    /// trailing separator.
    #[must_use]
    pub fn storage_key(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.workflow_id, self.run_id, self.step_name, self.artifact.name
        )
    }

    /// Prefix under which every object of one run lives.
    #[must_use]
    pub fn run_prefix(workflow_id: &str, run_id: &str) -> String {
        format!("{workflow_id}/{run_id}/")
    }

    /// Parse a storage key back into metadata. Keys that are not exactly
    /// four non-empty segments are malformed.
    #[must_use]
    pub fn parse_key(key: &str) -> Option<Self> {
        let parts: Vec<&str> = key.split('/').collect();
        match parts.as_slice() {
            [workflow_id, run_id, step_name, name]
                if !workflow_id.is_empty()
                    && !run_id.is_empty()
                    && !step_name.is_empty()
                    && !name.is_empty() =>
            {
                Some(Self::new(
                    *workflow_id,
                    *run_id,
                    *step_name,
                    Artifact::file(*name, ""),
                ))
            }
            _ => None,
        }
    }
}

/// Capability set every artifact backend offers. All operations accept a
/// cancellation token and must observe it before touching storage.
#[async_trait]
pub trait ArtifactStore: Send + Sync + std::fmt::Debug {
    /// Place the bytes under the metadata's storage key, overwriting any
    /// existing object. Returns metadata with `size` recorded.
    async fn upload(
        &self,
        meta: &ArtifactMetadata,
        data: Bytes,
        cancel: &CancellationToken,
    ) -> Result<ArtifactMetadata>;

    /// Fetch the object; fails with [`Error::NotFound`] when absent.
    async fn download(&self, meta: &ArtifactMetadata, cancel: &CancellationToken)
    -> Result<Bytes>;

    async fn exists(&self, meta: &ArtifactMetadata, cancel: &CancellationToken) -> Result<bool>;

    /// Idempotent delete; a missing object is not an error.
    async fn delete(&self, meta: &ArtifactMetadata, cancel: &CancellationToken) -> Result<()>;

    /// Enumerate objects under a key prefix. Keys that do not parse back
    /// into `(workflow, run, step, name)` are skipped.
    async fn list(
        &self,
        prefix: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ArtifactMetadata>>;

    async fn close(&self) -> Result<()>;
}

/// Delete every object one workflow run produced. The first delete error
/// aborts the sweep.
pub async fn cleanup(
    store: &dyn ArtifactStore,
    workflow_id: &str,
    run_id: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    let prefix = ArtifactMetadata::run_prefix(workflow_id, run_id);
    for meta in store.list(&prefix, cancel).await? {
        store.delete(&meta, cancel).await?;
    }
    Ok(())
}

pub(crate) fn ensure_active(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        CancelledSnafu.fail()
    } else {
        Ok(())
    }
}
