use async_trait::async_trait;
use bytes::Bytes;
use snafu::prelude::*;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use crate::artifact::{
    ArtifactMetadata, ArtifactStore, Error, IoSnafu, NotFoundSnafu, Result, ensure_active,
};

/// Filesystem-backed artifact store: one file per object under
/// `base/{workflow}/{run}/{step}/{name}`.
#[derive(Debug, Clone)]
pub struct LocalStore {
    base: PathBuf,
}

impl LocalStore {
    #[must_use]
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn object_path(&self, meta: &ArtifactMetadata) -> PathBuf {
        self.base.join(meta.storage_key())
    }
}

#[async_trait]
impl ArtifactStore for LocalStore {
    async fn upload(
        &self,
        meta: &ArtifactMetadata,
        data: Bytes,
        cancel: &CancellationToken,
    ) -> Result<ArtifactMetadata> {
        ensure_active(cancel)?;
        let path = self.object_path(meta);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.context(IoSnafu)?;
        }
        tokio::fs::write(&path, &data).await.context(IoSnafu)?;
        let mut meta = meta.clone();
        meta.size = data.len() as u64;
        Ok(meta)
    }

    async fn download(
        &self,
        meta: &ArtifactMetadata,
        cancel: &CancellationToken,
    ) -> Result<Bytes> {
        ensure_active(cancel)?;
        match tokio::fs::read(self.object_path(meta)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => NotFoundSnafu {
                key: meta.storage_key(),
            }
            .fail(),
            Err(source) => Err(Error::Io { source }),
        }
    }

    async fn exists(&self, meta: &ArtifactMetadata, cancel: &CancellationToken) -> Result<bool> {
        ensure_active(cancel)?;
        tokio::fs::try_exists(self.object_path(meta))
            .await
            .context(IoSnafu)
    }

    async fn delete(&self, meta: &ArtifactMetadata, cancel: &CancellationToken) -> Result<()> {
        ensure_active(cancel)?;
        match tokio::fs::remove_file(self.object_path(meta)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(Error::Io { source }),
        }
    }

    async fn list(
        &self,
        prefix: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ArtifactMetadata>> {
        ensure_active(cancel)?;
        let mut keys = Vec::new();
        collect_keys(&self.base, &self.base, &mut keys)?;
        keys.sort();
        Ok(keys
            .into_iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter_map(|(key, size)| {
                ArtifactMetadata::parse_key(&key).map(|mut meta| {
                    meta.size = size;
                    meta
                })
            })
            .collect())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

fn collect_keys(base: &Path, dir: &Path, out: &mut Vec<(String, u64)>) -> Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(source) => return Err(Error::Io { source }),
    };
    for entry in entries {
        let entry = entry.context(IoSnafu)?;
        let path = entry.path();
        let metadata = entry.metadata().context(IoSnafu)?;
        if metadata.is_dir() {
            collect_keys(base, &path, out)?;
        } else if metadata.is_file() {
            if let Ok(relative) = path.strip_prefix(base) {
                let key = relative
                    .components()
                    .map(|component| component.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                out.push((key, metadata.len()));
            }
        }
    }
    Ok(())
}
