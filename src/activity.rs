//! Activities: the externally-side-effecting operations the durable host
//! can retry. Running one container is the only container activity; two
//! more move artifacts between the host filesystem and the store.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::archive;
use crate::artifact::{
    self, ArtifactMetadata, ArtifactStore, ArtifactType, CONTENT_TYPE_GZIP,
};
use crate::container::{ContainerResult, ContainerSpec, DEFAULT_RUN_TIMEOUT, TIMEOUT_MARKER};
use crate::runner::{self, ContainerHandle, ContainerRunner, PortSpec, RunnerOptions};

/// Drives one [`ContainerSpec`] to a [`ContainerResult`] through the
/// runner boundary.
#[derive(Debug, Clone)]
pub struct ContainerActivity {
    runner: Arc<dyn ContainerRunner>,
}

impl ContainerActivity {
    #[must_use]
    pub fn new(runner: Arc<dyn ContainerRunner>) -> Self {
        Self { runner }
    }

    /// Execute `spec` and return its result.
    ///
    /// Only infrastructure failures (runner unreachable) surface as `Err`
    /// so the host retry policy can re-drive the activity. Everything
    /// after a container exists is captured inside the result, and the
    /// container is terminated on every exit path.
    pub async fn run(
        &self,
        spec: &ContainerSpec,
        cancel: &CancellationToken,
    ) -> runner::Result<ContainerResult> {
        let started_at = Utc::now();
        let label = spec.display_name();

        let options = match build_options(spec) {
            Ok(options) => options,
            Err(err) => return Ok(ContainerResult::failed(label, started_at, err.to_string())),
        };

        let handle = match self.runner.create(options).await {
            Ok(handle) => handle,
            Err(err) if err.is_infrastructure() => return Err(err),
            Err(err) => return Ok(ContainerResult::failed(label, started_at, err.to_string())),
        };

        let result = drive(handle.as_ref(), spec, &label, started_at, cancel).await;

        // teardown runs whether the wait succeeded or not
        if let Err(err) = handle.terminate().await {
            warn!(container = handle.id(), error = %err, "container termination failed");
        }

        Ok(result)
    }
}

async fn drive(
    handle: &dyn ContainerHandle,
    spec: &ContainerSpec,
    label: &str,
    started_at: DateTime<Utc>,
    cancel: &CancellationToken,
) -> ContainerResult {
    if let Err(err) = handle.start().await {
        return ContainerResult::failed(label, started_at, err.to_string());
    }

    let run_timeout = spec.run_timeout.unwrap_or(DEFAULT_RUN_TIMEOUT);
    let waited = tokio::select! {
        () = cancel.cancelled() => Err("container execution cancelled".to_string()),
        outcome = tokio::time::timeout(run_timeout, handle.wait()) => match outcome {
            Ok(Ok(exit_code)) => Ok(exit_code),
            Ok(Err(err)) => Err(err.to_string()),
            Err(_) => Err(format!("{TIMEOUT_MARKER} after {run_timeout:?}")),
        },
    };
    let (exit_code, error) = match waited {
        Ok(exit_code) => (exit_code, None),
        Err(message) => (-1, Some(message)),
    };

    let stdout = match handle.stdout().await {
        Ok(stdout) => stdout,
        Err(err) => {
            warn!(container = handle.id(), error = %err, "stdout collection failed");
            String::new()
        }
    };
    let stderr = match handle.stderr().await {
        Ok(stderr) => stderr,
        Err(err) => {
            warn!(container = handle.id(), error = %err, "stderr collection failed");
            String::new()
        }
    };

    let (endpoint, ports) = if spec.ports.is_empty() {
        (None, IndexMap::new())
    } else {
        let ports = match handle.ports().await {
            Ok(ports) => ports,
            Err(err) => {
                warn!(container = handle.id(), error = %err, "port lookup failed");
                IndexMap::new()
            }
        };
        let endpoint = match first_container_port(spec) {
            Some(port) => match handle.endpoint(port).await {
                Ok(endpoint) => Some(endpoint),
                Err(err) => {
                    warn!(container = handle.id(), error = %err, "endpoint lookup failed");
                    None
                }
            },
            None => None,
        };
        (endpoint, ports)
    };

    ContainerResult {
        container_id: handle.id().to_string(),
        name: label.to_string(),
        exit_code,
        stdout,
        stderr,
        endpoint,
        ports,
        started_at,
        finished_at: Utc::now(),
        duration: Duration::ZERO,
        success: false,
        error,
    }
    .finalize()
}

fn build_options(spec: &ContainerSpec) -> runner::Result<RunnerOptions> {
    let ports = spec
        .ports
        .iter()
        .map(|published| PortSpec::parse(published))
        .collect::<runner::Result<Vec<_>>>()?;
    Ok(RunnerOptions {
        image: spec.image.clone(),
        name: spec.name.clone(),
        command: spec.command.clone(),
        entrypoint: spec.entrypoint.clone(),
        env: spec.env.clone(),
        ports,
        volumes: spec.volumes.clone(),
        working_dir: spec.working_dir.clone(),
        user: spec.user.clone(),
        labels: spec.labels.clone(),
        auto_remove: spec.auto_remove,
        wait: spec.wait.clone(),
        start_timeout: spec.start_timeout,
    })
}

fn first_container_port(spec: &ContainerSpec) -> Option<u16> {
    spec.ports
        .first()
        .and_then(|published| PortSpec::parse(published).ok())
        .map(|port| port.container)
}

/// Upload one artifact from the host filesystem. Directory and archive
/// artifacts are streamed as gzip tars; files as raw bytes.
pub async fn upload_artifact(
    store: &dyn ArtifactStore,
    meta: &ArtifactMetadata,
    source: &Path,
    cancel: &CancellationToken,
) -> artifact::Result<ArtifactMetadata> {
    match meta.artifact.artifact_type {
        ArtifactType::Directory | ArtifactType::Archive => {
            let data = archive::pack_dir(source).map_err(|err| artifact::Error::Upload {
                message: format!("archiving '{}': {err}", source.display()),
            })?;
            let mut meta = meta.clone();
            meta.content_type = Some(CONTENT_TYPE_GZIP.to_string());
            store.upload(&meta, data, cancel).await
        }
        ArtifactType::File => {
            let data = tokio::fs::read(source)
                .await
                .map_err(|source| artifact::Error::Io { source })?;
            store.upload(meta, Bytes::from(data), cancel).await
        }
    }
}

/// Download one artifact to the host filesystem, mirroring
/// [`upload_artifact`]. A missing optional artifact is tolerated.
pub async fn download_artifact(
    store: &dyn ArtifactStore,
    meta: &ArtifactMetadata,
    dest: &Path,
    cancel: &CancellationToken,
) -> artifact::Result<()> {
    let data = match store.download(meta, cancel).await {
        Ok(data) => data,
        Err(artifact::Error::NotFound { key }) if meta.artifact.optional => {
            debug!(%key, "optional artifact missing, skipping download");
            return Ok(());
        }
        Err(err) => return Err(err),
    };

    match meta.artifact.artifact_type {
        ArtifactType::Directory | ArtifactType::Archive => {
            archive::unpack(&data, dest).map_err(|err| artifact::Error::Download {
                message: format!("extracting to '{}': {err}", dest.display()),
            })
        }
        ArtifactType::File => {
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| artifact::Error::Io { source })?;
            }
            tokio::fs::write(dest, &data)
                .await
                .map_err(|source| artifact::Error::Io { source })
        }
    }
}
