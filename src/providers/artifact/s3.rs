use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::artifact::{
    ArtifactMetadata, ArtifactStore, Error, NotFoundSnafu, ObjectStoreSnafu, Result,
    ensure_active,
};
use crate::config::ArtifactConfig;

/// S3-compatible artifact store. Objects carry user metadata identifying
/// the producing workflow, run, and step; the bucket is created on
/// construction when absent.
#[derive(Debug, Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
    prefix: Option<String>,
}

impl S3Store {
    /// Connect using the shared AWS configuration chain, honoring the
    /// custom endpoint and region from [`ArtifactConfig`].
    pub async fn connect(config: &ArtifactConfig) -> Result<Self> {
        let bucket = config.bucket.clone().ok_or_else(|| Error::Configuration {
            kind: "s3 backend requires a bucket".to_string(),
        })?;

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        if let Some(region) = &config.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        let shared = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(true)
            .build();
        let client = Client::from_conf(s3_config);

        let store = Self {
            client,
            bucket,
            prefix: config.prefix.clone(),
        };
        store.ensure_bucket().await?;
        Ok(store)
    }

    /// Wrap an existing client; the bucket is assumed to exist.
    #[must_use]
    pub fn with_client(client: Client, bucket: impl Into<String>, prefix: Option<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix,
        }
    }

    async fn ensure_bucket(&self) -> Result<()> {
        if self
            .client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .is_ok()
        {
            return Ok(());
        }
        match self.client.create_bucket().bucket(&self.bucket).send().await {
            Ok(_) => Ok(()),
            Err(err) => {
                let benign = err.as_service_error().is_some_and(|service| {
                    service.is_bucket_already_owned_by_you() || service.is_bucket_already_exists()
                });
                if benign {
                    Ok(())
                } else {
                    ObjectStoreSnafu {
                        message: format!("creating bucket '{}': {err}", self.bucket),
                    }
                    .fail()
                }
            }
        }
    }

    fn object_key(&self, meta: &ArtifactMetadata) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), meta.storage_key()),
            None => meta.storage_key(),
        }
    }

    fn full_prefix(&self, prefix: &str) -> String {
        match &self.prefix {
            Some(configured) => format!("{}/{prefix}", configured.trim_end_matches('/')),
            None => prefix.to_string(),
        }
    }

    fn strip_configured_prefix<'a>(&self, key: &'a str) -> &'a str {
        match &self.prefix {
            Some(configured) => key
                .strip_prefix(configured.trim_end_matches('/'))
                .map(|rest| rest.trim_start_matches('/'))
                .unwrap_or(key),
            None => key,
        }
    }
}

#[async_trait]
impl ArtifactStore for S3Store {
    async fn upload(
        &self,
        meta: &ArtifactMetadata,
        data: Bytes,
        cancel: &CancellationToken,
    ) -> Result<ArtifactMetadata> {
        ensure_active(cancel)?;
        let size = data.len() as u64;
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(self.object_key(meta))
            .body(ByteStream::from(data))
            .metadata("workflow-id", &meta.workflow_id)
            .metadata("run-id", &meta.run_id)
            .metadata("step-name", &meta.step_name)
            .metadata("artifact-type", meta.artifact.artifact_type.as_str());
        if let Some(content_type) = &meta.content_type {
            request = request.content_type(content_type);
        }
        request.send().await.map_err(|err| Error::Upload {
            message: format!("putting '{}': {err}", meta.storage_key()),
        })?;

        let mut meta = meta.clone();
        meta.size = size;
        Ok(meta)
    }

    async fn download(
        &self,
        meta: &ArtifactMetadata,
        cancel: &CancellationToken,
    ) -> Result<Bytes> {
        ensure_active(cancel)?;
        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.object_key(meta))
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                if err
                    .as_service_error()
                    .is_some_and(GetObjectError::is_no_such_key)
                {
                    return NotFoundSnafu {
                        key: meta.storage_key(),
                    }
                    .fail();
                }
                return ObjectStoreSnafu {
                    message: format!("getting '{}': {err}", meta.storage_key()),
                }
                .fail();
            }
        };
        let collected = response.body.collect().await.map_err(|err| Error::Download {
            message: format!("reading '{}': {err}", meta.storage_key()),
        })?;
        Ok(collected.into_bytes())
    }

    async fn exists(&self, meta: &ArtifactMetadata, cancel: &CancellationToken) -> Result<bool> {
        ensure_active(cancel)?;
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.object_key(meta))
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                if err
                    .as_service_error()
                    .is_some_and(|service| service.is_not_found())
                {
                    Ok(false)
                } else {
                    ObjectStoreSnafu {
                        message: format!("heading '{}': {err}", meta.storage_key()),
                    }
                    .fail()
                }
            }
        }
    }

    async fn delete(&self, meta: &ArtifactMetadata, cancel: &CancellationToken) -> Result<()> {
        ensure_active(cancel)?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.object_key(meta))
            .send()
            .await
            .map_err(|err| Error::ObjectStore {
                message: format!("deleting '{}': {err}", meta.storage_key()),
            })?;
        Ok(())
    }

    async fn list(
        &self,
        prefix: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ArtifactMetadata>> {
        ensure_active(cancel)?;
        let mut found = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(self.full_prefix(prefix))
            .into_paginator()
            .send();
        while let Some(page) = pages.next().await {
            ensure_active(cancel)?;
            let page = page.map_err(|err| Error::ObjectStore {
                message: format!("listing '{prefix}': {err}"),
            })?;
            for object in page.contents() {
                let Some(key) = object.key() else { continue };
                let key = self.strip_configured_prefix(key);
                if let Some(mut meta) = ArtifactMetadata::parse_key(key) {
                    meta.size = object.size().unwrap_or(0).max(0) as u64;
                    found.push(meta);
                }
            }
        }
        Ok(found)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
