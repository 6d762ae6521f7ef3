use std::path::PathBuf;
use std::sync::Arc;

use crate::artifact::{self, ArtifactStore, ConfigurationSnafu};
use crate::config::ArtifactConfig;

mod local;
mod s3;

pub use local::LocalStore;
pub use s3::S3Store;

/// Build the artifact store selected by configuration.
pub async fn store_from_config(config: &ArtifactConfig) -> artifact::Result<Arc<dyn ArtifactStore>> {
    match config.backend.as_str() {
        "local" => {
            let base = config
                .base_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from("artifacts"));
            Ok(Arc::new(LocalStore::new(base)))
        }
        "s3" => Ok(Arc::new(S3Store::connect(config).await?)),
        other => ConfigurationSnafu { kind: other }.fail(),
    }
}
