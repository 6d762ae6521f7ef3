use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::executor::RetryPolicy;

/// Global engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub artifacts: ArtifactConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Artifact store selection and backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    /// Backend selector: `local` or `s3`.
    pub backend: String,

    /// Root directory of the local backend.
    pub base_dir: Option<PathBuf>,

    /// Bucket of the s3 backend; created on construction when absent.
    pub bucket: Option<String>,

    /// Custom endpoint for S3-compatible stores.
    pub endpoint: Option<String>,

    pub region: Option<String>,

    /// Optional key prefix objects are stored under.
    pub prefix: Option<String>,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            backend: "local".to_string(),
            base_dir: Some(PathBuf::from("artifacts")),
            bucket: None,
            endpoint: None,
            region: None,
            prefix: None,
        }
    }
}

/// Engine-wide default timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Bound on a single container execution, in seconds.
    pub run_timeout_secs: u64,

    /// Bound on container startup, in seconds.
    pub startup_timeout_secs: u64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            run_timeout_secs: 600,
            startup_timeout_secs: 60,
        }
    }
}

/// Host retry policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_interval_ms: u64,
    pub backoff: f64,
    pub max_interval_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval_ms: 1_000,
            backoff: 2.0,
            max_interval_ms: 60_000,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_interval: Duration::from_millis(self.initial_interval_ms),
            backoff: self.backoff,
            max_interval: Duration::from_millis(self.max_interval_ms),
        }
    }
}

impl EngineConfig {
    /// Load configuration with precedence:
    /// 1. Environment variables (`STEVEDORE__*`, highest priority)
    /// 2. Config file (`stevedore.yaml` in the current dir or `~/.config/stevedore/`)
    /// 3. Defaults (lowest priority)
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::Config::try_from(&EngineConfig::default())?)
            .add_source(
                config::File::with_name("stevedore")
                    .format(config::FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                config::File::with_name(&format!(
                    "{}/.config/stevedore/stevedore",
                    std::env::var("HOME").unwrap_or_else(|_| ".".to_string())
                ))
                .format(config::FileFormat::Yaml)
                .required(false),
            )
            .add_source(
                config::Environment::with_prefix("STEVEDORE")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}
