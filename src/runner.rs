//! Abstract container runtime boundary.
//!
//! The engine drives containers exclusively through [`ContainerRunner`]
//! and [`ContainerHandle`]; the Docker implementation lives in
//! `providers::runner`.

use async_trait::async_trait;
use indexmap::IndexMap;
use snafu::prelude::*;
use std::time::Duration;

use crate::container::WaitStrategy;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("runner provider error: {message}"))]
    Provider { message: String },

    #[snafu(display("container creation failed: {message}"))]
    Creation { message: String },

    #[snafu(display("container start failed: {message}"))]
    Start { message: String },

    #[snafu(display("container not ready within {timeout:?} ({strategy} wait)"))]
    StartupTimeout {
        strategy: &'static str,
        timeout: Duration,
    },

    #[snafu(display("container wait failed: {message}"))]
    Wait { message: String },

    #[snafu(display("log collection failed: {message}"))]
    Logs { message: String },

    #[snafu(display("container inspect failed: {message}"))]
    Inspect { message: String },

    #[snafu(display("container termination failed: {message}"))]
    Terminate { message: String },

    #[snafu(display("invalid port publication '{published}' (expected host:container)"))]
    InvalidPort { published: String },

    #[snafu(display("no mapping for container port {port}"))]
    PortNotMapped { port: u16 },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the failure is an infrastructure problem worth re-driving
    /// the whole activity for, as opposed to a problem with the container
    /// itself.
    #[must_use]
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Error::Provider { .. })
    }
}

/// One port publication, parsed from the spec's `"host:container"` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSpec {
    pub host: u16,
    pub container: u16,
}

impl PortSpec {
    pub fn parse(published: &str) -> Result<Self> {
        let parts: Vec<&str> = published.split(':').collect();
        match parts.as_slice() {
            [host, container] => {
                let host = host.parse().map_err(|_| Error::InvalidPort {
                    published: published.to_string(),
                })?;
                let container = container.parse().map_err(|_| Error::InvalidPort {
                    published: published.to_string(),
                })?;
                Ok(Self { host, container })
            }
            _ => InvalidPortSnafu { published }.fail(),
        }
    }
}

/// Everything a runner needs to construct one container.
#[derive(Debug, Clone, Default)]
pub struct RunnerOptions {
    pub image: String,
    pub name: Option<String>,
    pub command: Vec<String>,
    pub entrypoint: Option<Vec<String>>,
    pub env: IndexMap<String, String>,
    pub ports: Vec<PortSpec>,
    pub volumes: IndexMap<String, String>,
    pub working_dir: Option<String>,
    pub user: Option<String>,
    pub labels: IndexMap<String, String>,
    pub auto_remove: bool,
    pub wait: Option<WaitStrategy>,
    pub start_timeout: Option<Duration>,
}

/// Factory for container handles.
#[async_trait]
pub trait ContainerRunner: Send + Sync + std::fmt::Debug {
    /// Create a container ready to be started.
    async fn create(&self, options: RunnerOptions) -> Result<Box<dyn ContainerHandle>>;
}

/// One created container.
#[async_trait]
pub trait ContainerHandle: Send + Sync {
    fn id(&self) -> &str;

    /// Start the container and block until its wait strategy reports
    /// ready.
    async fn start(&self) -> Result<()>;

    /// Block until the container exits; returns the exit code.
    async fn wait(&self) -> Result<i64>;

    async fn stdout(&self) -> Result<String>;

    async fn stderr(&self) -> Result<String>;

    /// Host endpoint (`host:port`) for a published container port.
    async fn endpoint(&self, container_port: u16) -> Result<String>;

    /// Container port -> host port map.
    async fn ports(&self) -> Result<IndexMap<u16, u16>>;

    async fn healthy(&self) -> Result<bool>;

    /// Best-effort teardown; must be safe to call on every exit path.
    async fn terminate(&self) -> Result<()>;
}
