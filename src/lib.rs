//! # Stevedore - Container Workflow Engine
//!
//! Stevedore is a durable, replay-safe workflow engine for composing
//! container executions: single runs, sequential pipelines, parallel
//! fan-outs, item and parameter loops, and DAGs with data and artifact
//! flow between steps.
//!
//! ## Features
//!
//! - **Typed workflow inputs**: compositions are plain Rust structs,
//!   validated before any container is started
//! - **Deterministic replay**: cooperative single-threaded control flow
//!   with explicit suspension points, ordered maps everywhere iteration
//!   order is observable
//! - **Data passing**: step outputs extracted via JSONPath/regex and
//!   bound into downstream environments
//! - **Artifacts**: files and directories stored outside the container
//!   lifecycle, on the local filesystem or an S3-compatible object store
//! - **Failure strategies**: stop-on-error pipelines, fail-fast or
//!   continue fan-outs, fail-fast DAG traversal
//! - **Abstract boundaries**: the durable host ([`executor::Executor`])
//!   and the container runtime ([`runner::ContainerRunner`]) are traits;
//!   providers live under [`providers`]
//!
//! ## Core Modules
//!
//! - [`engine`] - the workflow engines (single, pipeline, parallel, loops, dag)
//! - [`container`] - container specs, wait strategies, results
//! - [`extract`] / [`bind`] - the data-passing layer
//! - [`artifact`] / [`archive`] - the artifact layer
//! - [`activity`] - the retryable container and artifact activities
//! - [`client`] - lifecycle operations over a durable host
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use stevedore::providers::{DockerRunner, LocalExecutor};
//! use stevedore::workflow::PipelineInput;
//! use stevedore::{ContainerSpec, WorkflowClient, WorkflowRequest};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let runner = Arc::new(DockerRunner::new()?);
//! let client = WorkflowClient::new(Arc::new(LocalExecutor::new(runner)));
//!
//! let input = PipelineInput {
//!     containers: vec![
//!         ContainerSpec::new("alpine").with_command(["echo", "build"]),
//!         ContainerSpec::new("alpine").with_command(["echo", "deploy"]),
//!     ],
//!     stop_on_error: true,
//! };
//! let response = client
//!     .submit_and_wait("release", WorkflowRequest::Pipeline(input), Duration::from_secs(60))
//!     .await?;
//! println!("finished: {response:?}");
//! # Ok(())
//! # }
//! ```

pub mod activity;
pub mod archive;
pub mod artifact;
pub mod bind;
pub mod cartesian;
pub mod client;
pub mod config;
pub mod container;
pub mod engine;
pub mod executor;
pub mod extract;
pub mod providers;
pub mod runner;
pub mod step;
pub mod substitution;
pub mod workflow;

pub use client::WorkflowClient;
pub use container::{ContainerResult, ContainerSpec, WaitStrategy};
pub use engine::WorkflowContext;
pub use executor::{Executor, WorkflowRequest, WorkflowResponse, WorkflowStatus};
