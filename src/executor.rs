//! Abstract durable-execution host boundary.
//!
//! The engine never names a concrete host product; it submits typed
//! [`WorkflowRequest`]s through [`Executor`] and observes runs through
//! handles, status polls, and completion values. An in-process provider
//! lives in `providers::executor`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::time::Duration;

use crate::container::{ContainerResult, ContainerSpec};
use crate::workflow::{
    BatchOutput, DagInput, DagOutput, FailureSummary, ItemsLoopInput, LoopOutput, ParallelInput,
    ParamLoopInput, Parameter, PipelineInput,
};

/// Retry policy the host applies when re-driving a failed activity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub backoff: f64,
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_secs(1),
            backoff: 2.0,
            max_interval: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// The backoff interval following `current`, capped at the maximum.
    #[must_use]
    pub fn next_interval(&self, current: Duration) -> Duration {
        current.mul_f64(self.backoff).min(self.max_interval)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Terminated,
}

impl WorkflowStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        match self {
            WorkflowStatus::Pending | WorkflowStatus::Running => false,
            WorkflowStatus::Completed
            | WorkflowStatus::Failed
            | WorkflowStatus::Cancelled
            | WorkflowStatus::Terminated => true,
        }
    }
}

/// Reference to one submitted run.
#[derive(Debug, Clone)]
pub struct WorkflowHandle {
    pub workflow_id: String,
    pub run_id: String,
    pub status: WorkflowStatus,
}

/// A typed workflow submission; one variant per entry point.
#[derive(Debug, Clone)]
pub enum WorkflowRequest {
    Single(ContainerSpec),
    Pipeline(PipelineInput),
    Parallel(ParallelInput),
    LoopItems(ItemsLoopInput),
    LoopParam(ParamLoopInput),
    Dag(DagInput),
    WithParameters {
        spec: ContainerSpec,
        parameters: Vec<Parameter>,
    },
}

impl WorkflowRequest {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowRequest::Single(_) => "single",
            WorkflowRequest::Pipeline(_) => "pipeline",
            WorkflowRequest::Parallel(_) => "parallel",
            WorkflowRequest::LoopItems(_) => "loop_items",
            WorkflowRequest::LoopParam(_) => "loop_param",
            WorkflowRequest::Dag(_) => "dag",
            WorkflowRequest::WithParameters { .. } => "with_parameters",
        }
    }
}

/// Completion value of a run, mirroring the entry points' outputs.
#[derive(Debug, Clone)]
pub enum WorkflowResponse {
    Single(ContainerResult),
    Batch(BatchOutput),
    Loop(LoopOutput),
    Dag(DagOutput),
}

impl WorkflowResponse {
    /// Whether the run finished without any recorded failure.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        match self {
            WorkflowResponse::Single(result) => result.success,
            WorkflowResponse::Batch(output) => output.error.is_none(),
            WorkflowResponse::Loop(output) => output.error.is_none(),
            WorkflowResponse::Dag(output) => output.error.is_none(),
        }
    }

    /// The failure carried inside the aggregate, when one is recorded.
    #[must_use]
    pub fn failure(&self) -> Option<FailureSummary> {
        match self {
            WorkflowResponse::Single(result) => (!result.success).then(|| {
                FailureSummary::execution(format!(
                    "container '{}' failed: {}",
                    result.name,
                    result.error.clone().unwrap_or_else(|| format!(
                        "exit code {}",
                        result.exit_code
                    ))
                ))
            }),
            WorkflowResponse::Batch(output) => output.error.clone(),
            WorkflowResponse::Loop(output) => output.error.clone(),
            WorkflowResponse::Dag(output) => output.error.clone(),
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("workflow run '{run_id}' not found"))]
    RunNotFound { run_id: String },

    #[snafu(display("unsupported query '{name}'"))]
    UnsupportedQuery { name: String },

    #[snafu(display("workflow submission failed: {message}"))]
    Submit { message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Terminal outcome of a run: the response, or the workflow-scoped
/// failure that prevented one.
pub type RunOutcome = std::result::Result<WorkflowResponse, FailureSummary>;

/// Capability surface of the durable-execution host.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Submit a workflow; returns a handle naming the new run.
    async fn submit(&self, workflow_id: &str, request: WorkflowRequest) -> Result<WorkflowHandle>;

    async fn status(&self, run_id: &str) -> Result<WorkflowStatus>;

    /// Completion value, once the run has reached a terminal state.
    async fn result(&self, run_id: &str) -> Result<Option<RunOutcome>>;

    /// Cooperative cancellation; in-flight activities observe it at their
    /// next suspension point.
    async fn cancel(&self, run_id: &str) -> Result<()>;

    /// Hard stop with a reason; the run is marked terminated immediately.
    async fn terminate(&self, run_id: &str, reason: &str) -> Result<()>;

    async fn signal(&self, run_id: &str, name: &str, payload: serde_json::Value) -> Result<()>;

    async fn query(&self, run_id: &str, name: &str) -> Result<serde_json::Value>;
}
