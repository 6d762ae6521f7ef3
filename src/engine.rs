//! Workflow engines: the replay-safe composition layer.
//!
//! Control flow inside a workflow is single-threaded and cooperative;
//! parallelism comes from submitting several activity futures before
//! awaiting any. Each engine validates its input, drives container
//! activities through the [`WorkflowContext`], and aggregates results.

use snafu::prelude::*;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::activity::ContainerActivity;
use crate::artifact::ArtifactStore;
use crate::container::{ContainerResult, ContainerSpec};
use crate::executor::RetryPolicy;
use crate::step::StepRetry;
use crate::workflow::{self, FailureSummary};

pub mod dag;
pub mod loops;
pub mod parallel;
pub mod params;
pub mod pipeline;
pub mod single;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("validation error: {source}"))]
    Validation { source: workflow::Error },

    #[snafu(display("configuration error: {message}"))]
    Configuration { message: String },

    #[snafu(display("workflow cancelled"))]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<workflow::Error> for Error {
    fn from(source: workflow::Error) -> Self {
        Error::Validation { source }
    }
}

impl Error {
    /// The user-visible tag + message form of this error.
    #[must_use]
    pub fn summary(&self) -> FailureSummary {
        match self {
            Error::Validation { source } => FailureSummary::validation(source.to_string()),
            Error::Configuration { message } => FailureSummary::configuration(message.clone()),
            Error::Cancelled => FailureSummary::execution("workflow cancelled"),
        }
    }
}

/// Execution facade handed to every workflow: identity of the run,
/// activity dispatch with the host retry policy, the artifact capability,
/// and the cooperative cancellation token.
#[derive(Debug, Clone)]
pub struct WorkflowContext {
    pub workflow_id: String,
    pub run_id: String,
    activity: ContainerActivity,
    artifacts: Option<Arc<dyn ArtifactStore>>,
    cancel: CancellationToken,
    retry: RetryPolicy,
}

impl WorkflowContext {
    #[must_use]
    pub fn new(
        workflow_id: impl Into<String>,
        run_id: impl Into<String>,
        activity: ContainerActivity,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
            activity,
            artifacts: None,
            cancel: CancellationToken::new(),
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_artifacts(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = Some(store);
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn artifacts(&self) -> Option<&Arc<dyn ArtifactStore>> {
        self.artifacts.as_ref()
    }

    pub(crate) fn ensure_active(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            CancelledSnafu.fail()
        } else {
            Ok(())
        }
    }

    /// Run one container activity. Infrastructure errors are re-driven
    /// per the host retry policy; after the final attempt they degrade
    /// into a failed result.
    pub(crate) async fn run_container(&self, spec: &ContainerSpec) -> ContainerResult {
        let mut attempt: u32 = 0;
        let mut interval = self.retry.initial_interval;
        loop {
            attempt += 1;
            match self.activity.run(spec, &self.cancel).await {
                Ok(result) => return result,
                Err(err) => {
                    if attempt >= self.retry.max_attempts || self.cancel.is_cancelled() {
                        return ContainerResult::failed(
                            spec.display_name(),
                            chrono::Utc::now(),
                            format!("activity failed after {attempt} attempts: {err}"),
                        );
                    }
                    warn!(attempt, error = %err, "container activity failed, retrying");
                    tokio::time::sleep(interval).await;
                    interval = self.retry.next_interval(interval);
                }
            }
        }
    }

    /// Run with step-level retry on top: a failed result is re-driven up
    /// to `attempts` total tries with a fixed delay between them.
    pub(crate) async fn run_step_container(
        &self,
        spec: &ContainerSpec,
        retry: Option<&StepRetry>,
    ) -> ContainerResult {
        let mut result = self.run_container(spec).await;
        if let Some(retry) = retry {
            let mut attempt: u32 = 1;
            while !result.success && attempt < retry.attempts && !self.cancel.is_cancelled() {
                attempt += 1;
                warn!(
                    container = %spec.display_name(),
                    attempt,
                    of = retry.attempts,
                    "step retry re-driving failed container"
                );
                tokio::time::sleep(retry.delay).await;
                result = self.run_container(spec).await;
            }
        }
        result
    }
}
