//! Lifecycle client: start, wait, watch, and control workflow runs over
//! the abstract [`Executor`] boundary.

use snafu::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep};

use crate::executor::{
    Executor, WorkflowHandle, WorkflowRequest, WorkflowResponse, WorkflowStatus,
};
use crate::workflow::FailureSummary;

/// Cadence of the watch poller.
pub const WATCH_INTERVAL: Duration = Duration::from_secs(5);

const RESULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("workflow did not complete within {timeout:?}"))]
    WaitTimeout { timeout: Duration },

    #[snafu(display("workflow failed: {summary}"))]
    WorkflowFailed { summary: FailureSummary },

    #[snafu(display("executor error: {source}"))]
    Host { source: crate::executor::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<crate::executor::Error> for Error {
    fn from(source: crate::executor::Error) -> Self {
        Error::Host { source }
    }
}

/// Handle-oriented client over a durable-execution host.
#[derive(Clone)]
pub struct WorkflowClient {
    executor: Arc<dyn Executor>,
}

impl WorkflowClient {
    #[must_use]
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }

    /// Submit a workflow and return its run handle.
    pub async fn submit(
        &self,
        workflow_id: &str,
        request: WorkflowRequest,
    ) -> Result<WorkflowHandle> {
        Ok(self.executor.submit(workflow_id, request).await?)
    }

    /// Submit and block until the run completes, bounded by `timeout`.
    ///
    /// Execution-scoped failures come back as the aggregate response with
    /// its recorded error; only workflow-scoped failures (validation,
    /// configuration, termination) surface as `Err`.
    pub async fn submit_and_wait(
        &self,
        workflow_id: &str,
        request: WorkflowRequest,
        timeout: Duration,
    ) -> Result<WorkflowResponse> {
        let handle = self.submit(workflow_id, request).await?;
        self.wait(&handle.run_id, timeout).await
    }

    /// Block until the run completes, bounded by `timeout`.
    pub async fn wait(&self, run_id: &str, timeout: Duration) -> Result<WorkflowResponse> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(outcome) = self.executor.result(run_id).await? {
                return match outcome {
                    Ok(response) => Ok(response),
                    Err(summary) => WorkflowFailedSnafu { summary }.fail(),
                };
            }
            if Instant::now() >= deadline {
                return WaitTimeoutSnafu { timeout }.fail();
            }
            sleep(RESULT_POLL_INTERVAL).await;
        }
    }

    /// Current status, read by polling the host.
    pub async fn status(&self, run_id: &str) -> Result<WorkflowStatus> {
        Ok(self.executor.status(run_id).await?)
    }

    /// Request cooperative cancellation.
    pub async fn cancel(&self, run_id: &str) -> Result<()> {
        Ok(self.executor.cancel(run_id).await?)
    }

    /// Hard-stop the run with a reason.
    pub async fn terminate(&self, run_id: &str, reason: &str) -> Result<()> {
        Ok(self.executor.terminate(run_id, reason).await?)
    }

    pub async fn signal(
        &self,
        run_id: &str,
        name: &str,
        payload: serde_json::Value,
    ) -> Result<()> {
        Ok(self.executor.signal(run_id, name, payload).await?)
    }

    pub async fn query(&self, run_id: &str, name: &str) -> Result<serde_json::Value> {
        Ok(self.executor.query(run_id, name).await?)
    }

    /// Poll status at [`WATCH_INTERVAL`] and push each observation until
    /// the run reaches a terminal state, then close the channel.
    #[must_use]
    pub fn watch(&self, run_id: &str) -> mpsc::Receiver<WorkflowStatus> {
        let (sender, receiver) = mpsc::channel(16);
        let executor = Arc::clone(&self.executor);
        let run_id = run_id.to_string();
        tokio::spawn(async move {
            loop {
                let status = match executor.status(&run_id).await {
                    Ok(status) => status,
                    Err(_) => break,
                };
                if sender.send(status).await.is_err() {
                    break;
                }
                if status.is_terminal() {
                    break;
                }
                sleep(WATCH_INTERVAL).await;
            }
        });
        receiver
    }
}
