use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::activity::ContainerActivity;
use crate::artifact::ArtifactStore;
use crate::engine::{self, WorkflowContext};
use crate::executor::{
    Executor, Result, RetryPolicy, RunNotFoundSnafu, RunOutcome, UnsupportedQuerySnafu,
    WorkflowHandle, WorkflowRequest, WorkflowResponse, WorkflowStatus,
};
use crate::runner::ContainerRunner;
use crate::workflow::FailureSummary;
use snafu::prelude::*;

struct RunEntry {
    workflow_id: String,
    status: WorkflowStatus,
    outcome: Option<RunOutcome>,
    cancel: CancellationToken,
    signals: HashMap<String, serde_json::Value>,
}

/// In-process durable host: one task per run, a registry of run state,
/// cooperative cancellation. Suitable for tests and single-process
/// deployments; a real host replaces this behind the same trait.
pub struct LocalExecutor {
    activity: ContainerActivity,
    artifacts: Option<Arc<dyn ArtifactStore>>,
    retry: RetryPolicy,
    runs: Arc<RwLock<HashMap<String, RunEntry>>>,
}

impl LocalExecutor {
    #[must_use]
    pub fn new(runner: Arc<dyn ContainerRunner>) -> Self {
        Self {
            activity: ContainerActivity::new(runner),
            artifacts: None,
            retry: RetryPolicy::default(),
            runs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Attach a default artifact store handed to every workflow context.
    #[must_use]
    pub fn with_artifacts(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = Some(store);
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

async fn dispatch(ctx: &WorkflowContext, request: WorkflowRequest) -> RunOutcome {
    let outcome: engine::Result<WorkflowResponse> = match request {
        WorkflowRequest::Single(spec) => engine::single::single(ctx, &spec)
            .await
            .map(WorkflowResponse::Single),
        WorkflowRequest::Pipeline(input) => engine::pipeline::pipeline(ctx, &input)
            .await
            .map(WorkflowResponse::Batch),
        WorkflowRequest::Parallel(input) => engine::parallel::parallel(ctx, &input)
            .await
            .map(WorkflowResponse::Batch),
        WorkflowRequest::LoopItems(input) => engine::loops::loop_items(ctx, &input)
            .await
            .map(WorkflowResponse::Loop),
        WorkflowRequest::LoopParam(input) => engine::loops::loop_param(ctx, &input)
            .await
            .map(WorkflowResponse::Loop),
        WorkflowRequest::Dag(input) => {
            engine::dag::dag(ctx, &input).await.map(WorkflowResponse::Dag)
        }
        WorkflowRequest::WithParameters { spec, parameters } => {
            engine::params::with_parameters(ctx, &spec, &parameters)
                .await
                .map(WorkflowResponse::Single)
        }
    };
    outcome.map_err(|err| err.summary())
}

#[async_trait]
impl Executor for LocalExecutor {
    async fn submit(&self, workflow_id: &str, request: WorkflowRequest) -> Result<WorkflowHandle> {
        let run_id = Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();

        let mut ctx = WorkflowContext::new(workflow_id, &run_id, self.activity.clone())
            .with_cancellation(cancel.clone())
            .with_retry(self.retry);
        if let Some(store) = &self.artifacts {
            ctx = ctx.with_artifacts(Arc::clone(store));
        }

        {
            let mut runs = self.runs.write().await;
            runs.insert(
                run_id.clone(),
                RunEntry {
                    workflow_id: workflow_id.to_string(),
                    status: WorkflowStatus::Running,
                    outcome: None,
                    cancel: cancel.clone(),
                    signals: HashMap::new(),
                },
            );
        }
        info!(
            workflow = workflow_id,
            run = %run_id,
            kind = request.kind(),
            "workflow submitted"
        );

        let runs = Arc::clone(&self.runs);
        let run_key = run_id.clone();
        tokio::spawn(async move {
            let outcome = dispatch(&ctx, request).await;
            let mut runs = runs.write().await;
            if let Some(entry) = runs.get_mut(&run_key) {
                if entry.status == WorkflowStatus::Running {
                    entry.status = match &outcome {
                        Ok(response) if response.succeeded() => WorkflowStatus::Completed,
                        Ok(_) | Err(_) => {
                            if cancel.is_cancelled() {
                                WorkflowStatus::Cancelled
                            } else {
                                WorkflowStatus::Failed
                            }
                        }
                    };
                }
                if entry.outcome.is_none() {
                    entry.outcome = Some(outcome);
                }
            }
        });

        Ok(WorkflowHandle {
            workflow_id: workflow_id.to_string(),
            run_id,
            status: WorkflowStatus::Running,
        })
    }

    async fn status(&self, run_id: &str) -> Result<WorkflowStatus> {
        let runs = self.runs.read().await;
        runs.get(run_id)
            .map(|entry| entry.status)
            .context(RunNotFoundSnafu { run_id })
    }

    async fn result(&self, run_id: &str) -> Result<Option<RunOutcome>> {
        let runs = self.runs.read().await;
        let entry = runs.get(run_id).context(RunNotFoundSnafu { run_id })?;
        Ok(entry.outcome.clone())
    }

    async fn cancel(&self, run_id: &str) -> Result<()> {
        let runs = self.runs.read().await;
        let entry = runs.get(run_id).context(RunNotFoundSnafu { run_id })?;
        entry.cancel.cancel();
        Ok(())
    }

    async fn terminate(&self, run_id: &str, reason: &str) -> Result<()> {
        let mut runs = self.runs.write().await;
        let entry = runs.get_mut(run_id).context(RunNotFoundSnafu { run_id })?;
        entry.cancel.cancel();
        entry.status = WorkflowStatus::Terminated;
        if entry.outcome.is_none() {
            entry.outcome = Some(Err(FailureSummary::execution(format!(
                "terminated: {reason}"
            ))));
        }
        Ok(())
    }

    async fn signal(&self, run_id: &str, name: &str, payload: serde_json::Value) -> Result<()> {
        let mut runs = self.runs.write().await;
        let entry = runs.get_mut(run_id).context(RunNotFoundSnafu { run_id })?;
        entry.signals.insert(name.to_string(), payload);
        Ok(())
    }

    async fn query(&self, run_id: &str, name: &str) -> Result<serde_json::Value> {
        let runs = self.runs.read().await;
        let entry = runs.get(run_id).context(RunNotFoundSnafu { run_id })?;
        match name {
            "status" => Ok(serde_json::to_value(entry.status)
                .unwrap_or(serde_json::Value::Null)),
            "workflow_id" => Ok(serde_json::Value::String(entry.workflow_id.clone())),
            other => entry
                .signals
                .get(other)
                .cloned()
                .context(UnsupportedQuerySnafu { name: other }),
        }
    }
}
