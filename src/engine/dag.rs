//! DAG workflow: dependency-ordered execution with data and artifact
//! flow.
//!
//! Traversal is a recursive depth-first walk: dependencies run before
//! dependents, siblings in declared order, each node exactly once. The
//! sequential ordering is mandatory for deterministic replay; concurrency
//! across independent sub-graphs would have to preserve the declared-order
//! result list and the fail-fast contract.

use async_recursion::async_recursion;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::path::Path;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::activity;
use crate::artifact::{self, Artifact, ArtifactMetadata, ArtifactStore};
use crate::bind;
use crate::container::ContainerResult;
use crate::extract;
use crate::step::WhenExpr;
use crate::substitution;
use crate::workflow::{
    DagInput, DagNode, DagOutput, FailureSummary, NodeResult, NodeState,
};

use super::pipeline::failure_of;
use super::{Result, WorkflowContext};

/// Bookkeeping for one traversal. A single lock guards it; the maps are
/// only ever touched from the one workflow task that owns the traversal.
#[derive(Default)]
struct Traversal {
    executed: HashSet<String>,
    /// Nodes whose failure (or fail-fast skip) blocks dependents.
    failed: HashSet<String>,
    /// Set once a fail-fast halt is underway; no further containers run.
    halted: bool,
    results: IndexMap<String, ContainerResult>,
    step_outputs: IndexMap<String, IndexMap<String, String>>,
    node_results: Vec<NodeResult>,
    successes: usize,
    failures: usize,
}

/// Node-scoped failure that halts the traversal under fail-fast.
enum Halt {
    DependencyFailed { node: String, dependency: String },
    NodeFailed { summary: FailureSummary },
}

impl Halt {
    fn into_summary(self) -> FailureSummary {
        match self {
            Halt::DependencyFailed { node, dependency } => FailureSummary::execution(format!(
                "dependency '{dependency}' of node '{node}' failed"
            )),
            Halt::NodeFailed { summary } => summary,
        }
    }
}

pub async fn dag(ctx: &WorkflowContext, input: &DagInput) -> Result<DagOutput> {
    input.validate()?;
    ctx.ensure_active()?;

    let started = Instant::now();
    if let Some(max_parallel) = input.max_parallel {
        debug!(max_parallel, "max_parallel is advisory; traversal stays sequential for replay");
    }
    let nodes: IndexMap<&str, &DagNode> = input
        .nodes
        .iter()
        .map(|node| (node.name.as_str(), node))
        .collect();
    let store = input
        .artifact_store
        .clone()
        .or_else(|| ctx.artifacts().cloned());
    let state = Mutex::new(Traversal::default());

    let mut halted = None;
    for node in &input.nodes {
        ctx.ensure_active()?;
        if let Err(halt) =
            execute_node(ctx, input, &nodes, store.as_deref(), &state, &node.name).await
        {
            // the first halt names the root cause; later roots are still
            // visited so dependents of failed nodes record their skips
            halted.get_or_insert(halt);
        }
    }

    let traversal = state.into_inner();
    Ok(DagOutput {
        results: traversal.results,
        node_results: traversal.node_results,
        step_outputs: traversal.step_outputs,
        successes: traversal.successes,
        failures: traversal.failures,
        duration: started.elapsed(),
        error: halted.map(Halt::into_summary),
    })
}

#[async_recursion]
async fn execute_node(
    ctx: &WorkflowContext,
    input: &DagInput,
    nodes: &IndexMap<&str, &DagNode>,
    store: Option<&dyn ArtifactStore>,
    state: &Mutex<Traversal>,
    name: &str,
) -> std::result::Result<(), Halt> {
    {
        let traversal = state.lock().await;
        if traversal.executed.contains(name) {
            return Ok(());
        }
    }
    let Some(&node) = nodes.get(name) else {
        // validation guarantees presence
        return Ok(());
    };

    // dependencies first, in declared order; the failure check only
    // applies under fail-fast
    for dependency in &node.dependencies {
        if let Err(halt) = execute_node(ctx, input, nodes, store, state, dependency).await {
            // the chain below halted; this node records its own skip
            // before the halt continues upward
            mark_skipped(state, name).await;
            return Err(halt);
        }
        if input.fail_fast {
            let dependency_failed = {
                let traversal = state.lock().await;
                traversal.failed.contains(dependency.as_str())
            };
            if dependency_failed {
                mark_skipped(state, name).await;
                return Err(Halt::DependencyFailed {
                    node: name.to_string(),
                    dependency: dependency.clone(),
                });
            }
        }
    }

    // once a fail-fast halt is underway nothing else may start; nodes
    // whose dependencies all succeeded are left unvisited
    if input.fail_fast {
        let traversal = state.lock().await;
        if traversal.halted {
            return Ok(());
        }
    }

    // when-condition gates the node after parameter substitution
    if let Some(when) = node.step.when.as_deref() {
        let rendered = substitution::apply_parameters_str(when, &input.parameters);
        if let Some(expr) = WhenExpr::parse(&rendered) {
            if !expr.evaluate() {
                debug!(node = name, expression = %rendered, "when condition false, skipping");
                let mut traversal = state.lock().await;
                traversal.executed.insert(name.to_string());
                traversal.node_results.push(NodeResult {
                    name: name.to_string(),
                    state: NodeState::Skipped,
                    result: None,
                    error: None,
                });
                return Ok(());
            }
        }
    }

    // assemble the spec: dag parameters, then upstream outputs
    let mut spec = node.step.container.clone();
    if !input.parameters.is_empty() {
        spec = substitution::apply_parameters(&spec, &input.parameters);
    }
    if !node.step.inputs.is_empty() {
        let bound = {
            let traversal = state.lock().await;
            bind::bind_inputs(&mut spec, &node.step.inputs, &traversal.step_outputs)
        };
        if let Err(err) = bound {
            warn!(node = name, error = %err, "input binding failed");
            let summary = FailureSummary::input(format!("node '{name}': {err}"));
            return fail_without_result(input, state, name, summary).await;
        }
    }

    // required input artifacts must land before the container starts
    if let Some(store) = store {
        for artifact in &node.step.input_artifacts {
            if let Err(err) = fetch_input_artifact(ctx, node, store, artifact).await {
                warn!(node = name, artifact = %artifact.name, error = %err, "artifact download failed");
                let summary = FailureSummary::artifact(format!("node '{name}': {err}"));
                return fail_without_result(input, state, name, summary).await;
            }
        }
    }

    let result = ctx.run_step_container(&spec, node.step.retry.as_ref()).await;

    // extraction failures are logged, never fatal; the step-output entry
    // is simply omitted
    let outputs = if result.success && !node.step.outputs.is_empty() {
        match extract::extract_outputs(&node.step.outputs, &result) {
            Ok(outputs) => Some(outputs),
            Err(err) => {
                warn!(node = name, error = %err, "output extraction failed");
                None
            }
        }
    } else {
        None
    };

    // upload failures are logged; the producing node still succeeds
    if result.success {
        if let Some(store) = store {
            for artifact in &node.step.output_artifacts {
                let meta = ArtifactMetadata::new(
                    &ctx.workflow_id,
                    &ctx.run_id,
                    name,
                    artifact.clone(),
                );
                if let Err(err) = activity::upload_artifact(
                    store,
                    &meta,
                    Path::new(&artifact.path),
                    ctx.cancellation(),
                )
                .await
                {
                    warn!(node = name, artifact = %artifact.name, error = %err, "artifact upload failed");
                }
            }
        }
    }

    let failure = (!result.success).then(|| failure_of(&result));
    // an activity-level error is tolerated by continue_on_error, a plain
    // non-zero exit by continue_on_fail
    let tolerated = if result.error.is_some() {
        node.step.continue_on_error
    } else {
        node.step.continue_on_fail
    };
    let blocks_dependents = failure.is_some() && !tolerated;
    {
        let mut traversal = state.lock().await;
        traversal.executed.insert(name.to_string());
        if let Some(outputs) = outputs {
            traversal.step_outputs.insert(name.to_string(), outputs);
        }
        if failure.is_some() {
            traversal.failures += 1;
            if blocks_dependents {
                traversal.failed.insert(name.to_string());
                if input.fail_fast {
                    traversal.halted = true;
                }
            }
        } else {
            traversal.successes += 1;
        }
        traversal.node_results.push(NodeResult {
            name: name.to_string(),
            state: if failure.is_some() {
                NodeState::Failed
            } else {
                NodeState::Succeeded
            },
            result: Some(result.clone()),
            error: failure.clone(),
        });
        traversal.results.insert(name.to_string(), result);
    }

    if input.fail_fast && blocks_dependents {
        if let Some(summary) = failure {
            return Err(Halt::NodeFailed { summary });
        }
    }
    Ok(())
}

/// Record a node that failed before its container could run (binding or
/// required-artifact failure). Halts the traversal under fail-fast.
async fn fail_without_result(
    input: &DagInput,
    state: &Mutex<Traversal>,
    name: &str,
    summary: FailureSummary,
) -> std::result::Result<(), Halt> {
    {
        let mut traversal = state.lock().await;
        traversal.executed.insert(name.to_string());
        traversal.failed.insert(name.to_string());
        traversal.failures += 1;
        if input.fail_fast {
            traversal.halted = true;
        }
        traversal.node_results.push(NodeResult {
            name: name.to_string(),
            state: NodeState::Failed,
            result: None,
            error: Some(summary.clone()),
        });
    }
    if input.fail_fast {
        return Err(Halt::NodeFailed { summary });
    }
    Ok(())
}

/// Record a node skipped because a fail-fast halt reached it through a
/// failed dependency. Skipped nodes block their own dependents, so the
/// skip propagates along the chain.
async fn mark_skipped(state: &Mutex<Traversal>, name: &str) {
    let mut traversal = state.lock().await;
    if !traversal.executed.insert(name.to_string()) {
        return;
    }
    traversal.failed.insert(name.to_string());
    traversal.halted = true;
    traversal.node_results.push(NodeResult {
        name: name.to_string(),
        state: NodeState::Skipped,
        result: None,
        error: None,
    });
}

/// Resolve an input artifact against the node's dependencies in declared
/// order; the first existing object wins. Absence is fatal unless the
/// artifact is optional.
async fn fetch_input_artifact(
    ctx: &WorkflowContext,
    node: &DagNode,
    store: &dyn ArtifactStore,
    artifact: &Artifact,
) -> artifact::Result<()> {
    for dependency in &node.dependencies {
        let meta = ArtifactMetadata::new(
            &ctx.workflow_id,
            &ctx.run_id,
            dependency,
            artifact.clone(),
        );
        if store.exists(&meta, ctx.cancellation()).await? {
            return activity::download_artifact(
                store,
                &meta,
                Path::new(&artifact.path),
                ctx.cancellation(),
            )
            .await;
        }
    }
    if artifact.optional {
        debug!(artifact = %artifact.name, "optional input artifact not found");
        return Ok(());
    }
    artifact::DownloadSnafu {
        message: format!(
            "input artifact '{}' not found in any dependency of node '{}'",
            artifact.name, node.name
        ),
    }
    .fail()
}
