//! Typed workflow inputs and outputs, with entry validation.
//!
//! Every input is validated before any activity is invoked; validation
//! failures are workflow-scoped and short-circuit execution entirely.

use indexmap::IndexMap;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::artifact::ArtifactStore;
use crate::container::{ContainerResult, ContainerSpec, WaitStrategy};
use crate::extract::OutputSource;
use crate::step::{StepSpec, WhenExpr};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("container image must not be empty"))]
    EmptyImage,

    #[snafu(display("workflow requires at least one container"))]
    EmptyContainerList,

    #[snafu(display("loop requires at least one item"))]
    EmptyItems,

    #[snafu(display("loop requires at least one parameter"))]
    EmptyParameterSet,

    #[snafu(display("parameter '{name}' has an empty value array"))]
    EmptyParameterValues { name: String },

    #[snafu(display("dag requires at least one node"))]
    EmptyNodeList,

    #[snafu(display("dag node name must not be empty"))]
    EmptyNodeName,

    #[snafu(display("duplicate dag node '{name}'"))]
    DuplicateNode { name: String },

    #[snafu(display("node '{node}' depends on unknown node '{dependency}'"))]
    UnknownDependency { node: String, dependency: String },

    #[snafu(display("dependency cycle involving node '{node}'"))]
    DependencyCycle { node: String },

    #[snafu(display("invalid failure strategy '{value}'"))]
    InvalidFailureStrategy { value: String },

    #[snafu(display("invalid wait strategy: {message}"))]
    InvalidWaitStrategy { message: String },

    #[snafu(display("invalid when expression '{expression}' on node '{node}'"))]
    InvalidWhenExpression { node: String, expression: String },

    #[snafu(display("output '{name}' on node '{node}' has a file source without a path"))]
    MissingOutputPath { node: String, name: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// The user-visible shape of a workflow failure: a short tag and a human
/// message. The wrapped cause stays on the originating error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureSummary {
    pub kind: String,
    pub message: String,
}

impl FailureSummary {
    #[must_use]
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn execution(message: impl Into<String>) -> Self {
        Self::new("execution", message)
    }

    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new("timeout", message)
    }

    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation", message)
    }

    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new("configuration", message)
    }

    #[must_use]
    pub fn input(message: impl Into<String>) -> Self {
        Self::new("input", message)
    }

    #[must_use]
    pub fn artifact(message: impl Into<String>) -> Self {
        Self::new("artifact", message)
    }
}

impl std::fmt::Display for FailureSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// How a batch of containers reacts to one of them failing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailureStrategy {
    /// Tolerate failures and run every item.
    #[default]
    Continue,
    /// Surface the first failure's error once submitted work resolves.
    FailFast,
}

impl FailureStrategy {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "" | "continue" => Ok(FailureStrategy::Continue),
            "fail_fast" => Ok(FailureStrategy::FailFast),
            other => InvalidFailureStrategySnafu { value: other }.fail(),
        }
    }
}

/// One named template parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: String,
}

impl Parameter {
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Shape checks shared by every workflow over a single spec.
pub fn validate_spec(spec: &ContainerSpec) -> Result<()> {
    ensure!(!spec.image.is_empty(), EmptyImageSnafu);
    match &spec.wait {
        Some(WaitStrategy::Log { substring, .. }) => {
            ensure!(
                !substring.is_empty(),
                InvalidWaitStrategySnafu {
                    message: "log wait requires a non-empty substring",
                }
            );
        }
        Some(WaitStrategy::Port { port }) | Some(WaitStrategy::Http { port, .. }) => {
            ensure!(
                *port != 0,
                InvalidWaitStrategySnafu {
                    message: "wait strategy port must not be zero",
                }
            );
        }
        Some(WaitStrategy::Healthy) | Some(WaitStrategy::None) | None => {}
    }
    Ok(())
}

/// Input to the sequential pipeline workflow.
#[derive(Debug, Clone, Default)]
pub struct PipelineInput {
    pub containers: Vec<ContainerSpec>,
    /// Halt at the first failed container.
    pub stop_on_error: bool,
}

impl PipelineInput {
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.containers.is_empty(), EmptyContainerListSnafu);
        for spec in &self.containers {
            validate_spec(spec)?;
        }
        Ok(())
    }
}

/// Input to the parallel fan-out workflow.
#[derive(Debug, Clone, Default)]
pub struct ParallelInput {
    pub containers: Vec<ContainerSpec>,
    /// `""`, `continue`, or `fail_fast`.
    pub failure_strategy: String,
    /// Advisory; the host task queue imposes the real limit.
    pub max_concurrency: Option<usize>,
}

impl ParallelInput {
    pub fn validate(&self) -> Result<FailureStrategy> {
        ensure!(!self.containers.is_empty(), EmptyContainerListSnafu);
        for spec in &self.containers {
            validate_spec(spec)?;
        }
        FailureStrategy::parse(&self.failure_strategy)
    }
}

/// Input to the withItems loop workflow.
#[derive(Debug, Clone, Default)]
pub struct ItemsLoopInput {
    pub items: Vec<String>,
    pub template: ContainerSpec,
    pub parallel: bool,
    pub max_concurrency: Option<usize>,
    pub failure_strategy: String,
}

impl ItemsLoopInput {
    pub fn validate(&self) -> Result<FailureStrategy> {
        ensure!(!self.items.is_empty(), EmptyItemsSnafu);
        validate_spec(&self.template)?;
        FailureStrategy::parse(&self.failure_strategy)
    }
}

/// Input to the withParam loop workflow.
#[derive(Debug, Clone, Default)]
pub struct ParamLoopInput {
    pub parameters: IndexMap<String, Vec<String>>,
    pub template: ContainerSpec,
    pub parallel: bool,
    pub max_concurrency: Option<usize>,
    pub failure_strategy: String,
}

impl ParamLoopInput {
    pub fn validate(&self) -> Result<FailureStrategy> {
        ensure!(!self.parameters.is_empty(), EmptyParameterSetSnafu);
        for (name, values) in &self.parameters {
            ensure!(
                !values.is_empty(),
                EmptyParameterValuesSnafu {
                    name: name.as_str(),
                }
            );
        }
        validate_spec(&self.template)?;
        FailureStrategy::parse(&self.failure_strategy)
    }
}

/// One DAG vertex: a step plus the names it depends on.
#[derive(Debug, Clone)]
pub struct DagNode {
    pub name: String,
    pub step: StepSpec,
    pub dependencies: Vec<String>,
}

impl DagNode {
    #[must_use]
    pub fn new(name: impl Into<String>, step: StepSpec) -> Self {
        Self {
            name: name.into(),
            step,
            dependencies: Vec::new(),
        }
    }

    #[must_use]
    pub fn depends_on(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }
}

/// Input to the DAG workflow. The artifact store is a typed capability
/// handle; nodes only touch it through the [`ArtifactStore`] trait.
#[derive(Debug, Clone, Default)]
pub struct DagInput {
    pub nodes: Vec<DagNode>,
    pub parameters: Vec<Parameter>,
    pub fail_fast: bool,
    /// Advisory parallelism hint.
    pub max_parallel: Option<usize>,
    pub artifact_store: Option<Arc<dyn ArtifactStore>>,
}

impl DagInput {
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.nodes.is_empty(), EmptyNodeListSnafu);

        let mut names = HashMap::new();
        for node in &self.nodes {
            ensure!(!node.name.is_empty(), EmptyNodeNameSnafu);
            ensure!(
                names.insert(node.name.as_str(), ()).is_none(),
                DuplicateNodeSnafu {
                    name: node.name.as_str(),
                }
            );
            validate_spec(&node.step.container)?;
            for output in &node.step.outputs {
                if output.source == OutputSource::File && output.path.is_none() {
                    return MissingOutputPathSnafu {
                        node: node.name.as_str(),
                        name: output.name.as_str(),
                    }
                    .fail();
                }
            }
            if let Some(when) = node.step.when.as_deref() {
                ensure!(
                    WhenExpr::parse(when).is_some(),
                    InvalidWhenExpressionSnafu {
                        node: node.name.as_str(),
                        expression: when,
                    }
                );
            }
        }

        for node in &self.nodes {
            for dependency in &node.dependencies {
                ensure!(
                    names.contains_key(dependency.as_str()),
                    UnknownDependencySnafu {
                        node: node.name.as_str(),
                        dependency: dependency.as_str(),
                    }
                );
            }
        }

        self.check_acyclic()
    }

    fn check_acyclic(&self) -> Result<()> {
        let mut graph = DiGraph::<&str, ()>::new();
        let mut indices = HashMap::new();
        for node in &self.nodes {
            let index = graph.add_node(node.name.as_str());
            indices.insert(node.name.as_str(), index);
        }
        for node in &self.nodes {
            for dependency in &node.dependencies {
                if let (Some(&from), Some(&to)) = (
                    indices.get(dependency.as_str()),
                    indices.get(node.name.as_str()),
                ) {
                    graph.add_edge(from, to, ());
                }
            }
        }
        match petgraph::algo::toposort(&graph, None) {
            Ok(_) => Ok(()),
            Err(cycle) => {
                let node = graph
                    .node_weight(cycle.node_id())
                    .map_or_else(String::new, |name| (*name).to_string());
                DependencyCycleSnafu { node }.fail()
            }
        }
    }
}

/// Aggregate of a sequential or parallel batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchOutput {
    pub results: Vec<ContainerResult>,
    pub successes: usize,
    pub failures: usize,
    pub duration: Duration,
    /// Present when stop-on-error / fail-fast halted the batch.
    pub error: Option<FailureSummary>,
}

/// Aggregate of a loop workflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoopOutput {
    pub results: Vec<ContainerResult>,
    pub item_count: usize,
    pub successes: usize,
    pub failures: usize,
    pub duration: Duration,
    pub error: Option<FailureSummary>,
}

/// Node lifecycle within a DAG traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

/// Per-node record, appended in execution order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResult {
    pub name: String,
    pub state: NodeState,
    pub result: Option<ContainerResult>,
    pub error: Option<FailureSummary>,
}

/// Aggregate of a DAG workflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DagOutput {
    pub results: IndexMap<String, ContainerResult>,
    pub node_results: Vec<NodeResult>,
    pub step_outputs: IndexMap<String, IndexMap<String, String>>,
    pub successes: usize,
    pub failures: usize,
    pub duration: Duration,
    pub error: Option<FailureSummary>,
}
