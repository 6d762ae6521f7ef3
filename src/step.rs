use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::artifact::Artifact;
use crate::bind::InputMapping;
use crate::container::ContainerSpec;
use crate::extract::OutputDefinition;

/// A container execution enriched with workflow-level behavior: condition,
/// failure tolerance, resources, artifacts, secrets, retries, data flow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepSpec {
    pub container: ContainerSpec,
    /// Condition gating execution, of the form `lhs == rhs` or `lhs != rhs`.
    #[serde(default)]
    pub when: Option<String>,
    /// Tolerate a failed container (non-zero exit) without halting.
    #[serde(default)]
    pub continue_on_fail: bool,
    /// Tolerate an activity-level error without halting.
    #[serde(default)]
    pub continue_on_error: bool,
    /// Advisory resource requests and limits; not enforced by the engine.
    #[serde(default)]
    pub resources: Option<Resources>,
    #[serde(default)]
    pub input_artifacts: Vec<Artifact>,
    #[serde(default)]
    pub output_artifacts: Vec<Artifact>,
    #[serde(default)]
    pub secrets: Vec<SecretRef>,
    #[serde(default)]
    pub retry: Option<StepRetry>,
    /// Advisory dependency names; the DAG input carries the binding set.
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<OutputDefinition>,
    #[serde(default)]
    pub inputs: Vec<InputMapping>,
}

impl StepSpec {
    #[must_use]
    pub fn new(container: ContainerSpec) -> Self {
        Self {
            container,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_when(mut self, when: impl Into<String>) -> Self {
        self.when = Some(when.into());
        self
    }

    #[must_use]
    pub fn with_output(mut self, output: OutputDefinition) -> Self {
        self.outputs.push(output);
        self
    }

    #[must_use]
    pub fn with_input(mut self, input: InputMapping) -> Self {
        self.inputs.push(input);
        self
    }

    #[must_use]
    pub fn with_input_artifact(mut self, artifact: Artifact) -> Self {
        self.input_artifacts.push(artifact);
        self
    }

    #[must_use]
    pub fn with_output_artifact(mut self, artifact: Artifact) -> Self {
        self.output_artifacts.push(artifact);
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: StepRetry) -> Self {
        self.retry = Some(retry);
        self
    }

    #[must_use]
    pub fn with_continue_on_fail(mut self, continue_on_fail: bool) -> Self {
        self.continue_on_fail = continue_on_fail;
        self
    }
}

/// Advisory CPU/memory/GPU requests and limits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default)]
    pub cpu_request: Option<String>,
    #[serde(default)]
    pub cpu_limit: Option<String>,
    #[serde(default)]
    pub memory_request: Option<String>,
    #[serde(default)]
    pub memory_limit: Option<String>,
    #[serde(default)]
    pub gpu_count: Option<u32>,
}

/// Reference to an externally managed secret, exposed as an environment
/// variable by the surrounding platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretRef {
    pub name: String,
    pub env: String,
}

/// Step-level retry: a failed container result is re-driven up to
/// `attempts` total tries with a fixed delay between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRetry {
    pub attempts: u32,
    pub delay: Duration,
}

/// Parsed form of [`StepSpec::when`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WhenExpr {
    Eq { left: String, right: String },
    Ne { left: String, right: String },
}

impl WhenExpr {
    /// Parse a `lhs == rhs` / `lhs != rhs` comparison. `!=` is checked
    /// first so its `=` is not mistaken for the equality operator.
    #[must_use]
    pub fn parse(expression: &str) -> Option<Self> {
        if let Some((left, right)) = expression.split_once("!=") {
            return Some(WhenExpr::Ne {
                left: left.trim().to_string(),
                right: right.trim().to_string(),
            });
        }
        if let Some((left, right)) = expression.split_once("==") {
            return Some(WhenExpr::Eq {
                left: left.trim().to_string(),
                right: right.trim().to_string(),
            });
        }
        None
    }

    #[must_use]
    pub fn evaluate(&self) -> bool {
        match self {
            WhenExpr::Eq { left, right } => left == right,
            WhenExpr::Ne { left, right } => left != right,
        }
    }
}
