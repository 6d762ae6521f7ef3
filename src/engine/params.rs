//! Parameter workflow: template substitution over one spec, then the
//! single-container executor.

use crate::container::{ContainerResult, ContainerSpec};
use crate::substitution;
use crate::workflow::Parameter;

use super::{Result, WorkflowContext, single};

/// Replace `{{.name}}` in every environment value and command element,
/// then run the spec.
pub async fn with_parameters(
    ctx: &WorkflowContext,
    spec: &ContainerSpec,
    parameters: &[Parameter],
) -> Result<ContainerResult> {
    let spec = substitution::apply_parameters(spec, parameters);
    single::single(ctx, &spec).await
}
