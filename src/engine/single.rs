//! Single-container workflow.

use crate::container::{ContainerResult, ContainerSpec, DEFAULT_RUN_TIMEOUT};
use crate::workflow::validate_spec;

use super::{Result, WorkflowContext};

/// Run one container to completion, applying the default run timeout when
/// the spec leaves it unset.
pub async fn single(ctx: &WorkflowContext, spec: &ContainerSpec) -> Result<ContainerResult> {
    validate_spec(spec)?;
    ctx.ensure_active()?;

    let mut spec = spec.clone();
    if spec.run_timeout.is_none() {
        spec.run_timeout = Some(DEFAULT_RUN_TIMEOUT);
    }
    Ok(ctx.run_container(&spec).await)
}
