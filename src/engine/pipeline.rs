//! Sequential pipeline workflow: containers run one after another, never
//! overlapping, optionally halting at the first failure.

use std::time::Instant;

use crate::container::ContainerResult;
use crate::workflow::{BatchOutput, FailureSummary, PipelineInput};

use super::{Result, WorkflowContext};

pub async fn pipeline(ctx: &WorkflowContext, input: &PipelineInput) -> Result<BatchOutput> {
    input.validate()?;
    ctx.ensure_active()?;

    let started = Instant::now();
    let mut output = BatchOutput::default();
    for spec in &input.containers {
        ctx.ensure_active()?;
        let result = ctx.run_container(spec).await;
        let failed = !result.success;
        let summary = failure_of(&result);
        output.results.push(result);
        if failed {
            output.failures += 1;
            if input.stop_on_error {
                output.error = Some(summary);
                break;
            }
        } else {
            output.successes += 1;
        }
    }
    output.duration = started.elapsed();
    Ok(output)
}

/// Describe a failed result with the user-visible tag: `timeout` when the
/// run deadline was exceeded, `execution` otherwise.
pub(crate) fn failure_of(result: &ContainerResult) -> FailureSummary {
    if result.timed_out() {
        return FailureSummary::timeout(format!(
            "container '{}': {}",
            result.name,
            result.error.clone().unwrap_or_default()
        ));
    }
    match &result.error {
        Some(message) => {
            FailureSummary::execution(format!("container '{}': {message}", result.name))
        }
        None => FailureSummary::execution(format!(
            "container '{}' exited with code {}",
            result.name, result.exit_code
        )),
    }
}
