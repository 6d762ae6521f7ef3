//! Parallel fan-out workflow.
//!
//! Every activity future is submitted before any is awaited, so the host
//! may schedule them concurrently while the workflow suspends; results
//! are observed in submission order regardless of completion order.

use std::time::Instant;
use tracing::debug;

use crate::container::ContainerSpec;
use crate::workflow::{BatchOutput, FailureStrategy, ParallelInput};

use super::pipeline::failure_of;
use super::{Result, WorkflowContext};

pub async fn parallel(ctx: &WorkflowContext, input: &ParallelInput) -> Result<BatchOutput> {
    let strategy = input.validate()?;
    ctx.ensure_active()?;
    if let Some(max_concurrency) = input.max_concurrency {
        debug!(max_concurrency, "max_concurrency is advisory; the host task queue enforces it");
    }
    run_specs(ctx, &input.containers, strategy).await
}

/// Shared fan-out core, also driven by the loop engine.
pub(crate) async fn run_specs(
    ctx: &WorkflowContext,
    specs: &[ContainerSpec],
    strategy: FailureStrategy,
) -> Result<BatchOutput> {
    let started = Instant::now();

    let futures: Vec<_> = specs.iter().map(|spec| ctx.run_container(spec)).collect();
    let results = futures::future::join_all(futures).await;

    let mut output = BatchOutput::default();
    for result in results {
        if result.success {
            output.successes += 1;
        } else {
            output.failures += 1;
            if strategy == FailureStrategy::FailFast && output.error.is_none() {
                output.error = Some(failure_of(&result));
            }
        }
        output.results.push(result);
    }
    output.duration = started.elapsed();
    Ok(output)
}
