//! Loop workflows: withItems and withParam expansion.
//!
//! A loop is a generator of substituted specs fed to the parallel or
//! sequential executor; substitution is the only loop-specific logic.

use indexmap::IndexMap;

use crate::cartesian;
use crate::container::ContainerSpec;
use crate::substitution;
use crate::workflow::{
    FailureStrategy, ItemsLoopInput, LoopOutput, ParamLoopInput, PipelineInput,
};

use super::{Result, WorkflowContext, parallel, pipeline};

/// Run the template once per item, substituting `{{item}}` and
/// `{{index}}`.
pub async fn loop_items(ctx: &WorkflowContext, input: &ItemsLoopInput) -> Result<LoopOutput> {
    let strategy = input.validate()?;
    ctx.ensure_active()?;

    let no_params = IndexMap::new();
    let specs: Vec<ContainerSpec> = input
        .items
        .iter()
        .enumerate()
        .map(|(index, item)| substitution::substitute_spec(&input.template, item, index, &no_params))
        .collect();
    run_batch(ctx, specs, input.parallel, strategy).await
}

/// Run the template once per cartesian combination of the parameter grid,
/// substituting `{{.name}}`/`{{name}}` and `{{index}}`.
pub async fn loop_param(ctx: &WorkflowContext, input: &ParamLoopInput) -> Result<LoopOutput> {
    let strategy = input.validate()?;
    ctx.ensure_active()?;

    let combinations = cartesian::expand(&input.parameters);
    let specs: Vec<ContainerSpec> = combinations
        .iter()
        .enumerate()
        .map(|(index, params)| substitution::substitute_spec(&input.template, "", index, params))
        .collect();
    run_batch(ctx, specs, input.parallel, strategy).await
}

async fn run_batch(
    ctx: &WorkflowContext,
    specs: Vec<ContainerSpec>,
    parallel_mode: bool,
    strategy: FailureStrategy,
) -> Result<LoopOutput> {
    let item_count = specs.len();
    let batch = if parallel_mode {
        parallel::run_specs(ctx, &specs, strategy).await?
    } else {
        let input = PipelineInput {
            containers: specs,
            stop_on_error: strategy == FailureStrategy::FailFast,
        };
        pipeline::pipeline(ctx, &input).await?
    };
    Ok(LoopOutput {
        results: batch.results,
        item_count,
        successes: batch.successes,
        failures: batch.failures,
        duration: batch.duration,
        error: batch.error,
    })
}
