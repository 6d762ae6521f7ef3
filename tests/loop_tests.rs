//! Loop engine behavior: withItems and withParam expansion.
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::indexing_slicing)]

mod common;

use std::collections::HashSet;

use common::mock_context;
use indexmap::IndexMap;
use stevedore::ContainerSpec;
use stevedore::engine::{self, loops};
use stevedore::workflow::{ItemsLoopInput, ParamLoopInput};

#[tokio::test]
async fn items_loop_substitutes_each_item() {
    let (ctx, _runner) = mock_context();
    let input = ItemsLoopInput {
        items: vec!["a".into(), "b".into(), "c".into()],
        template: ContainerSpec::new("alpine").with_command(["echo", "{{item}}"]),
        parallel: true,
        max_concurrency: None,
        failure_strategy: String::new(),
    };
    let output = loops::loop_items(&ctx, &input).await.unwrap();

    assert_eq!(output.item_count, 3);
    assert_eq!(output.successes, 3);
    assert_eq!(output.failures, 0);
    let stdouts: Vec<&str> = output.results.iter().map(|r| r.stdout.as_str()).collect();
    assert_eq!(stdouts, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn parallel_items_results_stay_in_item_order() {
    let (ctx, _runner) = mock_context();
    // later items finish first; results must still follow item order
    let input = ItemsLoopInput {
        items: vec!["90".into(), "40".into(), "5".into()],
        template: ContainerSpec::new("alpine")
            .with_command(["delay-echo", "{{item}}", "item-{{index}}"]),
        parallel: true,
        max_concurrency: None,
        failure_strategy: String::new(),
    };
    let output = loops::loop_items(&ctx, &input).await.unwrap();

    let stdouts: Vec<&str> = output.results.iter().map(|r| r.stdout.as_str()).collect();
    assert_eq!(stdouts, vec!["item-0", "item-1", "item-2"]);
}

#[tokio::test]
async fn sequential_items_with_fail_fast_stop_early() {
    let (ctx, _runner) = mock_context();
    let input = ItemsLoopInput {
        items: vec!["true".into(), "false".into(), "true".into()],
        template: ContainerSpec::new("alpine").with_command(["{{item}}"]),
        parallel: false,
        max_concurrency: None,
        failure_strategy: "fail_fast".to_string(),
    };
    let output = loops::loop_items(&ctx, &input).await.unwrap();

    assert_eq!(output.results.len(), 2);
    assert_eq!(output.successes, 1);
    assert_eq!(output.failures, 1);
    assert!(output.error.is_some());
}

#[tokio::test]
async fn items_loop_rejects_empty_items() {
    let (ctx, _runner) = mock_context();
    let input = ItemsLoopInput {
        template: ContainerSpec::new("alpine"),
        ..ItemsLoopInput::default()
    };
    let err = loops::loop_items(&ctx, &input).await.unwrap_err();
    assert!(matches!(err, engine::Error::Validation { .. }));
}

#[tokio::test]
async fn param_loop_expands_the_cartesian_product() {
    let (ctx, runner) = mock_context();
    let mut parameters = IndexMap::new();
    parameters.insert("env".to_string(), vec!["dev".to_string(), "prod".to_string()]);
    parameters.insert("region".to_string(), vec!["w".to_string(), "e".to_string()]);

    let input = ParamLoopInput {
        parameters,
        template: ContainerSpec::new("alpine").with_command([
            "deploy",
            "--env={{.env}}",
            "--region={{.region}}",
        ]),
        parallel: true,
        max_concurrency: None,
        failure_strategy: String::new(),
    };
    let output = loops::loop_param(&ctx, &input).await.unwrap();

    assert_eq!(output.item_count, 4);
    assert_eq!(output.successes, 4);

    let commands: HashSet<Vec<String>> = runner
        .created_options()
        .into_iter()
        .map(|options| options.command)
        .collect();
    assert_eq!(commands.len(), 4, "every combination appears exactly once");
    for (env, region) in [("dev", "w"), ("dev", "e"), ("prod", "w"), ("prod", "e")] {
        let expected = vec![
            "deploy".to_string(),
            format!("--env={env}"),
            format!("--region={region}"),
        ];
        assert!(commands.contains(&expected), "missing combination {expected:?}");
    }
}

#[tokio::test]
async fn param_loop_rejects_empty_parameter_set() {
    let (ctx, _runner) = mock_context();
    let input = ParamLoopInput {
        template: ContainerSpec::new("alpine"),
        ..ParamLoopInput::default()
    };
    let err = loops::loop_param(&ctx, &input).await.unwrap_err();
    assert!(matches!(err, engine::Error::Validation { .. }));
}

#[tokio::test]
async fn param_loop_rejects_empty_value_arrays() {
    let (ctx, _runner) = mock_context();
    let mut parameters = IndexMap::new();
    parameters.insert("env".to_string(), Vec::new());
    let input = ParamLoopInput {
        parameters,
        template: ContainerSpec::new("alpine"),
        ..ParamLoopInput::default()
    };
    let err = loops::loop_param(&ctx, &input).await.unwrap_err();
    assert!(matches!(err, engine::Error::Validation { .. }));
}

#[tokio::test]
async fn loop_counts_match_executed_iterations() {
    let (ctx, _runner) = mock_context();
    let input = ItemsLoopInput {
        items: vec!["true".into(), "false".into(), "true".into(), "false".into()],
        template: ContainerSpec::new("alpine").with_command(["{{item}}"]),
        parallel: true,
        max_concurrency: None,
        failure_strategy: "continue".to_string(),
    };
    let output = loops::loop_items(&ctx, &input).await.unwrap();

    assert_eq!(output.item_count, 4);
    assert_eq!(output.successes + output.failures, output.results.len());
    assert_eq!(output.successes, 2);
    assert_eq!(output.failures, 2);
}
