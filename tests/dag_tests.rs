//! DAG engine behavior: data passing, artifacts, failure semantics.
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::indexing_slicing)]

mod common;

use std::sync::Arc;

use common::{command_spec, echo_spec, mock_context};
use stevedore::ContainerSpec;
use stevedore::artifact::{self, Artifact, ArtifactMetadata, ArtifactStore};
use stevedore::bind::InputMapping;
use stevedore::engine::dag;
use stevedore::extract::OutputDefinition;
use stevedore::providers::LocalStore;
use stevedore::step::StepSpec;
use stevedore::workflow::{DagInput, DagNode, NodeState, Parameter};

fn node(name: &str, spec: ContainerSpec) -> DagNode {
    DagNode::new(name, StepSpec::new(spec))
}

#[tokio::test]
async fn dag_passes_data_between_nodes() {
    let (ctx, runner) = mock_context();

    let build = DagNode::new(
        "build",
        StepSpec::new(echo_spec(r#"{"version":"1.2.3"}"#))
            .with_output(OutputDefinition::stdout("version").with_json_path("$.version")),
    );
    let deploy = DagNode::new(
        "deploy",
        StepSpec::new(command_spec(["env"]))
            .with_input(InputMapping::required("VERSION", "build.version")),
    )
    .depends_on("build");

    let input = DagInput {
        nodes: vec![build, deploy],
        fail_fast: true,
        ..DagInput::default()
    };
    let output = dag::dag(&ctx, &input).await.unwrap();

    assert_eq!(output.successes, 2);
    assert_eq!(output.failures, 0);
    assert!(output.error.is_none());
    assert_eq!(
        output
            .step_outputs
            .get("build")
            .and_then(|outputs| outputs.get("version"))
            .map(String::as_str),
        Some("1.2.3")
    );

    // the deploy container saw the bound environment variable
    let deploy_options = runner
        .created_options()
        .into_iter()
        .find(|options| options.command == vec!["env".to_string()])
        .expect("deploy container was created");
    assert_eq!(
        deploy_options.env.get("VERSION").map(String::as_str),
        Some("1.2.3")
    );
    let deploy_result = output.results.get("deploy").unwrap();
    assert!(deploy_result.stdout.contains("VERSION=1.2.3"));
}

#[tokio::test]
async fn dag_moves_artifacts_between_nodes() {
    let (ctx, _runner) = mock_context();
    let store_dir = tempfile::tempdir().unwrap();
    let work_dir = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalStore::new(store_dir.path()));

    let out_path = work_dir.path().join("out/app");
    std::fs::create_dir_all(out_path.parent().unwrap()).unwrap();
    std::fs::write(&out_path, b"binary-bytes").unwrap();
    let in_path = work_dir.path().join("in/app");

    let build = DagNode::new(
        "build",
        StepSpec::new(echo_spec("built")).with_output_artifact(Artifact::file(
            "binary",
            out_path.to_string_lossy(),
        )),
    );
    let test_command = vec!["cat".to_string(), in_path.to_string_lossy().to_string()];
    let test = DagNode::new(
        "test",
        StepSpec::new(ContainerSpec::new("alpine").with_command(test_command))
            .with_input_artifact(Artifact::file("binary", in_path.to_string_lossy())),
    )
    .depends_on("build");

    let input = DagInput {
        nodes: vec![build, test],
        fail_fast: true,
        artifact_store: Some(store.clone()),
        ..DagInput::default()
    };
    let output = dag::dag(&ctx, &input).await.unwrap();

    assert_eq!(output.successes, 2, "error: {:?}", output.error);

    // the store holds the object at {workflow}/{run}/build/binary
    let meta = ArtifactMetadata::new(
        &ctx.workflow_id,
        &ctx.run_id,
        "build",
        Artifact::file("binary", ""),
    );
    assert_eq!(meta.storage_key(), "test-workflow/test-run/build/binary");
    assert!(store.exists(&meta, ctx.cancellation()).await.unwrap());

    // the consumer saw the downloaded file
    assert_eq!(std::fs::read(&in_path).unwrap(), b"binary-bytes");
    let test_result = output.results.get("test").unwrap();
    assert_eq!(test_result.stdout, "binary-bytes");

    // explicit cleanup removes the run's objects
    artifact::cleanup(store.as_ref(), &ctx.workflow_id, &ctx.run_id, ctx.cancellation())
        .await
        .unwrap();
    assert!(!store.exists(&meta, ctx.cancellation()).await.unwrap());
}

#[tokio::test]
async fn fail_fast_halts_at_first_failure() {
    let (ctx, _runner) = mock_context();
    let input = DagInput {
        nodes: vec![
            node("a", echo_spec("ok")),
            node("b", command_spec(["false"])).depends_on("a"),
            node("c", echo_spec("never")).depends_on("b"),
        ],
        fail_fast: true,
        ..DagInput::default()
    };
    let output = dag::dag(&ctx, &input).await.unwrap();

    assert_eq!(output.successes, 1);
    assert_eq!(output.failures, 1);
    assert!(output.error.is_some());
    // already-executed results are preserved; c never ran
    assert!(output.results.contains_key("a"));
    assert!(output.results.contains_key("b"));
    assert!(!output.results.contains_key("c"));
}

#[tokio::test]
async fn skipped_dependents_are_recorded_under_fail_fast() {
    let (ctx, _runner) = mock_context();
    let input = DagInput {
        nodes: vec![
            node("a", command_spec(["false"])),
            node("b", echo_spec("never")).depends_on("a"),
        ],
        fail_fast: true,
        ..DagInput::default()
    };
    let output = dag::dag(&ctx, &input).await.unwrap();

    let states: Vec<(&str, NodeState)> = output
        .node_results
        .iter()
        .map(|n| (n.name.as_str(), n.state))
        .collect();
    assert_eq!(states, vec![("a", NodeState::Failed), ("b", NodeState::Skipped)]);
}

#[tokio::test]
async fn continue_mode_runs_nodes_with_successful_dependencies() {
    let (ctx, _runner) = mock_context();
    let input = DagInput {
        nodes: vec![
            node("a", echo_spec("ok")),
            node("b", command_spec(["false"])),
            node("c", echo_spec("also ok")).depends_on("a"),
        ],
        fail_fast: false,
        ..DagInput::default()
    };
    let output = dag::dag(&ctx, &input).await.unwrap();

    assert_eq!(output.successes, 2);
    assert_eq!(output.failures, 1);
    assert!(output.error.is_none());
    assert_eq!(output.node_results.len(), 3);
    assert!(output.results.get("c").unwrap().success);
}

#[tokio::test]
async fn missing_required_input_fails_the_node() {
    let (ctx, _runner) = mock_context();
    let consumer = DagNode::new(
        "consumer",
        StepSpec::new(echo_spec("x"))
            .with_input(InputMapping::required("VALUE", "ghost.output")),
    );
    let input = DagInput {
        nodes: vec![consumer],
        fail_fast: true,
        ..DagInput::default()
    };
    let output = dag::dag(&ctx, &input).await.unwrap();

    assert_eq!(output.failures, 1);
    let error = output.error.expect("missing input halts under fail-fast");
    assert_eq!(error.kind, "input");
    assert_eq!(output.node_results[0].state, NodeState::Failed);
    assert!(output.node_results[0].result.is_none());
}

#[tokio::test]
async fn when_condition_skips_nodes() {
    let (ctx, _runner) = mock_context();
    let gated = DagNode::new(
        "gated",
        StepSpec::new(echo_spec("never")).with_when("{{.flag}} == on"),
    );
    let always = DagNode::new(
        "always",
        StepSpec::new(echo_spec("ran")).with_when("{{.flag}} != on"),
    );
    let input = DagInput {
        nodes: vec![gated, always],
        parameters: vec![Parameter::new("flag", "off")],
        fail_fast: true,
        ..DagInput::default()
    };
    let output = dag::dag(&ctx, &input).await.unwrap();

    assert_eq!(output.successes, 1);
    assert_eq!(output.failures, 0);
    let states: Vec<(&str, NodeState)> = output
        .node_results
        .iter()
        .map(|n| (n.name.as_str(), n.state))
        .collect();
    assert_eq!(
        states,
        vec![("gated", NodeState::Skipped), ("always", NodeState::Succeeded)]
    );
}

#[tokio::test]
async fn dag_parameters_substitute_into_commands() {
    let (ctx, runner) = mock_context();
    let deploy = node(
        "deploy",
        ContainerSpec::new("alpine").with_command(["echo", "release-{{.version}}"]),
    );
    let input = DagInput {
        nodes: vec![deploy],
        parameters: vec![Parameter::new("version", "9.9")],
        ..DagInput::default()
    };
    let output = dag::dag(&ctx, &input).await.unwrap();

    assert_eq!(output.results.get("deploy").unwrap().stdout, "release-9.9");
    assert_eq!(
        runner.created_options()[0].command,
        vec!["echo".to_string(), "release-9.9".to_string()]
    );
}

#[tokio::test]
async fn node_results_follow_declared_sibling_order() {
    let (ctx, _runner) = mock_context();
    let input = DagInput {
        nodes: vec![
            node("fetch", echo_spec("1")),
            node("lint", echo_spec("2")).depends_on("fetch"),
            node("unit", echo_spec("3")).depends_on("fetch"),
            node("package", echo_spec("4")).depends_on("lint").depends_on("unit"),
        ],
        fail_fast: true,
        ..DagInput::default()
    };
    let output = dag::dag(&ctx, &input).await.unwrap();

    let order: Vec<&str> = output
        .node_results
        .iter()
        .map(|n| n.name.as_str())
        .collect();
    assert_eq!(order, vec!["fetch", "lint", "unit", "package"]);
    assert_eq!(output.successes, 4);
}

#[tokio::test]
async fn optional_missing_artifact_is_tolerated() {
    let (ctx, _runner) = mock_context();
    let store_dir = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalStore::new(store_dir.path()));

    let consumer = DagNode::new(
        "consumer",
        StepSpec::new(echo_spec("fine"))
            .with_input_artifact(Artifact::file("maybe", "/tmp/nowhere").optional()),
    );
    let input = DagInput {
        nodes: vec![consumer],
        fail_fast: true,
        artifact_store: Some(store),
        ..DagInput::default()
    };
    let output = dag::dag(&ctx, &input).await.unwrap();

    assert_eq!(output.successes, 1);
    assert!(output.error.is_none());
}

#[tokio::test]
async fn required_missing_artifact_fails_the_node() {
    let (ctx, _runner) = mock_context();
    let store_dir = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalStore::new(store_dir.path()));

    let consumer = DagNode::new(
        "consumer",
        StepSpec::new(echo_spec("never"))
            .with_input_artifact(Artifact::file("required", "/tmp/nowhere")),
    );
    let input = DagInput {
        nodes: vec![consumer],
        fail_fast: true,
        artifact_store: Some(store),
        ..DagInput::default()
    };
    let output = dag::dag(&ctx, &input).await.unwrap();

    assert_eq!(output.failures, 1);
    assert_eq!(output.error.expect("artifact failure").kind, "artifact");
}

#[tokio::test]
async fn continue_on_fail_does_not_block_dependents() {
    let (ctx, _runner) = mock_context();
    let flaky = DagNode::new(
        "flaky",
        StepSpec::new(command_spec(["false"])).with_continue_on_fail(true),
    );
    let after = node("after", echo_spec("ran")).depends_on("flaky");
    let input = DagInput {
        nodes: vec![flaky, after],
        fail_fast: true,
        ..DagInput::default()
    };
    let output = dag::dag(&ctx, &input).await.unwrap();

    assert_eq!(output.failures, 1);
    assert_eq!(output.successes, 1);
    assert!(output.error.is_none());
    assert!(output.results.get("after").unwrap().success);
}
