//! Shared test infrastructure: a scripted in-memory container runner so
//! workflow tests run hermetically, without a Docker daemon.
#![allow(dead_code)]

use async_trait::async_trait;
use indexmap::IndexMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stevedore::engine::WorkflowContext;
use stevedore::activity::ContainerActivity;
use stevedore::runner::{ContainerHandle, ContainerRunner, Error, Result, RunnerOptions};
use stevedore::ContainerSpec;

/// Scripted runner interpreting a tiny command vocabulary:
///
/// - `echo <args...>`          exit 0, stdout = args joined by spaces
/// - `true` / `false`          exit 0 / exit 1
/// - `exit <code>`             exit with the given code
/// - `sleep-ms <n>`            sleep n milliseconds, then exit 0
/// - `delay-echo <n> <text..>` sleep n milliseconds, then echo
/// - `env`                     stdout = NAME=VALUE lines in insertion order
/// - `cat <path>`              stdout = host file contents (exit 1 if missing)
///
/// Anything else exits 0 with empty output.
#[derive(Debug, Default, Clone)]
pub struct MockRunner {
    created: Arc<Mutex<Vec<RunnerOptions>>>,
    provider_failures: Arc<AtomicUsize>,
    counter: Arc<AtomicU64>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `count` create calls with a provider error, so host
    /// retry behavior can be observed.
    pub fn failing_creates(count: usize) -> Self {
        let runner = Self::default();
        runner.provider_failures.store(count, Ordering::SeqCst);
        runner
    }

    /// Options of every container created so far, in creation order.
    pub fn created_options(&self) -> Vec<RunnerOptions> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerRunner for MockRunner {
    async fn create(&self, options: RunnerOptions) -> Result<Box<dyn ContainerHandle>> {
        let remaining = self.provider_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.provider_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::Provider {
                message: "daemon unreachable".to_string(),
            });
        }

        self.created.lock().unwrap().push(options.clone());
        let id = format!("mock-{}", self.counter.fetch_add(1, Ordering::SeqCst));
        let outcome = interpret(&options);
        Ok(Box::new(MockHandle {
            id,
            options,
            outcome,
        }))
    }
}

#[derive(Debug, Clone)]
struct Outcome {
    exit_code: i64,
    stdout: String,
    stderr: String,
    delay: Duration,
}

fn interpret(options: &RunnerOptions) -> Outcome {
    let mut outcome = Outcome {
        exit_code: 0,
        stdout: String::new(),
        stderr: String::new(),
        delay: Duration::ZERO,
    };
    let mut command = options.command.iter();
    match command.next().map(String::as_str) {
        Some("echo") => {
            outcome.stdout = command.cloned().collect::<Vec<_>>().join(" ");
        }
        Some("true") | None => {}
        Some("false") => outcome.exit_code = 1,
        Some("exit") => {
            outcome.exit_code = command.next().and_then(|code| code.parse().ok()).unwrap_or(0);
        }
        Some("sleep-ms") => {
            let millis = command.next().and_then(|n| n.parse().ok()).unwrap_or(0);
            outcome.delay = Duration::from_millis(millis);
        }
        Some("delay-echo") => {
            let millis = command.next().and_then(|n| n.parse().ok()).unwrap_or(0);
            outcome.delay = Duration::from_millis(millis);
            outcome.stdout = command.cloned().collect::<Vec<_>>().join(" ");
        }
        Some("env") => {
            outcome.stdout = options
                .env
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("\n");
        }
        Some("cat") => match command.next().map(std::fs::read_to_string) {
            Some(Ok(contents)) => outcome.stdout = contents,
            Some(Err(err)) => {
                outcome.exit_code = 1;
                outcome.stderr = err.to_string();
            }
            None => outcome.exit_code = 1,
        },
        Some(_) => {}
    }
    outcome
}

struct MockHandle {
    id: String,
    options: RunnerOptions,
    outcome: Outcome,
}

#[async_trait]
impl ContainerHandle for MockHandle {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn wait(&self) -> Result<i64> {
        if self.outcome.delay > Duration::ZERO {
            tokio::time::sleep(self.outcome.delay).await;
        }
        Ok(self.outcome.exit_code)
    }

    async fn stdout(&self) -> Result<String> {
        Ok(self.outcome.stdout.clone())
    }

    async fn stderr(&self) -> Result<String> {
        Ok(self.outcome.stderr.clone())
    }

    async fn endpoint(&self, container_port: u16) -> Result<String> {
        let ports = self.ports().await?;
        ports
            .get(&container_port)
            .map(|host_port| format!("127.0.0.1:{host_port}"))
            .ok_or(Error::PortNotMapped {
                port: container_port,
            })
    }

    async fn ports(&self) -> Result<IndexMap<u16, u16>> {
        Ok(self
            .options
            .ports
            .iter()
            .map(|port| (port.container, port.host))
            .collect())
    }

    async fn healthy(&self) -> Result<bool> {
        Ok(true)
    }

    async fn terminate(&self) -> Result<()> {
        Ok(())
    }
}

/// A workflow context over a fresh mock runner.
pub fn mock_context() -> (WorkflowContext, MockRunner) {
    let runner = MockRunner::new();
    let ctx = WorkflowContext::new(
        "test-workflow",
        "test-run",
        ContainerActivity::new(Arc::new(runner.clone())),
    );
    (ctx, runner)
}

pub fn context_for(runner: MockRunner) -> WorkflowContext {
    WorkflowContext::new(
        "test-workflow",
        "test-run",
        ContainerActivity::new(Arc::new(runner)),
    )
}

pub fn echo_spec(text: &str) -> ContainerSpec {
    ContainerSpec::new("alpine").with_command(["echo", text])
}

pub fn command_spec<const N: usize>(command: [&str; N]) -> ContainerSpec {
    ContainerSpec::new("alpine").with_command(command)
}
