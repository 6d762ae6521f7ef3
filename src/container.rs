use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Startup timeout applied when a wait strategy does not carry its own.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Bound on a single container execution when the spec leaves it unset.
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(600);

/// Status an HTTP wait strategy expects when none is configured.
pub const DEFAULT_HTTP_STATUS: u16 = 200;

/// Prefix on [`ContainerResult::error`] marking a run-timeout failure.
pub(crate) const TIMEOUT_MARKER: &str = "run timeout exceeded";

/// Readiness predicate applied after container start, before the container
/// is considered running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WaitStrategy {
    /// Wait until the given substring appears in the container logs.
    Log {
        substring: String,
        #[serde(default)]
        startup_timeout: Option<Duration>,
    },
    /// Wait until the given container port accepts connections.
    Port { port: u16 },
    /// Wait until an HTTP request against the given port and path returns
    /// the expected status.
    Http {
        port: u16,
        path: String,
        #[serde(default)]
        expected_status: Option<u16>,
    },
    /// Wait until the container's own healthcheck reports healthy.
    Healthy,
    /// No readiness gate.
    None,
}

impl WaitStrategy {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            WaitStrategy::Log { .. } => "log",
            WaitStrategy::Port { .. } => "port",
            WaitStrategy::Http { .. } => "http",
            WaitStrategy::Healthy => "healthy",
            WaitStrategy::None => "none",
        }
    }

    /// The startup timeout this strategy imposes.
    #[must_use]
    pub fn startup_timeout(&self) -> Duration {
        match self {
            WaitStrategy::Log {
                startup_timeout: Some(timeout),
                ..
            } => *timeout,
            WaitStrategy::Log {
                startup_timeout: None,
                ..
            }
            | WaitStrategy::Port { .. }
            | WaitStrategy::Http { .. }
            | WaitStrategy::Healthy
            | WaitStrategy::None => DEFAULT_STARTUP_TIMEOUT,
        }
    }
}

/// Identity of one container execution.
///
/// Mapping fields are insertion-ordered so that iteration is stable across
/// replays of the same workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Container image reference. Required, must not be empty.
    pub image: String,
    /// Entrypoint override.
    #[serde(default)]
    pub entrypoint: Option<Vec<String>>,
    /// Command to execute.
    #[serde(default)]
    pub command: Vec<String>,
    /// Environment variables.
    #[serde(default)]
    pub env: IndexMap<String, String>,
    /// Port publications, each in `"host:container"` form.
    #[serde(default)]
    pub ports: Vec<String>,
    /// Volume mounts (host path -> container path).
    #[serde(default)]
    pub volumes: IndexMap<String, String>,
    /// Working directory inside the container.
    #[serde(default)]
    pub working_dir: Option<String>,
    /// User to run as.
    #[serde(default)]
    pub user: Option<String>,
    /// Container labels.
    #[serde(default)]
    pub labels: IndexMap<String, String>,
    /// Container name label.
    #[serde(default)]
    pub name: Option<String>,
    /// Remove the container when it exits.
    #[serde(default)]
    pub auto_remove: bool,
    /// Bound on container startup.
    #[serde(default)]
    pub start_timeout: Option<Duration>,
    /// Bound on the whole execution.
    #[serde(default)]
    pub run_timeout: Option<Duration>,
    /// Readiness strategy applied after start.
    #[serde(default)]
    pub wait: Option<WaitStrategy>,
}

impl ContainerSpec {
    #[must_use]
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_entrypoint<I, S>(mut self, entrypoint: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entrypoint = Some(entrypoint.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_port(mut self, published: impl Into<String>) -> Self {
        self.ports.push(published.into());
        self
    }

    #[must_use]
    pub fn with_volume(mut self, host: impl Into<String>, container: impl Into<String>) -> Self {
        self.volumes.insert(host.into(), container.into());
        self
    }

    #[must_use]
    pub fn with_working_dir(mut self, working_dir: impl Into<String>) -> Self {
        self.working_dir = Some(working_dir.into());
        self
    }

    #[must_use]
    pub fn with_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    #[must_use]
    pub fn with_auto_remove(mut self, auto_remove: bool) -> Self {
        self.auto_remove = auto_remove;
        self
    }

    #[must_use]
    pub fn with_run_timeout(mut self, run_timeout: Duration) -> Self {
        self.run_timeout = Some(run_timeout);
        self
    }

    #[must_use]
    pub fn with_wait(mut self, wait: WaitStrategy) -> Self {
        self.wait = Some(wait);
        self
    }

    /// Name used in results and logs: the name label when set, otherwise
    /// the image reference.
    #[must_use]
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.image.clone())
    }
}

/// Outcome of one container execution.
///
/// Invariant: `success` holds exactly when `exit_code == 0` and `error` is
/// absent. [`ContainerResult::finalize`] re-establishes it after the fields
/// are filled in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerResult {
    pub container_id: String,
    pub name: String,
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    /// Host endpoint of the first published port, when one was requested.
    pub endpoint: Option<String>,
    /// Container port -> host port.
    pub ports: IndexMap<u16, u16>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration: Duration,
    pub success: bool,
    pub error: Option<String>,
}

impl ContainerResult {
    /// Result for a container that could not be driven to completion.
    #[must_use]
    pub fn failed(
        name: impl Into<String>,
        started_at: DateTime<Utc>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            container_id: String::new(),
            name: name.into(),
            exit_code: -1,
            stdout: String::new(),
            stderr: String::new(),
            endpoint: None,
            ports: IndexMap::new(),
            started_at,
            finished_at: Utc::now(),
            duration: Duration::ZERO,
            success: false,
            error: Some(error.into()),
        }
        .finalize()
    }

    /// Recompute `success` and `duration` from the other fields.
    #[must_use]
    pub fn finalize(mut self) -> Self {
        self.success = self.exit_code == 0 && self.error.is_none();
        self.duration = (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        self
    }

    /// Whether this result records a run-timeout failure.
    #[must_use]
    pub fn timed_out(&self) -> bool {
        self.error
            .as_deref()
            .is_some_and(|error| error.starts_with(TIMEOUT_MARKER))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalize_enforces_success_invariant() {
        let now = Utc::now();
        let result = ContainerResult {
            container_id: "c1".into(),
            name: "test".into(),
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            endpoint: None,
            ports: IndexMap::new(),
            started_at: now,
            finished_at: now,
            duration: Duration::ZERO,
            success: false,
            error: None,
        }
        .finalize();
        assert!(result.success);

        let failed = ContainerResult {
            exit_code: 1,
            ..result.clone()
        }
        .finalize();
        assert!(!failed.success);

        let errored = ContainerResult {
            error: Some("boom".into()),
            ..result
        }
        .finalize();
        assert!(!errored.success);
    }

    #[test]
    fn failed_result_has_no_success() {
        let result = ContainerResult::failed("job", Utc::now(), "daemon unreachable");
        assert!(!result.success);
        assert_eq!(result.exit_code, -1);
        assert_eq!(result.error.as_deref(), Some("daemon unreachable"));
    }

    #[test]
    fn wait_strategy_startup_timeout_defaults() {
        let log = WaitStrategy::Log {
            substring: "ready".into(),
            startup_timeout: Some(Duration::from_secs(5)),
        };
        assert_eq!(log.startup_timeout(), Duration::from_secs(5));
        assert_eq!(
            WaitStrategy::Healthy.startup_timeout(),
            DEFAULT_STARTUP_TIMEOUT
        );
    }
}
