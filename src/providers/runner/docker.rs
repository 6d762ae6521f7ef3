use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HealthStatusEnum, HostConfig, PortBinding};
use futures::StreamExt;
use indexmap::IndexMap;
use snafu::prelude::*;
use std::collections::HashMap;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

use crate::container::{DEFAULT_HTTP_STATUS, DEFAULT_STARTUP_TIMEOUT, WaitStrategy};
use crate::runner::{
    ContainerHandle, ContainerRunner, Error, PortNotMappedSnafu, Result, RunnerOptions,
    StartupTimeoutSnafu,
};

const READINESS_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Docker container runner using bollard.
#[derive(Debug, Clone)]
pub struct DockerRunner {
    docker: Docker,
}

impl DockerRunner {
    /// Connect to the local Docker daemon.
    pub fn new() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults().map_err(|err| Error::Provider {
            message: format!("failed to connect to Docker daemon: {err}"),
        })?;
        Ok(Self { docker })
    }

    /// Use a pre-configured Docker client.
    #[must_use]
    pub fn with_docker(docker: Docker) -> Self {
        Self { docker }
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        let image_parts: Vec<&str> = image.split(':').collect();
        let (image_name, image_tag) = match (image_parts.first(), image_parts.get(1)) {
            (Some(&name), Some(&tag)) => (name, tag),
            (Some(&name), None) => (name, "latest"),
            _ => (image, "latest"),
        };

        let create_image_options = CreateImageOptions {
            from_image: image_name,
            tag: image_tag,
            ..Default::default()
        };

        // pulls the image if not present, no-op when cached
        let mut pull_stream = self
            .docker
            .create_image(Some(create_image_options), None, None);
        while let Some(pull_result) = pull_stream.next().await {
            pull_result.map_err(|err| Error::Creation {
                message: format!("failed to pull image {image}: {err}"),
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRunner for DockerRunner {
    async fn create(&self, options: RunnerOptions) -> Result<Box<dyn ContainerHandle>> {
        self.pull_image(&options.image).await?;

        let env: Vec<String> = options
            .env
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();

        // binds carry :z for SELinux relabeling on enforcing hosts
        let binds: Vec<String> = options
            .volumes
            .iter()
            .map(|(host_path, container_path)| format!("{host_path}:{container_path}:z"))
            .collect();

        let (exposed_ports, port_bindings) = if options.ports.is_empty() {
            (None, None)
        } else {
            let mut exposed = HashMap::new();
            let mut bindings = HashMap::new();
            for port in &options.ports {
                let port_key = format!("{}/tcp", port.container);
                exposed.insert(port_key.clone(), HashMap::new());
                bindings.insert(
                    port_key,
                    Some(vec![PortBinding {
                        host_ip: None,
                        host_port: Some(port.host.to_string()),
                    }]),
                );
            }
            (Some(exposed), Some(bindings))
        };

        let host_config = Some(HostConfig {
            binds: (!binds.is_empty()).then_some(binds),
            port_bindings,
            auto_remove: Some(options.auto_remove),
            ..Default::default()
        });

        let labels: HashMap<String, String> = options
            .labels
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        let container_config = Config {
            image: Some(options.image.clone()),
            cmd: (!options.command.is_empty()).then(|| options.command.clone()),
            entrypoint: options.entrypoint.clone(),
            env: (!env.is_empty()).then_some(env),
            working_dir: options.working_dir.clone(),
            user: options.user.clone(),
            labels: (!labels.is_empty()).then_some(labels),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            exposed_ports,
            host_config,
            ..Default::default()
        };

        let create_options = options.name.as_ref().map(|name| CreateContainerOptions {
            name: name.clone(),
            platform: None,
        });

        let created = self
            .docker
            .create_container(create_options, container_config)
            .await
            .map_err(|err| Error::Creation {
                message: format!("failed to create container: {err}"),
            })?;

        Ok(Box::new(DockerHandle {
            docker: self.docker.clone(),
            id: created.id,
            wait: options.wait,
            start_timeout: options.start_timeout,
        }))
    }
}

struct DockerHandle {
    docker: Docker,
    id: String,
    wait: Option<WaitStrategy>,
    start_timeout: Option<Duration>,
}

impl DockerHandle {
    async fn collect_logs(&self, stdout: bool, stderr: bool) -> Result<String> {
        let log_options = LogsOptions::<String> {
            stdout,
            stderr,
            follow: false,
            ..Default::default()
        };
        let mut stream = self.docker.logs(&self.id, Some(log_options));
        let mut collected = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|err| Error::Logs {
                message: format!("failed to read logs: {err}"),
            })?;
            match chunk {
                LogOutput::StdOut { message }
                | LogOutput::StdErr { message }
                | LogOutput::Console { message } => {
                    collected.push_str(&String::from_utf8_lossy(&message));
                }
                LogOutput::StdIn { .. } => {}
            }
        }
        Ok(collected)
    }

    async fn host_port(&self, container_port: u16) -> Result<u16> {
        self.ports()
            .await?
            .get(&container_port)
            .copied()
            .context(PortNotMappedSnafu {
                port: container_port,
            })
    }

    async fn await_ready(&self, strategy: &WaitStrategy) -> Result<()> {
        let timeout = match strategy {
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
            | WaitStrategy::None => self.start_timeout.unwrap_or(DEFAULT_STARTUP_TIMEOUT),
        };
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let ready = match strategy {
                WaitStrategy::Log { substring, .. } => self
                    .collect_logs(true, true)
                    .await
                    .map(|logs| logs.contains(substring.as_str()))
                    .unwrap_or(false),
                WaitStrategy::Port { port } => match self.host_port(*port).await {
                    Ok(host_port) => TcpStream::connect(("127.0.0.1", host_port)).await.is_ok(),
                    Err(_) => false,
                },
                WaitStrategy::Http {
                    port,
                    path,
                    expected_status,
                } => {
                    let expected = expected_status.unwrap_or(DEFAULT_HTTP_STATUS);
                    match self.host_port(*port).await {
                        Ok(host_port) => {
                            let url = format!("http://127.0.0.1:{host_port}{path}");
                            match reqwest::get(&url).await {
                                Ok(response) => response.status().as_u16() == expected,
                                Err(_) => false,
                            }
                        }
                        Err(_) => false,
                    }
                }
                WaitStrategy::Healthy => self.healthy().await.unwrap_or(false),
                WaitStrategy::None => true,
            };
            if ready {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return StartupTimeoutSnafu {
                    strategy: strategy.kind(),
                    timeout,
                }
                .fail();
            }
            tokio::time::sleep(READINESS_POLL_INTERVAL).await;
        }
    }

    async fn inspect_exit_code(&self) -> Result<i64> {
        let inspect = self
            .docker
            .inspect_container(&self.id, None)
            .await
            .map_err(|err| Error::Inspect {
                message: format!("failed to inspect container: {err}"),
            })?;
        Ok(inspect.state.and_then(|state| state.exit_code).unwrap_or(0))
    }
}

#[async_trait]
impl ContainerHandle for DockerHandle {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start(&self) -> Result<()> {
        self.docker
            .start_container(&self.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|err| Error::Start {
                message: format!("failed to start container: {err}"),
            })?;
        match &self.wait {
            Some(WaitStrategy::None) | None => Ok(()),
            Some(strategy) => self.await_ready(strategy).await,
        }
    }

    async fn wait(&self) -> Result<i64> {
        let mut stream = self
            .docker
            .wait_container(&self.id, None::<WaitContainerOptions<String>>);
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // containers that already exited surface through inspect
            Some(Err(_)) | None => self.inspect_exit_code().await,
        }
    }

    async fn stdout(&self) -> Result<String> {
        self.collect_logs(true, false).await
    }

    async fn stderr(&self) -> Result<String> {
        self.collect_logs(false, true).await
    }

    async fn endpoint(&self, container_port: u16) -> Result<String> {
        let host_port = self.host_port(container_port).await?;
        Ok(format!("127.0.0.1:{host_port}"))
    }

    async fn ports(&self) -> Result<IndexMap<u16, u16>> {
        let inspect = self
            .docker
            .inspect_container(&self.id, None)
            .await
            .map_err(|err| Error::Inspect {
                message: format!("failed to inspect container: {err}"),
            })?;

        let mut mapped = IndexMap::new();
        if let Some(ports) = inspect.network_settings.and_then(|settings| settings.ports) {
            let mut entries: Vec<_> = ports.into_iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            for (port_key, bindings) in entries {
                let Some(container_port) = port_key
                    .split('/')
                    .next()
                    .and_then(|port| port.parse::<u16>().ok())
                else {
                    continue;
                };
                let host_port = bindings
                    .into_iter()
                    .flatten()
                    .find_map(|binding| binding.host_port.and_then(|port| port.parse().ok()));
                if let Some(host_port) = host_port {
                    mapped.insert(container_port, host_port);
                }
            }
        }
        Ok(mapped)
    }

    async fn healthy(&self) -> Result<bool> {
        let inspect = self
            .docker
            .inspect_container(&self.id, None)
            .await
            .map_err(|err| Error::Inspect {
                message: format!("failed to inspect container: {err}"),
            })?;
        Ok(inspect
            .state
            .and_then(|state| state.health)
            .and_then(|health| health.status)
            == Some(HealthStatusEnum::HEALTHY))
    }

    async fn terminate(&self) -> Result<()> {
        // best-effort kill; the container may already have exited
        if let Err(err) = self
            .docker
            .kill_container(&self.id, None::<KillContainerOptions<String>>)
            .await
        {
            debug!(container = %self.id, error = %err, "kill skipped");
        }

        let remove_options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(&self.id, Some(remove_options)).await {
            Ok(()) => Ok(()),
            // already gone (auto-remove) or removal already in progress
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404 | 409,
                ..
            }) => Ok(()),
            Err(err) => Err(Error::Terminate {
                message: format!("failed to remove container: {err}"),
            }),
        }
    }
}
