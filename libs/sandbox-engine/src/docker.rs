// Docker container management using Bollard

use crate::backend::{ContainerBackend, ContainerSpec, OutputChunk, OutputStream};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::future;
use futures_util::stream::StreamExt;
use sandbox_common::config::CONTAINER_WORKDIR;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

/// Label put on every sandbox container so leftovers can be found and reaped
pub const MANAGED_LABEL: &str = "io.sandbox.managed";

/// The exec can still be flagged as running for a moment after its
/// output stream closes
const EXIT_CODE_POLL_ATTEMPTS: usize = 20;
const EXIT_CODE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Docker-based backend: one container per environment, one exec per command
///
/// **Container rules:**
/// - Network disabled
/// - Memory capped, swap disabled, CPU capped
/// - Read-only root filesystem; only the workspace bind mount is writable
/// - Idle `sh` with an attached tty keeps the container alive between execs
#[derive(Clone)]
pub struct DockerBackend {
    docker: Docker,
}

impl DockerBackend {
    /// Connect using DOCKER_HOST or the platform's default socket
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker daemon")?;
        Ok(Self { docker })
    }

    pub fn from_client(docker: Docker) -> Self {
        Self { docker }
    }

    fn container_config(spec: &ContainerSpec) -> Config<String> {
        let binds = vec![format!(
            "{}:{}:rw",
            spec.workspace.display(),
            CONTAINER_WORKDIR
        )];

        Config {
            image: Some(spec.image.clone()),
            cmd: Some(vec!["sh".to_string()]),
            entrypoint: Some(vec![]),
            env: Some(spec.env.clone()),
            working_dir: Some(CONTAINER_WORKDIR.to_string()),
            labels: Some(HashMap::from([(MANAGED_LABEL.to_string(), "true".to_string())])),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            open_stdin: Some(true),
            tty: Some(true),
            network_disabled: Some(spec.limits.network_disabled),
            host_config: Some(HostConfig {
                memory: Some(spec.limits.memory_bytes),
                memory_swap: Some(spec.limits.memory_swap_bytes()),
                nano_cpus: Some(spec.limits.nano_cpus),
                readonly_rootfs: Some(spec.limits.readonly_rootfs),
                network_mode: spec.limits.network_disabled.then(|| "none".to_string()),
                binds: Some(binds),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

fn log_to_chunk(item: Result<LogOutput, BollardError>) -> Option<anyhow::Result<OutputChunk>> {
    match item {
        Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
            Some(Ok(OutputChunk::Stdout(message.to_vec())))
        }
        Ok(LogOutput::StdErr { message }) => Some(Ok(OutputChunk::Stderr(message.to_vec()))),
        Ok(LogOutput::StdIn { .. }) => None,
        Err(e) => Some(Err(anyhow::Error::new(e).context("Failed to read exec output"))),
    }
}

#[async_trait]
impl ContainerBackend for DockerBackend {
    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(BollardError::DockerResponseServerError { status_code: 404, .. }) => Ok(false),
            Err(e) => Err(e).context(format!("Failed to inspect image '{}'", image)),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);

        while let Some(progress) = stream.next().await {
            let progress = progress.context("Failed to pull Docker image")?;
            if let Some(status) = progress.status {
                debug!(image = %image, status = %status, "Downloading image");
            }
        }

        info!(image = %image, "Image pulled");
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let create_options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };

        let container = self
            .docker
            .create_container(Some(create_options), Self::container_config(spec))
            .await
            .context("Failed to create Docker container")?;

        Ok(container.id)
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        self.docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
            .context("Failed to start Docker container")
    }

    async fn remove_container(&self, container_id: &str) -> Result<()> {
        let remove_options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        self.docker
            .remove_container(container_id, Some(remove_options))
            .await
            .context(format!("Failed to remove container {}", container_id))
    }

    async fn create_exec(&self, container_id: &str, argv: &[String]) -> Result<String> {
        let exec_config = CreateExecOptions {
            cmd: Some(argv.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            working_dir: Some(CONTAINER_WORKDIR.to_string()),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(container_id, exec_config)
            .await
            .context("Failed to create exec")?;

        Ok(exec.id)
    }

    async fn start_exec(&self, exec_id: &str) -> Result<OutputStream> {
        let start_config = StartExecOptions {
            detach: false,
            ..Default::default()
        };

        match self.docker.start_exec(exec_id, Some(start_config)).await? {
            StartExecResults::Attached { output, .. } => Ok(Box::pin(
                output.filter_map(|item| future::ready(log_to_chunk(item))),
            )),
            StartExecResults::Detached => bail!("Exec {} started detached", exec_id),
        }
    }

    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>> {
        for _ in 0..EXIT_CODE_POLL_ATTEMPTS {
            let inspect = self
                .docker
                .inspect_exec(exec_id)
                .await
                .context("Failed to inspect exec")?;

            if inspect.running != Some(true) {
                return Ok(inspect.exit_code);
            }
            tokio::time::sleep(EXIT_CODE_POLL_INTERVAL).await;
        }

        Ok(None)
    }
}
