/// Container Backend - the seam between the engine and the isolation primitive
///
/// The provisioner and the command runner only talk to containers through
/// this trait, so the orchestration logic can run against Docker in
/// production and an in-memory fake in tests.
use async_trait::async_trait;
use futures_util::stream::Stream;
use sandbox_common::config::SandboxLimits;
use std::path::PathBuf;
use std::pin::Pin;

/// One delivery from a running command, tagged with its stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputChunk {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
}

pub type OutputStream = Pin<Box<dyn Stream<Item = anyhow::Result<OutputChunk>> + Send>>;

/// Everything needed to create one isolated environment
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// Absolute host path, mounted read-write at the container workdir
    pub workspace: PathBuf,
    pub limits: SandboxLimits,
    pub env: Vec<String>,
}

#[async_trait]
pub trait ContainerBackend: Send + Sync + 'static {
    /// Whether the image is present in the local cache
    async fn image_exists(&self, image: &str) -> anyhow::Result<bool>;

    async fn pull_image(&self, image: &str) -> anyhow::Result<()>;

    /// Create (but do not start) a container, returning its id
    async fn create_container(&self, spec: &ContainerSpec) -> anyhow::Result<String>;

    async fn start_container(&self, container_id: &str) -> anyhow::Result<()>;

    /// Force-remove, killing anything still running
    async fn remove_container(&self, container_id: &str) -> anyhow::Result<()>;

    /// Register a command in a running container, returning the exec id
    async fn create_exec(&self, container_id: &str, argv: &[String]) -> anyhow::Result<String>;

    /// Start a registered command and attach to its stdout/stderr
    async fn start_exec(&self, exec_id: &str) -> anyhow::Result<OutputStream>;

    /// Exit code of a finished command; `None` if it could not be determined
    async fn exec_exit_code(&self, exec_id: &str) -> anyhow::Result<Option<i64>>;
}
