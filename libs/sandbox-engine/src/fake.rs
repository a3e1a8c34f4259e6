//! In-memory [`ContainerBackend`] for tests.
//!
//! Commands are answered by a responder closure that maps an argv to a
//! scripted [`FakeExec`]. Every call is recorded so tests can assert on what
//! the engine asked the isolation layer to do.

use crate::backend::{ContainerBackend, ContainerSpec, OutputChunk, OutputStream};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Scripted behaviour of one command
#[derive(Debug, Clone, Default)]
pub struct FakeExec {
    pub chunks: Vec<OutputChunk>,
    pub exit_code: Option<i64>,
    /// Keep the output stream open forever after the chunks
    pub hang: bool,
    pub fail_create: bool,
    /// Break the output stream after the chunks
    pub fail_stream: bool,
    /// Silence before the first chunk
    pub delay: Duration,
}

impl FakeExec {
    pub fn ok() -> Self {
        Self {
            exit_code: Some(0),
            ..Default::default()
        }
    }

    pub fn exit(code: i64) -> Self {
        Self {
            exit_code: Some(code),
            ..Default::default()
        }
    }

    pub fn hang() -> Self {
        Self {
            hang: true,
            ..Default::default()
        }
    }

    pub fn stdout(mut self, text: &str) -> Self {
        self.chunks.push(OutputChunk::Stdout(text.as_bytes().to_vec()));
        self
    }

    pub fn stderr(mut self, text: &str) -> Self {
        self.chunks.push(OutputChunk::Stderr(text.as_bytes().to_vec()));
        self
    }
}

type Responder = Arc<dyn Fn(&[String]) -> FakeExec + Send + Sync>;

#[derive(Default)]
struct FakeState {
    local_images: HashSet<String>,
    pull_attempts: Vec<String>,
    fail_pull: bool,
    fail_create: bool,
    fail_start: bool,
    created: Vec<(String, ContainerSpec)>,
    running: HashSet<String>,
    removed: Vec<String>,
    execs: HashMap<String, (String, Vec<String>)>,
    commands: Vec<Vec<String>>,
    next_id: usize,
}

pub struct FakeBackend {
    state: Mutex<FakeState>,
    responder: Responder,
    pull_delay: Duration,
    start_delay: Duration,
}

impl FakeBackend {
    /// Every command succeeds silently
    pub fn new() -> Self {
        Self::with_responder(|_| FakeExec::ok())
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&[String]) -> FakeExec + Send + Sync + 'static,
    {
        Self {
            state: Mutex::new(FakeState::default()),
            responder: Arc::new(responder),
            pull_delay: Duration::from_millis(20),
            start_delay: Duration::ZERO,
        }
    }

    /// Make `start_container` take this long
    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    pub fn with_local_image(self, image: &str) -> Self {
        self.state().local_images.insert(image.to_string());
        self
    }

    pub fn failing_pull(self) -> Self {
        self.state().fail_pull = true;
        self
    }

    pub fn failing_create(self) -> Self {
        self.state().fail_create = true;
        self
    }

    pub fn failing_start(self) -> Self {
        self.state().fail_start = true;
        self
    }

    pub fn set_fail_pull(&self, fail: bool) {
        self.state().fail_pull = fail;
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_id(state: &mut FakeState, prefix: &str) -> String {
        state.next_id += 1;
        format!("{}-{}", prefix, state.next_id)
    }

    /// Images passed to `pull_image`, successful or not
    pub fn pull_attempts(&self) -> Vec<String> {
        self.state().pull_attempts.clone()
    }

    pub fn created_containers(&self) -> Vec<ContainerSpec> {
        self.state().created.iter().map(|(_, spec)| spec.clone()).collect()
    }

    pub fn removed_containers(&self) -> Vec<String> {
        self.state().removed.clone()
    }

    /// Containers created but not yet removed
    pub fn live_containers(&self) -> usize {
        let state = self.state();
        state
            .created
            .iter()
            .filter(|(id, _)| !state.removed.contains(id))
            .count()
    }

    /// Every argv passed to `create_exec`, in order
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.state().commands.clone()
    }
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerBackend for FakeBackend {
    async fn image_exists(&self, image: &str) -> Result<bool> {
        Ok(self.state().local_images.contains(image))
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        let fail = {
            let mut state = self.state();
            state.pull_attempts.push(image.to_string());
            state.fail_pull
        };

        tokio::time::sleep(self.pull_delay).await;

        if fail {
            bail!("manifest for {} not found", image);
        }
        self.state().local_images.insert(image.to_string());
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let mut state = self.state();
        if state.fail_create {
            bail!("no space left on device");
        }
        if !state.local_images.contains(&spec.image) {
            bail!("No such image: {}", spec.image);
        }
        let id = Self::next_id(&mut state, "container");
        state.created.push((id.clone(), spec.clone()));
        Ok(id)
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        if !self.start_delay.is_zero() {
            tokio::time::sleep(self.start_delay).await;
        }
        let mut state = self.state();
        if state.fail_start {
            bail!("OCI runtime create failed");
        }
        state.running.insert(container_id.to_string());
        Ok(())
    }

    async fn remove_container(&self, container_id: &str) -> Result<()> {
        let mut state = self.state();
        state.running.remove(container_id);
        state.removed.push(container_id.to_string());
        Ok(())
    }

    async fn create_exec(&self, container_id: &str, argv: &[String]) -> Result<String> {
        let mut state = self.state();
        state.commands.push(argv.to_vec());
        if !state.running.contains(container_id) {
            bail!("Container {} is not running", container_id);
        }
        if (self.responder)(argv).fail_create {
            bail!("exec create rejected for {:?}", argv);
        }
        let id = Self::next_id(&mut state, "exec");
        state.execs.insert(id.clone(), (container_id.to_string(), argv.to_vec()));
        Ok(id)
    }

    async fn start_exec(&self, exec_id: &str) -> Result<OutputStream> {
        let argv = self
            .state()
            .execs
            .get(exec_id)
            .map(|(_, argv)| argv.clone())
            .ok_or_else(|| anyhow!("No such exec: {}", exec_id))?;

        let script = (self.responder)(&argv);
        let delay = script.delay;
        let silence = stream::once(async move { tokio::time::sleep(delay).await })
            .filter_map(|_| async { None::<Result<OutputChunk>> });
        let chunks = silence.chain(stream::iter(
            script.chunks.into_iter().map(Ok::<OutputChunk, anyhow::Error>),
        ));

        let stream: OutputStream = if script.hang {
            Box::pin(chunks.chain(stream::pending()))
        } else if script.fail_stream {
            Box::pin(chunks.chain(stream::once(async { Err(anyhow!("connection reset")) })))
        } else {
            Box::pin(chunks)
        };
        Ok(stream)
    }

    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>> {
        let argv = self
            .state()
            .execs
            .get(exec_id)
            .map(|(_, argv)| argv.clone())
            .ok_or_else(|| anyhow!("No such exec: {}", exec_id))?;

        Ok((self.responder)(&argv).exit_code)
    }
}
