/// Command Runner - one command inside a running environment
///
/// **Capture rules:**
/// - stdout and stderr are kept apart, each in its own growable buffer
/// - every delivered chunk is appended in arrival order, nothing is overwritten
/// - buffers outlive the timed wait, so output produced before a timeout is kept
///
/// **Timeout rules:**
/// - the wait is bounded by the caller's timeout
/// - on expiry every process in the environment except its init is killed,
///   so an abandoned command cannot keep burning the CPU share
/// - elapsed time is reported as the timeout boundary
use crate::backend::{ContainerBackend, OutputChunk};
use crate::error::SandboxError;
use crate::provisioner::Environment;
use futures_util::stream::StreamExt;
use sandbox_common::config::MAX_OUTPUT_BYTES;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Kills every process the exec can signal except init and itself
const TERMINATE_COMMAND: [&str; 3] = ["sh", "-c", "kill -9 -1"];
const TERMINATE_TIMEOUT: Duration = Duration::from_secs(2);
const TRUNCATION_MARKER: &str = "\n[output truncated]";

/// Raw result of one command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: Option<i64>,
    pub elapsed: Duration,
    pub timed_out: bool,
    pub truncated: bool,
}

impl CommandOutput {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// `None` when nothing was written to stdout
    pub fn stdout_text(&self) -> Option<String> {
        render(&self.stdout, self.truncated)
    }

    pub fn stderr_text(&self) -> Option<String> {
        render(&self.stderr, self.truncated)
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed.as_millis() as u64
    }
}

fn render(bytes: &[u8], truncated: bool) -> Option<String> {
    if bytes.is_empty() {
        return None;
    }
    let mut text = String::from_utf8_lossy(bytes).into_owned();
    if truncated && bytes.len() >= MAX_OUTPUT_BYTES {
        text.push_str(TRUNCATION_MARKER);
    }
    Some(text)
}

#[derive(Debug, Default)]
struct OutputCapture {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    truncated: bool,
}

impl OutputCapture {
    fn push(&mut self, chunk: OutputChunk) {
        let (buffer, bytes) = match chunk {
            OutputChunk::Stdout(bytes) => (&mut self.stdout, bytes),
            OutputChunk::Stderr(bytes) => (&mut self.stderr, bytes),
        };

        let room = MAX_OUTPUT_BYTES.saturating_sub(buffer.len());
        if bytes.len() > room {
            self.truncated = true;
        }
        buffer.extend_from_slice(&bytes[..bytes.len().min(room)]);
    }

    fn finish(self, exit_code: Option<i64>, elapsed: Duration, timed_out: bool) -> CommandOutput {
        CommandOutput {
            stdout: self.stdout,
            stderr: self.stderr,
            exit_code,
            elapsed,
            timed_out,
            truncated: self.truncated,
        }
    }
}

pub struct CommandRunner<B: ContainerBackend> {
    backend: Arc<B>,
}

impl<B: ContainerBackend> CommandRunner<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// Run an already tokenized command; no shell is involved
    pub async fn run(
        &self,
        environment: &Environment,
        argv: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, SandboxError> {
        if argv.is_empty() {
            return Err(SandboxError::ExecStartFailure("Empty command".to_string()));
        }

        let exec_id = self
            .backend
            .create_exec(&environment.id, argv)
            .await
            .map_err(|e| SandboxError::ExecStartFailure(format!("{:#}", e)))?;

        let start_time = Instant::now();
        let mut capture = OutputCapture::default();

        let waited = tokio::time::timeout(timeout, self.drive(&exec_id, &mut capture)).await;

        match waited {
            Ok(Ok(exit_code)) => {
                let output = capture.finish(exit_code, start_time.elapsed(), false);
                debug!(
                    command = %argv[0],
                    exit_code = ?output.exit_code,
                    elapsed_ms = output.elapsed_ms(),
                    "Command finished"
                );
                Ok(output)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(
                    command = %argv[0],
                    timeout_ms = timeout.as_millis() as u64,
                    "Command timed out, terminating"
                );
                self.terminate(environment).await;
                Ok(capture.finish(None, timeout, true))
            }
        }
    }

    async fn drive(
        &self,
        exec_id: &str,
        capture: &mut OutputCapture,
    ) -> Result<Option<i64>, SandboxError> {
        let mut stream = self
            .backend
            .start_exec(exec_id)
            .await
            .map_err(|e| SandboxError::ExecStartFailure(format!("{:#}", e)))?;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| SandboxError::InterruptedWait(format!("{:#}", e)))?;
            capture.push(chunk);
        }

        self.backend
            .exec_exit_code(exec_id)
            .await
            .map_err(|e| SandboxError::InterruptedWait(format!("{:#}", e)))
    }

    /// Kill whatever is still running inside the environment
    async fn terminate(&self, environment: &Environment) {
        let argv: Vec<String> = TERMINATE_COMMAND.iter().map(|s| s.to_string()).collect();

        let kill = async {
            let exec_id = self.backend.create_exec(&environment.id, &argv).await?;
            let mut stream = self.backend.start_exec(&exec_id).await?;
            while stream.next().await.is_some() {}
            anyhow::Ok(())
        };

        match tokio::time::timeout(TERMINATE_TIMEOUT, kill).await {
            Ok(Ok(())) => debug!(container_id = %environment.id, "Terminated timed-out command"),
            Ok(Err(e)) => warn!(
                container_id = %environment.id,
                error = %e,
                "Failed to terminate timed-out command"
            ),
            Err(_) => warn!(container_id = %environment.id, "Termination did not finish in time"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeBackend, FakeExec};
    use crate::provisioner::{EnvironmentGuard, EnvironmentProvisioner};
    use sandbox_common::config::SandboxLimits;

    const IMAGE: &str = "gcc:latest";

    fn cmd(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|t| t.to_string()).collect()
    }

    async fn setup(
        backend: FakeBackend,
    ) -> (
        Arc<FakeBackend>,
        Environment,
        EnvironmentGuard<FakeBackend>,
        tempfile::TempDir,
    ) {
        let backend = Arc::new(backend.with_local_image(IMAGE));
        let provisioner = EnvironmentProvisioner::new(backend.clone());
        let workspace = tempfile::tempdir().unwrap();
        let (env, guard) = provisioner
            .create_environment(IMAGE, workspace.path(), &SandboxLimits::default())
            .await
            .unwrap();
        (backend, env, guard, workspace)
    }

    #[tokio::test]
    async fn test_multiple_chunks_are_concatenated_in_order() {
        let (backend, env, _guard, _ws) = setup(FakeBackend::with_responder(|_| {
            FakeExec::ok()
                .stdout("hel")
                .stderr("warn: ")
                .stdout("lo")
                .stderr("careful")
                .stdout("\n")
        }))
        .await;
        let runner = CommandRunner::new(backend);

        let output = runner
            .run(&env, &cmd(&["/app/a.out"]), Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(output.stdout_text().as_deref(), Some("hello\n"));
        assert_eq!(output.stderr_text().as_deref(), Some("warn: careful"));
        assert!(output.succeeded());
        assert!(!output.truncated);
    }

    #[tokio::test]
    async fn test_silent_command_has_no_output() {
        let (backend, env, _guard, _ws) = setup(FakeBackend::new()).await;
        let runner = CommandRunner::new(backend);

        let output = runner
            .run(&env, &cmd(&["true"]), Duration::from_secs(1))
            .await
            .unwrap();

        assert!(output.stdout_text().is_none());
        assert!(output.stderr_text().is_none());
        assert_eq!(output.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_reported() {
        let (backend, env, _guard, _ws) =
            setup(FakeBackend::with_responder(|_| FakeExec::exit(3).stderr("boom"))).await;
        let runner = CommandRunner::new(backend);

        let output = runner
            .run(&env, &cmd(&["/app/a.out"]), Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(output.exit_code, Some(3));
        assert!(!output.succeeded());
        assert!(!output.timed_out);
    }

    #[tokio::test]
    async fn test_timeout_kills_and_keeps_partial_output() {
        let (backend, env, _guard, _ws) = setup(FakeBackend::with_responder(|argv| {
            if argv[0] == "sh" {
                FakeExec::ok()
            } else {
                FakeExec::hang().stdout("partial")
            }
        }))
        .await;
        let runner = CommandRunner::new(backend.clone());
        let timeout = Duration::from_millis(50);

        let started = Instant::now();
        let output = runner
            .run(&env, &cmd(&["/app/a.out"]), timeout)
            .await
            .unwrap();

        assert!(output.timed_out);
        assert!(!output.succeeded());
        assert_eq!(output.elapsed, timeout);
        assert_eq!(output.exit_code, None);
        assert_eq!(output.stdout_text().as_deref(), Some("partial"));
        assert!(started.elapsed() < Duration::from_secs(2));

        let commands = backend.commands();
        assert_eq!(commands.last().unwrap(), &cmd(&TERMINATE_COMMAND));
    }

    #[tokio::test]
    async fn test_exec_create_failure() {
        let (backend, env, _guard, _ws) = setup(FakeBackend::with_responder(|_| FakeExec {
            fail_create: true,
            ..FakeExec::ok()
        }))
        .await;
        let runner = CommandRunner::new(backend);

        let err = runner
            .run(&env, &cmd(&["/app/a.out"]), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::ExecStartFailure(_)));
    }

    #[tokio::test]
    async fn test_broken_stream_is_interrupted_wait() {
        let (backend, env, _guard, _ws) = setup(FakeBackend::with_responder(|_| FakeExec {
            fail_stream: true,
            ..FakeExec::ok().stdout("x")
        }))
        .await;
        let runner = CommandRunner::new(backend);

        let err = runner
            .run(&env, &cmd(&["/app/a.out"]), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::InterruptedWait(_)));
    }

    #[tokio::test]
    async fn test_empty_command_is_rejected() {
        let (backend, env, _guard, _ws) = setup(FakeBackend::new()).await;
        let runner = CommandRunner::new(backend.clone());

        let err = runner.run(&env, &[], Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, SandboxError::ExecStartFailure(_)));
        assert!(backend.commands().is_empty());
    }

    #[test]
    fn test_capture_is_bounded() {
        let mut capture = OutputCapture::default();
        capture.push(OutputChunk::Stdout(vec![b'a'; MAX_OUTPUT_BYTES - 1]));
        capture.push(OutputChunk::Stdout(b"bcd".to_vec()));
        capture.push(OutputChunk::Stderr(b"still here".to_vec()));

        let output = capture.finish(Some(0), Duration::ZERO, false);
        assert_eq!(output.stdout.len(), MAX_OUTPUT_BYTES);
        assert!(output.truncated);
        assert!(output.stdout_text().unwrap().ends_with("b\n[output truncated]"));
        assert_eq!(output.stderr_text().as_deref(), Some("still here"));
    }
}
