/// Execution Pipeline - one request from source text to ordered results
///
/// **Stages:**
/// `Created → SourceWritten → Provisioned → Compiled → Running(i) → Completed`,
/// or `Failed` from any of them.
///
/// **Failure scope:**
/// - unknown language, oversized request, image or container problems and
///   compile failures end the request with a single error
/// - anything that goes wrong while running one input is recorded as that
///   input's result; the remaining inputs still run
///
/// Compile and runs happen strictly in order inside one environment, which
/// is removed once the request finishes either way.
use crate::backend::ContainerBackend;
use crate::docker::DockerBackend;
use crate::error::SandboxError;
use crate::language::{LanguageProfile, LanguageRegistry};
use crate::provisioner::{Environment, EnvironmentProvisioner};
use crate::runner::{CommandOutput, CommandRunner};
use chrono::Utc;
use sandbox_common::config::{
    SandboxLimits, MAX_INPUTS, MAX_INPUT_BYTES, MAX_SOURCE_CODE_BYTES,
};
use sandbox_common::types::{ExecutionOutcome, ExecutionRequest, ExecutionResult, RunStatus};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Created,
    SourceWritten,
    Provisioned,
    Compiled,
    /// 1-based index of the input being run
    Running(usize),
    Completed,
    Failed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineStage::Created => write!(f, "created"),
            PipelineStage::SourceWritten => write!(f, "source_written"),
            PipelineStage::Provisioned => write!(f, "provisioned"),
            PipelineStage::Compiled => write!(f, "compiled"),
            PipelineStage::Running(i) => write!(f, "running({})", i),
            PipelineStage::Completed => write!(f, "completed"),
            PipelineStage::Failed => write!(f, "failed"),
        }
    }
}

fn advance(stage: &mut PipelineStage, next: PipelineStage) {
    debug!(from = %stage, to = %next, "Pipeline stage");
    *stage = next;
}

/// Shared across requests; all per-request state lives in `execute`
pub struct ExecutionPipeline<B: ContainerBackend> {
    registry: Arc<LanguageRegistry>,
    provisioner: Arc<EnvironmentProvisioner<B>>,
    runner: CommandRunner<B>,
    limits: SandboxLimits,
}

impl ExecutionPipeline<DockerBackend> {
    /// Pipeline backed by the local Docker daemon
    pub fn docker(registry: LanguageRegistry) -> anyhow::Result<Self> {
        Ok(Self::new(Arc::new(registry), Arc::new(DockerBackend::connect()?)))
    }
}

impl<B: ContainerBackend> ExecutionPipeline<B> {
    pub fn new(registry: Arc<LanguageRegistry>, backend: Arc<B>) -> Self {
        Self {
            registry,
            provisioner: Arc::new(EnvironmentProvisioner::new(Arc::clone(&backend))),
            runner: CommandRunner::new(backend),
            limits: SandboxLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: SandboxLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    pub fn provisioner(&self) -> &EnvironmentProvisioner<B> {
        &self.provisioner
    }

    pub fn limits(&self) -> &SandboxLimits {
        &self.limits
    }

    /// Compile once, run once per input, return results in input order
    ///
    /// `workspace` must be an existing, writable directory owned by this
    /// request; it is mounted into the environment.
    #[instrument(
        skip(self, request, workspace),
        fields(
            request_id = %request.id,
            language = %request.language,
            inputs = request.inputs.len()
        )
    )]
    pub async fn execute(
        &self,
        request: &ExecutionRequest,
        workspace: &Path,
    ) -> Result<ExecutionOutcome, SandboxError> {
        let started_at = Utc::now();
        let mut stage = PipelineStage::Created;

        match self.drive(request, workspace, &mut stage).await {
            Ok(results) => {
                advance(&mut stage, PipelineStage::Completed);
                info!(
                    results = results.len(),
                    timed_out = results.iter().filter(|r| r.timed_out()).count(),
                    "Request completed"
                );
                Ok(ExecutionOutcome {
                    request_id: request.id,
                    language: request.language.clone(),
                    started_at,
                    results,
                })
            }
            Err(e) => {
                warn!(failed_at = %stage, kind = e.kind(), error = %e, "Request failed");
                advance(&mut stage, PipelineStage::Failed);
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        request: &ExecutionRequest,
        workspace: &Path,
        stage: &mut PipelineStage,
    ) -> Result<Vec<ExecutionResult>, SandboxError> {
        let profile = self.registry.resolve(&request.language)?;
        validate(request)?;

        tokio::fs::write(workspace.join(&profile.source_file), &request.code).await?;
        advance(stage, PipelineStage::SourceWritten);

        self.provisioner.ensure_image_available(&profile.image).await?;
        let (environment, guard) = self
            .provisioner
            .create_environment(&profile.image, workspace, &self.limits)
            .await?;
        advance(stage, PipelineStage::Provisioned);

        let results = self
            .compile_and_run(&environment, profile, &request.inputs, stage)
            .await;

        guard.release().await;
        results
    }

    async fn compile_and_run(
        &self,
        environment: &Environment,
        profile: &LanguageProfile,
        inputs: &[String],
        stage: &mut PipelineStage,
    ) -> Result<Vec<ExecutionResult>, SandboxError> {
        self.compile(environment, profile).await?;
        advance(stage, PipelineStage::Compiled);

        let mut results = Vec::with_capacity(inputs.len());
        for (idx, input) in inputs.iter().enumerate() {
            advance(stage, PipelineStage::Running(idx + 1));

            let argv = profile.run_command(input);
            let timeout = self.limits.timeout();
            let started = Instant::now();
            let result = match self.runner.run(environment, &argv, timeout).await {
                Ok(output) => to_result(output),
                Err(e) => {
                    warn!(input = idx + 1, kind = e.kind(), error = %e, "Run failed");
                    let elapsed = started.elapsed().min(timeout);
                    ExecutionResult::failed(e.to_string(), elapsed.as_millis() as u64)
                }
            };

            debug!(
                input = idx + 1,
                status = result.status.as_str(),
                time_ms = result.time_ms,
                "Input executed"
            );
            results.push(result);
        }

        Ok(results)
    }

    async fn compile(
        &self,
        environment: &Environment,
        profile: &LanguageProfile,
    ) -> Result<(), SandboxError> {
        let Some(argv) = profile.compile_command() else {
            debug!(language = %profile.name, "No compile step");
            return Ok(());
        };

        // Dispatch and wait failures are the host's, not the submitter's
        let output = self
            .runner
            .run(environment, &argv, self.limits.timeout())
            .await?;

        if output.timed_out {
            return Err(SandboxError::CompileError {
                stderr: format!("Compilation timed out after {}ms", self.limits.timeout_ms),
                exit_code: None,
            });
        }

        if output.exit_code != Some(0) {
            // Some toolchains report diagnostics on stdout
            let stderr = output
                .stderr_text()
                .or_else(|| output.stdout_text())
                .unwrap_or_default();
            return Err(SandboxError::CompileError {
                stderr,
                exit_code: output.exit_code,
            });
        }

        info!(
            language = %profile.name,
            compilation_time_ms = output.elapsed_ms(),
            "Compilation succeeded"
        );
        Ok(())
    }
}

fn validate(request: &ExecutionRequest) -> Result<(), SandboxError> {
    if request.code.len() > MAX_SOURCE_CODE_BYTES {
        return Err(SandboxError::InvalidRequest(format!(
            "Source code exceeds maximum size of {} bytes",
            MAX_SOURCE_CODE_BYTES
        )));
    }
    if request.inputs.len() > MAX_INPUTS {
        return Err(SandboxError::InvalidRequest(format!(
            "At most {} inputs are allowed, got {}",
            MAX_INPUTS,
            request.inputs.len()
        )));
    }
    if let Some(idx) = request.inputs.iter().position(|i| i.len() > MAX_INPUT_BYTES) {
        return Err(SandboxError::InvalidRequest(format!(
            "Input {} exceeds maximum size of {} bytes",
            idx + 1,
            MAX_INPUT_BYTES
        )));
    }
    Ok(())
}

fn to_result(output: CommandOutput) -> ExecutionResult {
    let status = if output.timed_out {
        RunStatus::TimedOut
    } else if output.exit_code == Some(0) {
        RunStatus::Success
    } else {
        RunStatus::RuntimeError
    };

    ExecutionResult {
        status,
        stdout: output.stdout_text(),
        stderr: output.stderr_text(),
        time_ms: output.elapsed_ms(),
        exit_code: output.exit_code,
    }
}
