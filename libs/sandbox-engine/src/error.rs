use thiserror::Error;

/// Every way a sandbox request can fail.
///
/// Provisioning and compile failures end the whole request. Dispatch and
/// wait failures (`ExecStartFailure`, `InterruptedWait`) are raised by the
/// command runner; the pipeline turns them into a failed result for the
/// one input being run.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Image '{image}' is unavailable: {message}")]
    ImageUnavailable { image: String, message: String },

    #[error("Failed to provision environment: {0}")]
    ProvisionFailure(String),

    #[error("Compilation failed (exit code: {exit_code:?})")]
    CompileError {
        stderr: String,
        exit_code: Option<i64>,
    },

    #[error("Failed to start command: {0}")]
    ExecStartFailure(String),

    #[error("Interrupted while waiting for command: {0}")]
    InterruptedWait(String),

    #[error("Workspace I/O error: {0}")]
    Workspace(#[from] std::io::Error),

    #[error("Invalid language configuration: {0}")]
    Config(String),
}

impl SandboxError {
    /// Stable machine-readable name, used in API error bodies and metric labels
    pub fn kind(&self) -> &'static str {
        match self {
            SandboxError::UnsupportedLanguage(_) => "unsupported_language",
            SandboxError::InvalidRequest(_) => "invalid_request",
            SandboxError::ImageUnavailable { .. } => "image_unavailable",
            SandboxError::ProvisionFailure(_) => "provision_failure",
            SandboxError::CompileError { .. } => "compile_error",
            SandboxError::ExecStartFailure(_) => "exec_start_failure",
            SandboxError::InterruptedWait(_) => "interrupted_wait",
            SandboxError::Workspace(_) => "workspace_error",
            SandboxError::Config(_) => "config_error",
        }
    }

    /// Caused by the request itself rather than the sandbox host
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SandboxError::UnsupportedLanguage(_) | SandboxError::InvalidRequest(_)
        )
    }

    /// Diagnostics worth handing back to the submitter
    pub fn detail(&self) -> Option<&str> {
        match self {
            SandboxError::CompileError { stderr, .. } => Some(stderr.as_str()),
            _ => None,
        }
    }
}
