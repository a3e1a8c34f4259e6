use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One compile-and-run request: a program plus one argument line per test case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub id: Uuid,
    pub code: String,
    pub language: String,
    pub inputs: Vec<String>,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>, language: impl Into<String>, inputs: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            code: code.into(),
            language: language.into(),
            inputs,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Exited with code 0
    Success,
    /// Exited with a non-zero code
    RuntimeError,
    /// Killed after exceeding the execution timeout
    TimedOut,
    /// Could not be dispatched or awaited; `stderr` carries the reason
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::RuntimeError => "runtime_error",
            RunStatus::TimedOut => "timed_out",
            RunStatus::Failed => "failed",
        }
    }
}

/// Captured result of running the program against a single input
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionResult {
    pub status: RunStatus,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub time_ms: u64,
    pub exit_code: Option<i64>,
}

impl ExecutionResult {
    /// Result for an input whose command never produced an exit status
    pub fn failed(reason: impl Into<String>, time_ms: u64) -> Self {
        Self {
            status: RunStatus::Failed,
            stdout: None,
            stderr: Some(reason.into()),
            time_ms,
            exit_code: None,
        }
    }

    pub fn timed_out(&self) -> bool {
        self.status == RunStatus::TimedOut
    }
}

/// Ordered results for a whole request, one entry per input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub request_id: Uuid,
    pub language: String,
    pub started_at: DateTime<Utc>,
    pub results: Vec<ExecutionResult>,
}

impl ExecutionOutcome {
    /// Standard output of every input, in input order
    pub fn output_list(&self) -> Vec<Option<String>> {
        self.results.iter().map(|r| r.stdout.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
