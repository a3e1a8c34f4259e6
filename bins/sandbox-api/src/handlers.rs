// HTTP route handlers for the sandbox API

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use sandbox_common::types::{ExecutionRequest, ExecutionResult};
use sandbox_engine::{ContainerBackend, SandboxError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::{metrics, AppState};

pub const AUTH_HEADER: &str = "auth";
const EXECUTE_ENDPOINT: &str = "/executeCode";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteCodeRequest {
    pub code: String,
    pub language: String,
    #[serde(default)]
    pub input_list: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteCodeResponse {
    /// Stdout per input, `null` when the program printed nothing
    pub output_list: Vec<Option<String>>,
    pub results: Vec<ExecutionResult>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
    pub detail: Option<String>,
}

pub fn status_for(err: &SandboxError) -> StatusCode {
    match err {
        SandboxError::UnsupportedLanguage(_) | SandboxError::InvalidRequest(_) => {
            StatusCode::BAD_REQUEST
        }
        SandboxError::CompileError { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        SandboxError::ImageUnavailable { .. } | SandboxError::ProvisionFailure(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: &SandboxError) -> Response {
    let status = status_for(err);
    metrics::record_request(EXECUTE_ENDPOINT, status.as_u16());
    (
        status,
        Json(ErrorResponse {
            error: err.kind(),
            message: err.to_string(),
            detail: err.detail().map(str::to_string),
        }),
    )
        .into_response()
}

fn authorized(headers: &HeaderMap, secret: &str) -> bool {
    headers
        .get(AUTH_HEADER)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value == secret)
}

/// POST /executeCode - Compile and run code against every input
pub async fn execute_code<B: ContainerBackend>(
    State(state): State<Arc<AppState<B>>>,
    headers: HeaderMap,
    payload: Result<Json<ExecuteCodeRequest>, JsonRejection>,
) -> Response {
    if !authorized(&headers, &state.auth_secret) {
        warn!("Rejected request with missing or wrong auth header");
        metrics::record_request(EXECUTE_ENDPOINT, StatusCode::FORBIDDEN.as_u16());
        return StatusCode::FORBIDDEN.into_response();
    }

    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return error_response(&SandboxError::InvalidRequest(rejection.body_text()));
        }
    };

    let request = ExecutionRequest::new(payload.code, payload.language, payload.input_list);

    // Unknown names share one label
    let language_label = state
        .pipeline
        .registry()
        .resolve(&request.language)
        .map(|profile| profile.name.clone())
        .unwrap_or_else(|_| "unknown".to_string());

    let workspace = match state.workspace() {
        Ok(workspace) => workspace,
        Err(e) => {
            error!(request_id = %request.id, error = %e, "Failed to create workspace");
            return error_response(&SandboxError::Workspace(e));
        }
    };

    let started = Instant::now();
    match state.pipeline.execute(&request, workspace.path()).await {
        Ok(outcome) => {
            let elapsed_ms = started.elapsed().as_millis() as f64;
            metrics::record_execution(&language_label, "completed", &outcome.results, elapsed_ms);
            metrics::record_request(EXECUTE_ENDPOINT, StatusCode::OK.as_u16());

            info!(
                request_id = %request.id,
                language = %language_label,
                results = outcome.len(),
                time_ms = elapsed_ms as u64,
                "Request served"
            );

            (
                StatusCode::OK,
                Json(ExecuteCodeResponse {
                    output_list: outcome.output_list(),
                    results: outcome.results,
                }),
            )
                .into_response()
        }
        Err(e) => {
            let elapsed_ms = started.elapsed().as_millis() as f64;
            metrics::record_execution(&language_label, e.kind(), &[], elapsed_ms);

            if e.is_client_error() || matches!(e, SandboxError::CompileError { .. }) {
                info!(request_id = %request.id, kind = e.kind(), "Request rejected");
            } else {
                error!(request_id = %request.id, kind = e.kind(), error = %e, "Request failed");
            }
            error_response(&e)
        }
    }
}

/// GET /languages - Supported language names
pub async fn list_languages<B: ContainerBackend>(
    State(state): State<Arc<AppState<B>>>,
) -> impl IntoResponse {
    Json(state.pipeline.registry().names())
}

/// GET /health - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// GET /metrics - Prometheus exposition
pub async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render_metrics(),
    )
}
