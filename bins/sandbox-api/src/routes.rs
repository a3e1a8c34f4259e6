// Route definitions for the sandbox API

use axum::{
    routing::{get, post},
    Router,
};
use sandbox_engine::ContainerBackend;
use std::sync::Arc;

use crate::{handlers, AppState};

pub fn routes<B: ContainerBackend>() -> Router<Arc<AppState<B>>> {
    Router::new()
        .route("/executeCode", post(handlers::execute_code::<B>))
        .route("/languages", get(handlers::list_languages::<B>))
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
}
