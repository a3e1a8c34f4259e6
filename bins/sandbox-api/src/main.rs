mod config;
mod handlers;
mod metrics;
mod routes;

use anyhow::{Context, Result};
use config::{ApiConfig, LogFormat};
use sandbox_engine::{ContainerBackend, ExecutionPipeline, LanguageRegistry, Workspace};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

pub struct AppState<B: ContainerBackend> {
    pub pipeline: ExecutionPipeline<B>,
    pub auth_secret: String,
    pub workspace_root: Option<PathBuf>,
}

impl<B: ContainerBackend> AppState<B> {
    /// Fresh private workspace for one request
    pub fn workspace(&self) -> io::Result<Workspace> {
        match &self.workspace_root {
            Some(root) => Workspace::create_in(root),
            None => Workspace::create(),
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = ApiConfig::from_env()?;
    init_tracing(config.log_format);

    info!("Sandbox API booting...");

    metrics::init_metrics();
    info!("Metrics registry initialized");

    let registry = match &config.languages_config {
        Some(path) => LanguageRegistry::load(path).with_context(|| {
            format!("Failed to load language configuration from {}", path.display())
        })?,
        None => LanguageRegistry::builtin(),
    };
    info!(languages = ?registry.names(), "Language registry loaded");

    let pipeline = ExecutionPipeline::docker(registry).context("Failed to connect to Docker")?;

    let state = Arc::new(AppState {
        pipeline,
        auth_secret: config.auth_secret,
        workspace_root: config.workspace_root,
    });

    let app = routes::routes().with_state(state);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    info!("HTTP server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
