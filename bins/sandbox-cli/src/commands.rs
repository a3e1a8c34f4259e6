// CLI commands for running code locally and managing language images
use anyhow::{Context, Result};
use sandbox_common::types::ExecutionOutcome;
use sandbox_common::types::ExecutionRequest;
use sandbox_engine::{ContainerBackend, ExecutionPipeline, LanguageRegistry, Workspace};
use std::fs;
use std::path::Path;

/// Registry from `config`, or the built-in languages
pub fn load_registry(config: Option<&Path>) -> Result<LanguageRegistry> {
    match config {
        Some(path) => LanguageRegistry::load(path)
            .with_context(|| format!("Failed to load {}", path.display())),
        None => Ok(LanguageRegistry::builtin()),
    }
}

/// Execute a source file through the local Docker daemon
pub async fn run(
    registry: LanguageRegistry,
    language: &str,
    file: &Path,
    inputs: Vec<String>,
) -> Result<()> {
    let pipeline = ExecutionPipeline::docker(registry).context("Failed to connect to Docker")?;
    eprintln!("🚀 Running {} ({} input(s))", file.display(), inputs.len());

    let outcome = execute_file(&pipeline, language, file, inputs).await?;

    let json = serde_json::to_string_pretty(&outcome).context("Failed to serialize outcome")?;
    println!("{}", json);
    Ok(())
}

pub async fn execute_file<B: ContainerBackend>(
    pipeline: &ExecutionPipeline<B>,
    language: &str,
    file: &Path,
    inputs: Vec<String>,
) -> Result<ExecutionOutcome> {
    let code = fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let request = ExecutionRequest::new(code, language, inputs);
    let workspace = Workspace::create().context("Failed to create workspace")?;

    match pipeline.execute(&request, workspace.path()).await {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            if let Some(detail) = e.detail() {
                eprintln!("{}", detail);
            }
            Err(e.into())
        }
    }
}

pub fn list_languages(registry: &LanguageRegistry) {
    print!("{}", render_languages(registry));
}

fn render_languages(registry: &LanguageRegistry) -> String {
    let mut out = String::new();
    for name in registry.names() {
        // Names come from the registry, resolve cannot miss
        if let Ok(profile) = registry.resolve(&name) {
            let compile = if profile.compile.is_empty() {
                "-".to_string()
            } else {
                profile.compile.join(" ")
            };
            out.push_str(&format!(
                "{:<10} {:<20} {:<12} compile: {:<40} run: {}\n",
                profile.name,
                profile.image,
                profile.source_file,
                compile,
                profile.run.join(" ")
            ));
        }
    }
    out
}

/// Pre-fetch a language's base image
pub async fn pull(registry: LanguageRegistry, language: &str) -> Result<()> {
    let pipeline = ExecutionPipeline::docker(registry).context("Failed to connect to Docker")?;
    let image = pull_image(&pipeline, language).await?;
    println!("✅ Image {} is available", image);
    Ok(())
}

async fn pull_image<B: ContainerBackend>(
    pipeline: &ExecutionPipeline<B>,
    language: &str,
) -> Result<String> {
    let image = pipeline.registry().resolve(language)?.image.clone();
    eprintln!("🐳 Ensuring image {}...", image);
    pipeline.provisioner().ensure_image_available(&image).await?;
    Ok(image)
}
