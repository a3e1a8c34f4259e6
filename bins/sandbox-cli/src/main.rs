mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sandbox-cli")]
#[command(about = "Sandbox CLI - Run code locally in the sandbox and manage language images", long_about = None)]
struct Cli {
    /// Language registry JSON (defaults to the built-in languages)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a source file and run it once per input
    Run {
        /// Language name (e.g., c, java)
        #[arg(short, long)]
        language: String,

        /// Source file to execute
        #[arg(short, long)]
        file: PathBuf,

        /// Argument line for one run; repeat for several runs
        #[arg(short, long = "input")]
        inputs: Vec<String>,
    },

    /// List supported languages
    Languages,

    /// Pull the base image for a language ahead of time
    Pull {
        /// Language name
        #[arg(short, long)]
        language: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let registry = commands::load_registry(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            language,
            file,
            inputs,
        } => {
            commands::run(registry, &language, &file, inputs).await?;
        }
        Commands::Languages => {
            commands::list_languages(&registry);
        }
        Commands::Pull { language } => {
            commands::pull(registry, &language).await?;
        }
    }

    Ok(())
}
