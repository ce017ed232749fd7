use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use regvault::settings::Settings;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Directory holding default/<run mode>/local config files
    #[arg(long, global = true)]
    config_dir: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate a registry payload and check its credentials against the registry
    #[command(visible_alias = "v")]
    Validate {
        /// Registry type tag (e.g. docker_hub, quay, harbor, amazon_ecr)
        #[arg(long = "type", short = 't')]
        registry_type: String,
        /// Path to the JSON payload, or - for stdin
        payload: PathBuf,
    },
    /// Encrypt a registry payload and print the row document to store
    Seal {
        /// Registry type tag
        #[arg(long = "type", short = 't')]
        registry_type: String,
        /// Path to the JSON payload, or - for stdin
        payload: PathBuf,
    },
    /// Show a stored row document with secrets masked
    #[command(visible_alias = "s")]
    Show {
        /// Path to the row document, or - for stdin
        row: PathBuf,
        /// Build from the non-secret fields only
        #[arg(long)]
        safe: bool,
    },
    /// List the images visible to a stored registry
    #[command(visible_alias = "ls")]
    Images {
        /// Path to the row document, or - for stdin
        row: PathBuf,
        /// Print images as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let settings = match &cli.config_dir {
        Some(dir) => Settings::load_from(dir),
        None => Settings::new(),
    }
    .context("Failed to load settings")?;

    match cli.command {
        Commands::Validate {
            registry_type,
            payload,
        } => cli::validate_command(&settings, &registry_type, &payload).await,
        Commands::Seal {
            registry_type,
            payload,
        } => cli::seal_command(&settings, &registry_type, &payload).await,
        Commands::Show { row, safe } => cli::show_command(&row, safe),
        Commands::Images { row, json } => cli::images_command(&settings, &row, json).await,
    }
}
