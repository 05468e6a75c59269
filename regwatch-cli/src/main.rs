//! regwatch CLI - resolve container images to their current digest.

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use regwatch_host::HostConfig;
use regwatch_host::observability::{TracingConfig, init_tracing};

/// regwatch - container image digest lookups through a sandboxed guest.
#[derive(Parser)]
#[command(name = "regwatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Host configuration file (YAML)
    #[arg(short, long, env = "REGWATCH_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Run this compiled guest module instead of the native guest
    #[arg(short, long, global = true)]
    module: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve an image to its current digest and print the status as JSON
    Check {
        /// Image reference, e.g. nginx or localhost:5000/apps/demo:v2
        image: String,
    },

    /// Perform a bare GET through the guest
    Fetch {
        /// URL to fetch
        url: String,
    },

    /// Print the manifest URL for an image without contacting the registry
    ManifestUrl {
        /// Image reference
        image: String,
    },
}

fn setup_logging(verbosity: u8) -> Result<()> {
    let env = TracingConfig::from_env();
    let config = TracingConfig::builder()
        .log_format(env.log_format())
        .log_filter(env.log_filter())
        .include_location(env.include_location())
        .verbosity(verbosity)
        .build();
    init_tracing(&config)
}

fn load_config(cli: &Cli) -> Result<HostConfig> {
    let mut config =
        HostConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(module) = &cli.module {
        config.guest.module = Some(module.clone());
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match &cli.command {
        Commands::Check { image } => commands::check::run(&load_config(&cli)?, image).await,
        Commands::Fetch { url } => commands::fetch::run(&load_config(&cli)?, url).await,
        Commands::ManifestUrl { image } => commands::manifest_url::run(image),
    }
}
