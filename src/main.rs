//! CLI entry point for the downloader tool.

use anyhow::Result;
use clap::Parser;
use tracing::{debug, info};

mod app;
mod cli;

use app::config_file::load_default_file_config;
use app::runner::{RunSettings, run};
use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let file_config = load_default_file_config()?;
    let settings = RunSettings::resolve(&args, &file_config)?;
    debug!(?settings, "settings resolved");

    let written = run(settings.clone(), !args.quiet).await?;

    info!(
        bytes = written,
        output = %settings.output.display(),
        "Download complete"
    );
    Ok(())
}
