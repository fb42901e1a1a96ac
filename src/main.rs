mod cmd;
mod config;
mod convert;
mod error;
mod manifest;
mod progress;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ovm")]
#[command(about = "Build and inspect OVMS virtual machine artifacts from OCI images")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert an OCI image into a bootable raw block image (requires root)
    Convert(cmd::convert::ConvertArgs),

    /// Show an OVMS manifest file
    Inspect {
        /// Path to a manifest JSON document
        manifest: PathBuf,

        /// Print the normalized manifest as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    // stdout carries command results only
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Convert(args) => cmd::convert::run(args)?,
        Commands::Inspect { manifest, json } => cmd::inspect::run(manifest, *json)?,
    }

    Ok(())
}
