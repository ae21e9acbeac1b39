//! hcs-nspawn CLI: run one container lifecycle from a JSON configuration.
//!
//! Drives the orchestration against the in-memory simulation backend; a
//! production engine plugs in through the same `LayerDriver`/`ComputeEngine`
//! traits.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use hcs_nspawn::sim::{SimComputeEngine, SimLayerDriver};
use hcs_nspawn::{NspawnConfig, Orchestrator};

#[derive(Parser)]
#[command(name = "hcs-nspawn", about = "Spawn one container and wait for its process to exit")]
struct Cli {
    /// Path to the JSON run configuration
    #[arg(short, long)]
    config: PathBuf,

    /// Log filter (overridden by RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = match NspawnConfig::from_file(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("ERROR: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut orchestrator = Orchestrator::new(SimLayerDriver::new(), SimComputeEngine::new());
    match orchestrator.spawn_and_wait(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("ERROR: {err}");
            ExitCode::FAILURE
        }
    }
}
