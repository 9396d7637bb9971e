//! Squall CLI: run a telemetry pipeline to completion.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use squall::config::EngineConfig;
use squall::parse::{parse_pipeline, Registry};
use squall::{shutdown_signal, Catalog, Executor};

/// Squall - streaming telemetry pipeline engine
#[derive(Parser, Debug)]
#[command(name = "squall")]
#[command(about = "Runs a pipeline of the form `source | transformation | ... | sink`")]
struct Args {
    /// The pipeline definition to execute.
    pipeline: String,

    /// Path to the configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn init_tracing(config: &EngineConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.console_verbosity.clone()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match args.config {
        Some(path) => match EngineConfig::from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load config: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => EngineConfig::default(),
    };
    init_tracing(&config);

    if let Err(e) = squall::metrics::init(&config.metrics) {
        eprintln!("Failed to initialize metrics: {e}");
        return ExitCode::FAILURE;
    }

    let registry = Registry::with_defaults();
    let operators = match parse_pipeline(&args.pipeline, &registry) {
        Ok(operators) => operators,
        Err(e) => {
            eprintln!("Failed to parse pipeline: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Set up signal handler for graceful shutdown
    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    let executor = Executor::new(Arc::new(Catalog::new()), Arc::new(config), shutdown);
    match executor.run(operators).await {
        Ok(()) => {
            info!("pipeline finished");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Pipeline failed: {e}");
            ExitCode::FAILURE
        }
    }
}
