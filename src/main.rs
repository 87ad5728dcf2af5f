//! Cumin CLI entry point

use anyhow::Context;
use clap::Parser;
use cumin::cli::Cli;
use cumin::Config;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let exit_code = match setup_and_run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("cumin: {e:#}");
            1
        }
    };
    std::process::exit(exit_code);
}

async fn setup_and_run(cli: Cli) -> anyhow::Result<i32> {
    let config =
        Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    init_logging(cli.debug, config.log_file.as_deref())
        .context("failed to initialize logging")?;

    cumin::cli::run::run(cli, config).await.map_err(Into::into)
}

/// Logging goes to stderr, filtered by `CUMIN_LOG` (or the debug flag),
/// and additionally to the configured log file when one is set
fn init_logging(debug: bool, log_file: Option<&Path>) -> anyhow::Result<()> {
    let default_filter = if debug { "cumin=debug" } else { "cumin=info" };
    let filter =
        EnvFilter::try_from_env("CUMIN_LOG").unwrap_or_else(|_| EnvFilter::new(default_filter));

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr));

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            registry
                .with(fmt::layer().with_ansi(false).with_writer(Arc::new(file)))
                .init();
        }
        None => registry.init(),
    }
    Ok(())
}
