//! sockrt CLI - command-line host for the native runtime

use clap::Parser;
use tracing::{error, info};

use sockrt_cli::{cli::Cli, commands::CommandDispatcher, config::AppConfig, error::Result};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Load configuration before logging so the file can turn on verbosity
    let config = match load_configuration(&cli) {
        Ok(config) => config,
        Err(e) => {
            setup_logging(cli.verbose);
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    setup_logging(cli.verbose || config.cli.verbose);
    match &cli.config {
        Some(path) => info!("Loaded configuration from: {}", path),
        None => info!("Using default configuration"),
    }

    if let Err(e) = CommandDispatcher::execute(cli, config).await {
        error!("Command execution failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    // scripts go to stdout, so logs stay on stderr
    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Load configuration from file or use defaults
fn load_configuration(cli: &Cli) -> Result<AppConfig> {
    match &cli.config {
        Some(config_path) => AppConfig::load_from_file(config_path),
        None => Ok(AppConfig::default()),
    }
}
