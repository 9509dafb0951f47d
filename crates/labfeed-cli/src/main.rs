//! Labfeed CLI - Main entry point

use clap::Parser;
use labfeed_cli::{commands, Cli, Commands};
use labfeed_common::logging::{init_logging, LogConfig, LogLevel};
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    // Parse command-line arguments
    let cli = Cli::parse();

    // Environment configuration first, then the verbose flag on top. The
    // console default is warn so library logs stay out of command output.
    let mut log_config = LogConfig::from_env().unwrap_or_default();
    log_config.log_file_prefix = "labfeed".to_string();
    if cli.verbose {
        log_config.level = LogLevel::Debug;
    } else if std::env::var("LOG_LEVEL").is_err() {
        log_config.level = LogLevel::Warn;
    }

    // Initialize logging (ignore errors as the CLI should work without logging)
    let _ = init_logging(&log_config);

    // Execute command
    if let Err(e) = execute_command(cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

/// Execute the CLI command
async fn execute_command(cli: Cli) -> anyhow::Result<()> {
    let config = commands::load_config(cli.data_root.as_deref())?;

    match cli.command {
        Commands::Init => commands::init::run(&config).await,

        Commands::Run { max_files } => commands::run::run(&config, max_files).await,

        Commands::Upload {
            file,
            resume,
            chunks,
            admin,
        } => commands::upload::run(&config, file, resume, chunks, admin).await,

        Commands::Status => commands::status::run(&config).await,
    }
}
