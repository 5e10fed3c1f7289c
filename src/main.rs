mod cli;
mod handlers;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use download_task::ConfigManager;
use std::process;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    // Validate CLI arguments first
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        process::exit(1);
    }

    // Initialize logging based on verbosity
    if args.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    let mut config_manager = match &args.config {
        Some(file) => ConfigManager::from_file(file)?,
        None => ConfigManager::new()?,
    };

    if !handlers::should_skip_config_validation(&args.command) {
        if let Err(e) = config_manager.validate() {
            eprintln!("Configuration validation failed: {:#}", e);
            eprintln!(
                "Run 'download-task config init --force' to restore the default configuration"
            );
            process::exit(1);
        }
    }

    match args.command {
        Commands::Download(download_args) => {
            handlers::handle_download(&config_manager, download_args).await?;
        }
        Commands::Verify {
            file,
            checksum,
            algorithm,
        } => {
            handlers::handle_verify(file, checksum, algorithm).await?;
        }
        Commands::Config { action } => {
            handlers::handle_config(&mut config_manager, action).await?;
        }
    }

    Ok(())
}
