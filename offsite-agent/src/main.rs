//! Offsite backup - main entry point
//!
//! Syncs the configured folders into a bucket, or prints the bucket contents.

use anyhow::{Context, Result};
use clap::Parser;
use offsite_agent::{
    commands,
    config::Config,
    daemon::shutdown::ShutdownCoordinator,
    store::HttpStore,
    utils::{self, logger::LogOutput},
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about = "Offsite backup tool", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "CONFIG_PATH")]
    config: PathBuf,

    /// Print the contents of the bucket and exit
    #[arg(short, long)]
    print: bool,

    /// Show logs in the console instead of writing to the log file
    #[arg(short, long)]
    show: bool,

    /// Log level (overrides config)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Exit with status 2 when any file failed to back up
    #[arg(long)]
    strict: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Load configuration
    let config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log_output_level);
    let output = if args.show {
        LogOutput::Stdout
    } else {
        LogOutput::File(&config.log_output_file)
    };
    utils::logger::init(log_level, output)?;

    tracing::info!(
        "Starting offsite-backup v{} (bucket: {}, endpoint: {})",
        env!("CARGO_PKG_VERSION"),
        config.credentials.bucket_name,
        config.endpoint
    );

    let store = match HttpStore::connect(&config.endpoint, &config.credentials, config.compression).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!("Error authorizing account: {}", e);
            return Err(e).context("Cannot reach the bucket");
        }
    };

    if args.print {
        let listed = commands::print_contents(store.as_ref()).await?;
        tracing::info!("{} objects listed", listed);
        return Ok(ExitCode::SUCCESS);
    }

    let cancel_token = ShutdownCoordinator::new().listen();
    let report = commands::run_sync(&config, store, cancel_token).await?;

    if args.strict && report.has_failures() {
        tracing::warn!("{} files failed to back up", report.failed);
        return Ok(ExitCode::from(2));
    }

    Ok(ExitCode::SUCCESS)
}
