use anyhow::Result;
use clap::Parser;
use folder_courier::cli::{run, Cli};
use folder_courier::logging::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Arguments first: the log file location is a CLI option.
    let cli = Cli::parse();
    init_tracing(cli.log_file.as_deref())?;
    tracing::info!("CLI application startup: tracing initialised, environment loaded");

    let result = run(cli).await;
    match &result {
        Ok(_) => tracing::info!("CLI completed successfully"),
        Err(e) => tracing::error!(error = %e, "CLI exited with error"),
    }
    result
}
