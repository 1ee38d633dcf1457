// Worker binary entry point: answers tick signals on stdin/stdout

use anyhow::Result;
use common::config::WorkerSettings;
use common::worker::{serve, CommandTickHandler, ServeOutcome};
use tokio::io::BufReader;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries replies, so logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .json()
        .init();

    let settings = WorkerSettings::load().map_err(|e| {
        error!(error = %e, "Failed to load worker configuration");
        anyhow::anyhow!("Configuration error: {}", e)
    })?;

    info!(
        pid = std::process::id(),
        max_requests = settings.max_requests,
        "Worker ready"
    );

    let handler = CommandTickHandler::new(settings.command);
    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();

    match serve(stdin, stdout, &handler, settings.max_requests).await? {
        ServeOutcome::Recycle { served } => info!(served, "Worker recycled"),
        ServeOutcome::HostClosed { served } => info!(served, "Worker detached from host"),
    }

    Ok(())
}
