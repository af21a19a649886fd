//! labrun Agent Daemon

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod artifact;
mod config;
mod controller;
mod dispatch;
mod error;
mod fetcher;
mod keepalive;
mod outbound;
mod runner;
mod session;
mod shutdown;
#[cfg(test)]
mod test_support;

use config::Config;
use controller::Controller;
use error::AgentError;
use shutdown::ShutdownSignal;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to install tracing subscriber: {}", e);
        return ExitCode::FAILURE;
    }

    // Load config
    let config = Arc::new(Config::parse());

    info!(
        worker = %config.worker_identity,
        host = %config.host,
        mode = %config.mode,
        scratch_dir = %config.scratch_dir.display(),
        "Starting labrun agent"
    );

    match run(config).await {
        Ok(()) => {
            info!("Exit");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Agent stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Arc<Config>) -> Result<(), AgentError> {
    tokio::fs::create_dir_all(&config.scratch_dir).await?;
    let signal = ShutdownSignal::install()?;
    let controller = Controller::new(config)?;
    controller.run(signal.recv()).await
}
