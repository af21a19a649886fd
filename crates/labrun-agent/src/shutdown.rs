//! Termination signal handling.

use std::io;

use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::info;

/// SIGINT/SIGTERM listener.
///
/// Handlers are installed by [`ShutdownSignal::install`], before the agent
/// connects, so a signal that arrives during startup is not lost.
pub struct ShutdownSignal {
    sigterm: Signal,
    sigint: Signal,
}

impl ShutdownSignal {
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            sigterm: signal(SignalKind::terminate())?,
            sigint: signal(SignalKind::interrupt())?,
        })
    }

    /// Resolve on the first SIGINT or SIGTERM.
    pub async fn recv(mut self) {
        tokio::select! {
            _ = self.sigterm.recv() => {
                info!("Received SIGTERM, initiating graceful shutdown");
            }
            _ = self.sigint.recv() => {
                info!("Received SIGINT, initiating graceful shutdown");
            }
        }
    }
}
