//! Lifecycle controller: owns the session connection from connect to close.

use std::future::Future;
use std::io;
use std::sync::Arc;

use futures_util::{Sink, StreamExt};
use reqwest::Client;
use tokio::time::{timeout_at, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::AgentError;
use crate::fetcher::HttpFetcher;
use crate::keepalive::Keepalive;
use crate::outbound::Outbound;
use crate::runner::TaskRunner;
use crate::session::SessionLoop;

/// Connects to the control plane, runs the session and keepalive loops, and
/// tears both down when told to stop.
pub struct Controller {
    config: Arc<Config>,
    dispatcher: Arc<Dispatcher>,
}

impl Controller {
    /// Create a controller that downloads artifacts from the configured host.
    pub fn new(config: Arc<Config>) -> Result<Self, AgentError> {
        let client = Client::builder()
            .user_agent(concat!("labrun-agent/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let fetcher = HttpFetcher::new(
            client,
            config.download_base_url()?,
            config.scratch_dir.clone(),
        );
        let dispatcher = Dispatcher::new(Arc::new(fetcher), TaskRunner::new());
        Ok(Self::with_dispatcher(config, Arc::new(dispatcher)))
    }

    pub fn with_dispatcher(config: Arc<Config>, dispatcher: Arc<Dispatcher>) -> Self {
        Self { config, dispatcher }
    }

    /// Run one session until `shutdown` resolves.
    ///
    /// A failed connect is returned immediately; there is no retry. When
    /// `exit_on_disconnect` is set, the session loop ending on its own also
    /// triggers shutdown and the run ends with [`AgentError::SessionLost`].
    /// Otherwise the controller keeps waiting for `shutdown` even if the
    /// connection is gone.
    pub async fn run<F>(&self, shutdown: F) -> Result<(), AgentError>
    where
        F: Future<Output = ()>,
    {
        let url = self.config.session_url()?;
        info!(url = %url, "Connecting to control plane");
        let (socket, _response) = connect_async(url.as_str()).await?;
        info!(worker = %self.config.worker_id(), "Connected to control plane");

        let (sink, stream) = socket.split();
        let outbound = Arc::new(Outbound::new(sink));
        let cancel = CancellationToken::new();

        let session = SessionLoop::new(outbound.clone(), self.dispatcher.clone(), cancel.clone());
        let mut session_handle = tokio::spawn(session.run(stream));
        let keepalive = Keepalive::new(self.config.ping_interval());
        let mut keepalive_handle = tokio::spawn(keepalive.run(outbound.clone(), cancel.clone()));

        let session_lost = tokio::select! {
            _ = shutdown => false,
            end = &mut session_handle, if self.config.exit_on_disconnect => {
                warn!(end = ?end, "Session loop ended, shutting down");
                true
            }
        };

        // Close notification, then the connection, then the loops, all
        // within one grace window.
        let grace = self.config.shutdown_grace();
        let deadline = Instant::now() + grace;
        let closed = match timeout_at(deadline, close_session(&outbound)).await {
            Ok(result) => result,
            Err(_) => {
                error!("Timed out closing the session");
                Err(AgentError::Io(io::ErrorKind::TimedOut.into()))
            }
        };
        cancel.cancel();

        let mut session_done = session_lost;
        let mut keepalive_done = false;
        let stopped = timeout_at(deadline, async {
            if !session_done {
                let _ = (&mut session_handle).await;
                session_done = true;
            }
            let _ = (&mut keepalive_handle).await;
            keepalive_done = true;
        })
        .await;
        if stopped.is_err() {
            warn!(
                grace_secs = grace.as_secs(),
                "Loops still running after the shutdown window, aborting"
            );
            // Dropping an aborted session kills its child and removes the
            // artifact.
            session_handle.abort();
            keepalive_handle.abort();
            if !session_done {
                let _ = session_handle.await;
            }
            if !keepalive_done {
                let _ = keepalive_handle.await;
            }
        }

        info!("Shutdown complete");
        if session_lost {
            return Err(AgentError::SessionLost);
        }
        closed
    }
}

/// Send the close frame and close the sink. Single attempt: a failed close
/// frame is reported, but the sink is closed regardless.
async fn close_session<S>(outbound: &Outbound<S>) -> Result<(), AgentError>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    let notified = outbound.send_close().await;
    match &notified {
        Ok(()) => debug!("Sent close frame"),
        Err(e) => error!(error = %e, "Failed to send close frame"),
    }

    if let Err(e) = outbound.close().await {
        warn!(error = %e, "Failed to close connection");
    }
    notified.map_err(AgentError::from)
}
