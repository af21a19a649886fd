//! Keepalive ping loop.

use std::sync::Arc;
use std::time::Duration;

use futures_util::Sink;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::outbound::Outbound;

/// Periodically pings the control plane so a silently dead agent can be
/// detected, independent of task traffic.
pub struct Keepalive {
    interval: Duration,
}

impl Keepalive {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Ping every interval until cancelled or a ping cannot be sent. The
    /// first ping goes out one interval after start.
    pub async fn run<S>(self, outbound: Arc<Outbound<S>>, cancel: CancellationToken)
    where
        S: Sink<Message, Error = WsError> + Unpin,
    {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Keepalive stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = outbound.ping().await {
                        warn!(error = %e, "Keepalive ping failed, stopping keepalive");
                        return;
                    }
                    trace!("Sent keepalive ping");
                }
            }
        }
    }
}
