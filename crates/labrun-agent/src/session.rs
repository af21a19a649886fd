//! Session loop: reads assignments from the control plane and answers them.

use std::sync::Arc;

use futures_util::{Sink, Stream, StreamExt};
use labrun_core::Assignment;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::dispatch::Dispatcher;
use crate::outbound::Outbound;

/// Why a session loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The shared token was cancelled.
    Cancelled,
    /// The connection failed or the control plane closed it.
    Disconnected,
}

/// Reads inbound frames and processes one assignment at a time.
pub struct SessionLoop<S> {
    outbound: Arc<Outbound<S>>,
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
}

impl<S> SessionLoop<S>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    pub fn new(outbound: Arc<Outbound<S>>, dispatcher: Arc<Dispatcher>, cancel: CancellationToken) -> Self {
        Self {
            outbound,
            dispatcher,
            cancel,
        }
    }

    /// Run until cancelled or the connection ends. Nothing short of a read
    /// failure stops the loop: bad frames, failed fetches and failed writes
    /// are logged and the next frame is read.
    pub async fn run<R>(self, mut inbound: R) -> SessionEnd
    where
        R: Stream<Item = Result<Message, WsError>> + Unpin,
    {
        info!("Session loop started");
        loop {
            let frame = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("Session loop cancelled");
                    return SessionEnd::Cancelled;
                }
                frame = inbound.next() => frame,
            };

            let payload = match frame {
                Some(Ok(Message::Text(text))) => text.into_bytes(),
                Some(Ok(Message::Binary(data))) => data,
                Some(Ok(Message::Close(frame))) => {
                    info!(frame = ?frame, "Control plane closed the session");
                    return SessionEnd::Disconnected;
                }
                // Ping, pong and raw frames carry no assignment.
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    error!(error = %e, "Failed to read from control plane");
                    return SessionEnd::Disconnected;
                }
                None => {
                    warn!("Control plane connection ended");
                    return SessionEnd::Disconnected;
                }
            };

            self.handle_frame(&payload).await;
        }
    }

    async fn handle_frame(&self, payload: &[u8]) {
        let assignment = match Assignment::decode(payload) {
            Ok(assignment) => assignment,
            Err(e) => {
                warn!(error = %e, len = payload.len(), "Dropping undecodable message");
                return;
            }
        };

        let report = match self.dispatcher.dispatch(assignment).await {
            Ok(Some(report)) => report,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "Task aborted before producing a result");
                return;
            }
        };

        let text = match report.encode() {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "Failed to encode result");
                return;
            }
        };

        if let Err(e) = self.outbound.send_text(text).await {
            warn!(error = %e, "Failed to send result; it is lost");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::runner::TaskRunner;
    use crate::test_support::{ws_pair, ScriptFetcher, ServerSocket};
    use futures_util::SinkExt;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    /// Start a session loop over a fresh connection. Returns the server end
    /// and the loop's join handle.
    async fn start(
        fetcher: ScriptFetcher,
        cancel: CancellationToken,
    ) -> (ServerSocket, tokio::task::JoinHandle<SessionEnd>) {
        let (server, client) = ws_pair().await;
        let (sink, stream) = client.split();
        let outbound = Arc::new(Outbound::new(sink));
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(fetcher), TaskRunner::new()));
        let session = SessionLoop::new(outbound, dispatcher, cancel);
        (server, tokio::spawn(session.run(stream)))
    }

    async fn send(server: &mut ServerSocket, text: &str) {
        server.send(Message::Text(text.to_string())).await.unwrap();
    }

    /// Next text frame from the agent, skipping control frames.
    async fn next_text(server: &mut ServerSocket) -> String {
        loop {
            match timeout(WAIT, server.next()).await.unwrap().unwrap().unwrap() {
                Message::Text(text) => return text,
                Message::Ping(_) | Message::Pong(_) => continue,
                other => panic!("unexpected frame: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_success_is_reported() {
        let scratch = tempfile::tempdir().unwrap();
        let fetcher = ScriptFetcher::new(scratch.path()).with_script("alpha", "exit 0");
        let (mut server, _handle) = start(fetcher, CancellationToken::new()).await;

        send(&mut server, r#"{"task_id":"T1","test":"alpha"}"#).await;
        assert_eq!(
            next_text(&mut server).await,
            r#"{"name":"alpha","result":{"status":"success"}}"#
        );
    }

    #[tokio::test]
    async fn test_failure_is_reported_with_output() {
        let scratch = tempfile::tempdir().unwrap();
        let fetcher =
            ScriptFetcher::new(scratch.path()).with_script("beta", "echo boom >&2\nexit 1");
        let (mut server, _handle) = start(fetcher, CancellationToken::new()).await;

        send(&mut server, r#"{"task_id":"T1","test":"beta"}"#).await;
        assert_eq!(
            next_text(&mut server).await,
            r#"{"name":"beta","result":{"status":"failed","error":"boom: exit status 1"}}"#
        );
    }

    #[tokio::test]
    async fn test_noise_produces_no_reply() {
        let scratch = tempfile::tempdir().unwrap();
        let fetcher = ScriptFetcher::new(scratch.path())
            .with_script("gamma", "exit 0")
            .with_script("alpha", "exit 0");
        let (mut server, handle) = start(fetcher, CancellationToken::new()).await;

        // Empty task id, unparseable text, the control plane's own textual
        // ping and a binary frame are all dropped without a reply.
        send(&mut server, r#"{"task_id":"","test":"gamma"}"#).await;
        send(&mut server, "definitely not json").await;
        send(&mut server, r#"{"message": "ping"}"#).await;
        server.send(Message::Binary(b"\x00\x01".to_vec())).await.unwrap();
        send(&mut server, r#"{"task_id":"T2","test":"alpha"}"#).await;

        // The only reply is for the last, valid request.
        assert_eq!(
            next_text(&mut server).await,
            r#"{"name":"alpha","result":{"status":"success"}}"#
        );
        assert!(!handle.is_finished());
    }

    #[tokio::test]
    async fn test_fetch_failure_skips_to_next_message() {
        let scratch = tempfile::tempdir().unwrap();
        let fetcher = ScriptFetcher::new(scratch.path()).with_script("alpha", "exit 0");
        let (mut server, handle) = start(fetcher, CancellationToken::new()).await;

        send(&mut server, r#"{"task_id":"T1","test":"unreachable"}"#).await;
        send(&mut server, r#"{"task_id":"T2","test":"alpha"}"#).await;

        assert_eq!(
            next_text(&mut server).await,
            r#"{"name":"alpha","result":{"status":"success"}}"#
        );
        assert!(!handle.is_finished());
    }

    #[tokio::test]
    async fn test_one_result_per_request_in_order() {
        let scratch = tempfile::tempdir().unwrap();
        let fetcher = ScriptFetcher::new(scratch.path())
            .with_script("alpha", "exit 0")
            .with_script("beta", "exit 1");
        let (mut server, _handle) = start(fetcher, CancellationToken::new()).await;

        for (id, test) in [("T1", "alpha"), ("T2", "beta"), ("T3", "alpha")] {
            send(&mut server, &format!(r#"{{"task_id":"{}","test":"{}"}}"#, id, test)).await;
        }

        let mut names = Vec::new();
        for _ in 0..3 {
            let text = next_text(&mut server).await;
            let value: serde_json::Value = serde_json::from_str(&text).unwrap();
            names.push(value["name"].as_str().unwrap().to_string());
        }
        assert_eq!(names, ["alpha", "beta", "alpha"]);
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_batch_request_is_answered_with_array() {
        let scratch = tempfile::tempdir().unwrap();
        let fetcher = ScriptFetcher::new(scratch.path())
            .with_script("alpha", "exit 0")
            .with_script("beta", "exit 1");
        let (mut server, _handle) = start(fetcher, CancellationToken::new()).await;

        send(&mut server, r#"["alpha","beta"]"#).await;
        assert_eq!(
            next_text(&mut server).await,
            r#"[{"name":"alpha","result":{"status":"success"}},{"name":"beta","result":{"status":"failed","error":"exit status 1"}}]"#
        );
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_pending_read() {
        let scratch = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let (_server, handle) = start(ScriptFetcher::new(scratch.path()), cancel.clone()).await;

        // No message will ever arrive; cancellation alone must end the loop.
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let end = timeout(WAIT, handle).await.unwrap().unwrap();
        assert_eq!(end, SessionEnd::Cancelled);
    }

    #[tokio::test]
    async fn test_peer_close_ends_session() {
        let scratch = tempfile::tempdir().unwrap();
        let (mut server, handle) =
            start(ScriptFetcher::new(scratch.path()), CancellationToken::new()).await;

        server.close(None).await.unwrap();

        let end = timeout(WAIT, handle).await.unwrap().unwrap();
        assert_eq!(end, SessionEnd::Disconnected);
    }

    #[tokio::test]
    async fn test_dropped_connection_ends_session() {
        let scratch = tempfile::tempdir().unwrap();
        let (server, handle) =
            start(ScriptFetcher::new(scratch.path()), CancellationToken::new()).await;

        drop(server);

        let end = timeout(WAIT, handle).await.unwrap().unwrap();
        assert_eq!(end, SessionEnd::Disconnected);
    }
}
