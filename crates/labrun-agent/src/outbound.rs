//! Write side of the session connection.

use futures_util::{Sink, SinkExt};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

/// The single writer for a session.
///
/// Both loops send through this handle. The lock is held for exactly one
/// frame, so results, pings and the close frame never interleave on the wire.
pub struct Outbound<S> {
    sink: Mutex<S>,
}

impl<S> Outbound<S>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    pub fn new(sink: S) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }

    /// Send one frame.
    pub async fn send(&self, message: Message) -> Result<(), WsError> {
        self.sink.lock().await.send(message).await
    }

    /// Send a text frame.
    pub async fn send_text(&self, text: String) -> Result<(), WsError> {
        self.send(Message::Text(text)).await
    }

    /// Send an empty ping frame.
    pub async fn ping(&self) -> Result<(), WsError> {
        self.send(Message::Ping(Vec::new())).await
    }

    /// Send a normal-closure close frame.
    pub async fn send_close(&self) -> Result<(), WsError> {
        self.send(Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        })))
        .await
    }

    /// Flush and close the underlying sink.
    pub async fn close(&self) -> Result<(), WsError> {
        self.sink.lock().await.close().await
    }
}
