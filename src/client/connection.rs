//! Client Connection
//!
//! Async WebSocket connector. Frames are decoded on a reader task and handed
//! to the caller as `ClientEvent`s; outgoing messages go through a writer
//! task so the caller never blocks on the socket.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tracing::{debug, warn};

use crate::client::state::ConnectionStatus;
use crate::network::protocol::{ClientMessage, ServerMessage};

const CHANNEL_BUFFER: usize = 64;

/// Client connector errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Encoding error.
    #[error("Encoding error: {0}")]
    Json(#[from] serde_json::Error),

    /// Connection already closed.
    #[error("Connection closed")]
    Closed,
}

/// Something the game loop should react to.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Transport status changed
    Status(ConnectionStatus),
    /// Server sent a message
    Message(ServerMessage),
}

/// Open connection to a sync server.
pub struct SyncClient {
    outgoing: mpsc::Sender<ClientMessage>,
    events: mpsc::Receiver<ClientEvent>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl SyncClient {
    /// Connect to `url` (e.g. `ws://127.0.0.1:3000`).
    ///
    /// The first event is always `Status(Connected)`.
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        let (ws_stream, _) = connect_async(url).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<ClientMessage>(CHANNEL_BUFFER);
        let (event_tx, event_rx) = mpsc::channel::<ClientEvent>(CHANNEL_BUFFER);

        let _ = event_tx.send(ClientEvent::Status(ConnectionStatus::Connected)).await;

        let writer = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let text = match msg.to_json() {
                    Ok(t) => t,
                    Err(e) => {
                        warn!("Failed to serialize message: {}", e);
                        continue;
                    }
                };
                if ws_sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        let reader = tokio::spawn(async move {
            let status = loop {
                match ws_receiver.next().await {
                    Some(Ok(Message::Text(text))) => match ServerMessage::from_json(&text) {
                        Ok(msg) => {
                            if event_tx.send(ClientEvent::Message(msg)).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => debug!("Ignoring undecodable frame: {}", e),
                    },
                    Some(Ok(Message::Close(_))) | None => break ConnectionStatus::Disconnected,
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        break ConnectionStatus::Error;
                    }
                    Some(Ok(_)) => {}
                }
            };
            let _ = event_tx.send(ClientEvent::Status(status)).await;
        });

        Ok(Self {
            outgoing: out_tx,
            events: event_rx,
            reader,
            writer,
        })
    }

    /// Queue a message for the server.
    pub async fn send(&self, message: ClientMessage) -> Result<(), ClientError> {
        self.outgoing.send(message).await.map_err(|_| ClientError::Closed)
    }

    /// Next event; `None` once the connection is gone and drained.
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        self.events.recv().await
    }

    /// Next server message, skipping status events.
    pub async fn next_message(&mut self) -> Option<ServerMessage> {
        while let Some(event) = self.events.recv().await {
            if let ClientEvent::Message(msg) = event {
                return Some(msg);
            }
        }
        None
    }

    /// Close the socket and stop both tasks.
    pub async fn close(self) {
        drop(self.outgoing);
        let _ = self.writer.await;
        self.reader.abort();
    }
}
