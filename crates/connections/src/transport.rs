//! Transports carry text frames between the core and one server.
//!
//! A [`Connector`] opens a [`Transport`]: an outbound queue, an inbound
//! stream and a shutdown token. The inbound stream ends (or the token is
//! cancelled) when the underlying connection goes away.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use tb_domain::config::ServerDescriptor;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },
}

/// An open, bidirectional frame channel.
pub struct Transport {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<String>,
    /// Cancelled by either side to close the connection.
    pub shutdown: CancellationToken,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, descriptor: &ServerDescriptor) -> Result<Transport, TransportError>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// WebSocket
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Connects to `ws://` / `wss://` servers with `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    buffer: usize,
}

impl WebSocketConnector {
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer: buffer.max(1),
        }
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, descriptor: &ServerDescriptor) -> Result<Transport, TransportError> {
        let url = descriptor.url.as_str();
        let (ws, _response) =
            tokio_tungstenite::connect_async(url)
                .await
                .map_err(|e| TransportError::Connect {
                    url: url.to_owned(),
                    reason: e.to_string(),
                })?;
        let (mut sink, mut stream) = ws.split();

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(self.buffer);
        let (inbound_tx, inbound_rx) = mpsc::channel::<String>(self.buffer);
        let shutdown = CancellationToken::new();

        // Writer: outbound queue → socket. Sends a close frame on the way out.
        let writer_shutdown = shutdown.clone();
        let server_id = descriptor.id.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_shutdown.cancelled() => break,
                    next = outbound_rx.recv() => match next {
                        Some(text) => {
                            if let Err(e) = sink.send(Message::Text(text)).await {
                                tracing::debug!(server_id = %server_id, error = %e, "websocket write failed");
                                writer_shutdown.cancel();
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        });

        // Reader: socket → inbound queue. Dropping `inbound_tx` ends the stream.
        let reader_shutdown = shutdown.clone();
        let server_id = descriptor.id.clone();
        tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    _ = reader_shutdown.cancelled() => break,
                    msg = stream.next() => msg,
                };
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if inbound_tx.send(text).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => {
                            if inbound_tx.send(text).await.is_err() {
                                break;
                            }
                        }
                        Err(_) => {
                            tracing::warn!(server_id = %server_id, "dropping non-UTF-8 binary frame");
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        tracing::debug!(server_id = %server_id, ?frame, "server closed websocket");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(server_id = %server_id, error = %e, "websocket read failed");
                        break;
                    }
                    None => break,
                }
            }
            reader_shutdown.cancel();
        });

        Ok(Transport {
            outbound: outbound_tx,
            inbound: inbound_rx,
            shutdown,
        })
    }
}
