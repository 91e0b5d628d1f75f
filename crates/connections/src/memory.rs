//! In-process transport.
//!
//! Every successful [`MemoryConnector::connect`] hands the server half of a
//! channel pair ([`ServerEnd`]) to whoever holds the accept receiver. Used to
//! embed tool servers in the same process and to drive the manager in tests.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tb_domain::config::ServerDescriptor;
use tb_protocol::{Codec, ToolSpec, WireMessage, PROTOCOL_VERSION};

use crate::transport::{Connector, Transport, TransportError};

/// Server half of an in-process connection.
pub struct ServerEnd {
    pub server_id: String,
    pub from_core: mpsc::Receiver<String>,
    pub to_core: mpsc::Sender<String>,
    pub closed: CancellationToken,
    codec: Codec,
}

impl ServerEnd {
    /// Next decodable frame from the core. `None` once the core hung up.
    pub async fn recv(&mut self) -> Option<WireMessage> {
        loop {
            let text = tokio::select! {
                _ = self.closed.cancelled() => return None,
                text = self.from_core.recv() => text?,
            };
            match self.codec.decode(&text) {
                Ok(msg) => return Some(msg),
                Err(e) => tracing::warn!(server_id = %self.server_id, error = %e, "undecodable frame from core"),
            }
        }
    }

    /// Send a frame to the core. Returns `false` when the core is gone.
    pub async fn send(&self, msg: &WireMessage) -> bool {
        match self.codec.encode(msg) {
            Ok(text) => self.send_raw(text).await,
            Err(e) => {
                tracing::warn!(server_id = %self.server_id, error = %e, "failed to encode frame for core");
                false
            }
        }
    }

    pub async fn send_raw(&self, text: String) -> bool {
        !self.closed.is_cancelled() && self.to_core.send(text).await.is_ok()
    }

    /// Wait for the core's `handshake` and acknowledge it with `tools`.
    pub async fn accept_handshake(&mut self, tools: Vec<ToolSpec>) -> bool {
        match self.recv().await {
            Some(WireMessage::Handshake { capabilities, .. }) => {
                self.send(&WireMessage::HandshakeResponse {
                    version: PROTOCOL_VERSION.to_string(),
                    capabilities,
                    tools,
                })
                .await
            }
            _ => false,
        }
    }

    /// Drop the connection from the server side.
    pub fn close(self) {
        self.closed.cancel();
    }
}

/// Connector backed by in-memory channels.
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<ServerEnd>,
    buffer: usize,
    codec: Codec,
    connects: AtomicUsize,
    refuse: AtomicU32,
}

impl MemoryConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerEnd>) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let connector = Self {
            accept_tx,
            buffer: 64,
            codec: Codec::default(),
            connects: AtomicUsize::new(0),
            refuse: AtomicU32::new(0),
        };
        (connector, accept_rx)
    }

    /// Number of connection attempts seen so far, refused ones included.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Refuse the next `n` connection attempts.
    pub fn refuse_next(&self, n: u32) {
        self.refuse.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, descriptor: &ServerDescriptor) -> Result<Transport, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        let refused = self
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::Connect {
                url: descriptor.url.clone(),
                reason: "connection refused".into(),
            });
        }

        let (core_tx, server_rx) = mpsc::channel(self.buffer);
        let (server_tx, core_rx) = mpsc::channel(self.buffer);
        let closed = CancellationToken::new();

        let end = ServerEnd {
            server_id: descriptor.id.clone(),
            from_core: server_rx,
            to_core: server_tx,
            closed: closed.clone(),
            codec: self.codec,
        };
        self.accept_tx
            .send(end)
            .map_err(|_| TransportError::Connect {
                url: descriptor.url.clone(),
                reason: "no listener".into(),
            })?;

        Ok(Transport {
            outbound: core_tx,
            inbound: core_rx,
            shutdown: closed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_flow_both_ways() {
        let (connector, mut accept) = MemoryConnector::new();
        let descriptor = ServerDescriptor::new("mem", "ws://memory");
        let mut transport = connector.connect(&descriptor).await.unwrap();
        let mut end = accept.recv().await.unwrap();

        let hello = Codec::default()
            .encode(&WireMessage::handshake(vec![]))
            .unwrap();
        transport.outbound.send(hello).await.unwrap();
        assert!(matches!(end.recv().await, Some(WireMessage::Handshake { .. })));

        assert!(end.send_raw("ping".into()).await);
        assert_eq!(transport.inbound.recv().await.as_deref(), Some("ping"));
    }

    #[tokio::test]
    async fn refused_attempts_are_counted() {
        let (connector, _accept) = MemoryConnector::new();
        connector.refuse_next(2);
        let descriptor = ServerDescriptor::new("mem", "ws://memory");
        assert!(connector.connect(&descriptor).await.is_err());
        assert!(connector.connect(&descriptor).await.is_err());
        assert!(connector.connect(&descriptor).await.is_ok());
        assert_eq!(connector.connect_count(), 3);
    }

    #[tokio::test]
    async fn server_close_cancels_shutdown_token() {
        let (connector, mut accept) = MemoryConnector::new();
        let transport = connector
            .connect(&ServerDescriptor::new("mem", "ws://memory"))
            .await
            .unwrap();
        accept.recv().await.unwrap().close();
        assert!(transport.shutdown.is_cancelled());
    }
}
