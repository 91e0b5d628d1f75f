//! Boots a tool server on a real WebSocket listener and drives it through
//! [`WebSocketConnector`]: handshake, a tool call, and a server-side close.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;

use tb_connections::{ConnectionManager, LifecycleState, ManagerSettings, WebSocketConnector};
use tb_domain::config::ServerDescriptor;
use tb_protocol::{ToolSpec, WireMessage, PROTOCOL_VERSION};

async fn next_frame<S>(stream: &mut S) -> Option<WireMessage>
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    match stream.next().await {
        Some(Ok(Message::Text(text))) => serde_json::from_str(&text).ok(),
        _ => None,
    }
}

/// Serves exactly one connection. Answers the handshake, echoes one
/// `execute_tool`, then closes once `hang_up` fires.
async fn start_tool_server(hang_up: oneshot::Receiver<()>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _peer) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let (mut sink, mut stream) = ws.split();

        match next_frame(&mut stream).await {
            Some(WireMessage::Handshake { capabilities, .. }) => {
                let ack = WireMessage::HandshakeResponse {
                    version: PROTOCOL_VERSION.into(),
                    capabilities,
                    tools: vec![ToolSpec::new("echo")],
                };
                sink.send(Message::Text(serde_json::to_string(&ack).unwrap()))
                    .await
                    .unwrap();
            }
            other => panic!("expected handshake, got {other:?}"),
        }

        if let Some(WireMessage::ExecuteTool {
            request_id, params, ..
        }) = next_frame(&mut stream).await
        {
            let reply = WireMessage::ToolResponse {
                request_id,
                result: Some(json!({ "echoed": params })),
                error: None,
            };
            sink.send(Message::Text(serde_json::to_string(&reply).unwrap()))
                .await
                .unwrap();
        }

        let _ = hang_up.await;
        let _ = sink.send(Message::Close(None)).await;
    });

    addr
}

#[tokio::test]
async fn websocket_round_trip_and_close() {
    let (hang_up_tx, hang_up_rx) = oneshot::channel();
    let addr = start_tool_server(hang_up_rx).await;

    let manager = ConnectionManager::new(
        Arc::new(WebSocketConnector::new(16)),
        ManagerSettings::default(),
    );
    manager.register(ServerDescriptor::new("echo-server", format!("ws://{addr}")));
    manager.connect("echo-server").unwrap();

    assert!(
        manager
            .wait_for_state("echo-server", LifecycleState::Ready, Duration::from_secs(5))
            .await,
        "status: {:?}",
        manager.server_status("echo-server")
    );
    assert_eq!(manager.list_tools()[0].spec.name, "echo");

    let out = manager
        .invoke("echo-server", "echo", json!({"text": "hi"}))
        .await
        .unwrap();
    assert_eq!(out, json!({"echoed": {"text": "hi"}}));

    hang_up_tx.send(()).unwrap();
    assert!(
        manager
            .wait_for_state("echo-server", LifecycleState::Disconnected, Duration::from_secs(5))
            .await
    );
    assert!(manager.scheduler().is_scheduled("echo-server"));

    manager.shutdown();
}
