//! Connection manager: one persistent connection per registered server.
//!
//! Each server moves through `Disconnected → Connecting → Handshaking →
//! Ready` and back to `Disconnected` on close or error. Every `connect`
//! bumps the server's generation; an attempt or live connection whose
//! generation is no longer current shuts itself down without touching the
//! slot, so racing connects leave exactly one connection installed.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

use tb_domain::config::{ConnectionsConfig, ServerDescriptor};
use tb_domain::trace::TraceEvent;
use tb_domain::Capability;
use tb_protocol::{tool_outcome, Codec, LogLevel, ToolSpec, WireMessage, PROTOCOL_VERSION};

use crate::backoff::ReconnectBackoff;
use crate::correlator::{MessageLink, PendingLimits, RequestCorrelator};
use crate::error::ToolError;
use crate::scheduler::ReconnectScheduler;
use crate::transport::{Connector, Transport};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Disconnected,
    Connecting,
    Handshaking,
    Ready,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Disconnected => "disconnected",
            LifecycleState::Connecting => "connecting",
            LifecycleState::Handshaking => "handshaking",
            LifecycleState::Ready => "ready",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timeouts and limits the manager runs with.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub request_timeout: Duration,
    pub handshake_timeout: Duration,
    pub connect_timeout: Duration,
    pub limits: PendingLimits,
    pub max_frame_bytes: usize,
    pub backoff: ReconnectBackoff,
}

impl From<&ConnectionsConfig> for ManagerSettings {
    fn from(cfg: &ConnectionsConfig) -> Self {
        Self {
            request_timeout: Duration::from_secs(cfg.request_timeout_secs),
            handshake_timeout: Duration::from_secs(cfg.handshake_timeout_secs),
            connect_timeout: Duration::from_secs(cfg.connect_timeout_secs),
            limits: PendingLimits {
                per_server: cfg.max_pending_per_server,
                global: cfg.max_pending_global,
            },
            max_frame_bytes: cfg.max_frame_bytes,
            backoff: ReconnectBackoff::from(&cfg.reconnect),
        }
    }
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self::from(&ConnectionsConfig::default())
    }
}

/// Point-in-time view of one server.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub id: String,
    pub label: String,
    pub state: LifecycleState,
    pub transport: &'static str,
    pub tool_count: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<Capability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
    pub last_error: Option<String>,
    pub connected_at: Option<DateTime<Utc>>,
    pub reconnect_attempt: u32,
    pub generation: u64,
}

/// A tool advertised by a ready server.
#[derive(Debug, Clone, Serialize)]
pub struct RemoteTool {
    pub server_id: String,
    #[serde(flatten)]
    pub spec: ToolSpec,
}

/// Unsolicited traffic from a server, re-broadcast to subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    Event {
        server_id: String,
        name: String,
        data: Value,
    },
    Log {
        server_id: String,
        level: LogLevel,
        message: String,
        fields: Value,
    },
}

struct HandshakeAck {
    version: String,
    capabilities: Vec<Capability>,
    tools: Vec<ToolSpec>,
}

struct Connection {
    outbound: mpsc::Sender<String>,
    tools: Vec<ToolSpec>,
    capabilities: Vec<Capability>,
    protocol_version: String,
    connected_at: DateTime<Utc>,
}

enum AttemptError {
    Superseded,
    Failed(String),
}

struct ServerSlot {
    descriptor: ServerDescriptor,
    order: u64,
    generation: u64,
    state: watch::Sender<LifecycleState>,
    /// Cancels the in-flight attempt and, once ready, the live connection.
    attempt: Option<CancellationToken>,
    connection: Option<Connection>,
    last_error: Option<String>,
    reconnect_attempt: u32,
    auto_reconnect: bool,
}

impl ServerSlot {
    fn new(descriptor: ServerDescriptor, order: u64) -> Self {
        let (state, _) = watch::channel(LifecycleState::Disconnected);
        Self {
            descriptor,
            order,
            generation: 0,
            state,
            attempt: None,
            connection: None,
            last_error: None,
            reconnect_attempt: 0,
            auto_reconnect: false,
        }
    }

    fn current(&self) -> LifecycleState {
        *self.state.borrow()
    }

    fn transition(&self, to: LifecycleState) {
        let from = self.state.send_replace(to);
        if from != to {
            TraceEvent::ConnectionStateChanged {
                server_id: self.descriptor.id.clone(),
                generation: self.generation,
                from: from.to_string(),
                to: to.to_string(),
            }
            .emit();
        }
    }

    /// Tear down without scheduling anything. Bumps the generation so any
    /// close notification from the old connection is ignored.
    fn stop(&mut self) {
        self.generation += 1;
        self.auto_reconnect = false;
        self.reconnect_attempt = 0;
        if let Some(token) = self.attempt.take() {
            token.cancel();
        }
        self.connection = None;
        self.transition(LifecycleState::Disconnected);
    }

    fn status(&self) -> ServerStatus {
        let conn = self.connection.as_ref();
        ServerStatus {
            id: self.descriptor.id.clone(),
            label: self.descriptor.label().to_owned(),
            state: self.current(),
            transport: self.descriptor.transport.as_str(),
            tool_count: conn.map_or(0, |c| c.tools.len()),
            capabilities: conn.map(|c| c.capabilities.clone()).unwrap_or_default(),
            protocol_version: conn.map(|c| c.protocol_version.clone()),
            last_error: self.last_error.clone(),
            connected_at: conn.map(|c| c.connected_at),
            reconnect_attempt: self.reconnect_attempt,
            generation: self.generation,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ConnectionManager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ConnectionManager {
    servers: RwLock<HashMap<String, ServerSlot>>,
    next_order: AtomicU64,
    connector: Arc<dyn Connector>,
    correlator: RequestCorrelator,
    scheduler: ReconnectScheduler,
    codec: Codec,
    settings: ManagerSettings,
    notices: broadcast::Sender<Notice>,
    shutdown: CancellationToken,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, settings: ManagerSettings) -> Arc<Self> {
        let (notices, _) = broadcast::channel(256);
        Arc::new(Self {
            servers: RwLock::new(HashMap::new()),
            next_order: AtomicU64::new(0),
            connector,
            correlator: RequestCorrelator::new(settings.request_timeout, settings.limits),
            scheduler: ReconnectScheduler::new(settings.backoff.clone()),
            codec: Codec::new(settings.max_frame_bytes),
            settings,
            notices,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn correlator(&self) -> &RequestCorrelator {
        &self.correlator
    }

    pub fn scheduler(&self) -> &ReconnectScheduler {
        &self.scheduler
    }

    /// Add a server. Re-registering an id replaces its descriptor and drops
    /// the existing connection. Returns `true` for a new id.
    pub fn register(&self, descriptor: ServerDescriptor) -> bool {
        let id = descriptor.id.clone();
        let replaced = {
            let mut servers = self.servers.write();
            match servers.get_mut(&id) {
                Some(slot) => {
                    slot.stop();
                    slot.descriptor = descriptor;
                    slot.last_error = None;
                    true
                }
                None => {
                    let order = self.next_order.fetch_add(1, Ordering::Relaxed);
                    servers.insert(id.clone(), ServerSlot::new(descriptor, order));
                    false
                }
            }
        };

        if replaced {
            self.scheduler.cancel(&id);
            self.correlator.fail_server(&id, "server re-registered");
            tracing::info!(server_id = %id, "replaced tool server descriptor");
        } else {
            tracing::info!(server_id = %id, "registered tool server");
        }
        !replaced
    }

    /// Start (or restart) the connection for `server_id`.
    ///
    /// Returns immediately with the new generation; progress is observable
    /// through [`state`](Self::state) and [`wait_for_state`](Self::wait_for_state).
    pub fn connect(self: &Arc<Self>, server_id: &str) -> Result<u64, ToolError> {
        self.begin_attempt(server_id, None)
    }

    /// Close the connection and stop reconnecting. The server stays registered.
    pub fn disconnect(&self, server_id: &str) -> Result<(), ToolError> {
        {
            let mut servers = self.servers.write();
            let slot = servers
                .get_mut(server_id)
                .ok_or_else(|| ToolError::UnknownServer(server_id.to_owned()))?;
            slot.stop();
        }
        self.scheduler.cancel(server_id);
        self.correlator.fail_server(server_id, "disconnected");
        tracing::info!(server_id = %server_id, "disconnected tool server");
        Ok(())
    }

    /// Disconnect and forget the server. Returns whether it was registered.
    pub fn remove(&self, server_id: &str) -> bool {
        let removed = self.servers.write().remove(server_id);
        let Some(mut slot) = removed else {
            return false;
        };
        slot.stop();
        self.scheduler.cancel(server_id);
        self.correlator.fail_server(server_id, "server removed");
        tracing::info!(server_id = %server_id, "removed tool server");
        true
    }

    pub fn state(&self, server_id: &str) -> Option<LifecycleState> {
        self.servers.read().get(server_id).map(ServerSlot::current)
    }

    /// Wait until the server reaches `target`. Returns `false` on timeout or
    /// when the server is unknown or removed while waiting.
    pub async fn wait_for_state(
        &self,
        server_id: &str,
        target: LifecycleState,
        timeout: Duration,
    ) -> bool {
        let rx = {
            let servers = self.servers.read();
            servers.get(server_id).map(|slot| slot.state.subscribe())
        };
        let Some(mut rx) = rx else {
            return false;
        };
        let reached = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|s| *s == target)).await,
            Ok(Ok(_))
        );
        reached
    }

    /// Tools of every ready server, in registration order.
    pub fn list_tools(&self) -> Vec<RemoteTool> {
        let servers = self.servers.read();
        let mut ready: Vec<&ServerSlot> = servers
            .values()
            .filter(|slot| slot.connection.is_some())
            .collect();
        ready.sort_by_key(|slot| slot.order);
        ready
            .into_iter()
            .flat_map(|slot| {
                let server_id = slot.descriptor.id.clone();
                slot.connection
                    .iter()
                    .flat_map(|c| c.tools.iter())
                    .map(move |spec| RemoteTool {
                        server_id: server_id.clone(),
                        spec: spec.clone(),
                    })
            })
            .collect()
    }

    /// First ready server (by registration order) advertising `tool`.
    pub fn resolve_tool(&self, tool: &str) -> Option<RemoteTool> {
        self.list_tools().into_iter().find(|t| t.spec.name == tool)
    }

    /// The `ToolSpec` that `server_id` advertised for `tool`, if it is ready.
    pub fn tool_spec(&self, server_id: &str, tool: &str) -> Option<ToolSpec> {
        let servers = self.servers.read();
        servers
            .get(server_id)?
            .connection
            .as_ref()?
            .tools
            .iter()
            .find(|t| t.name == tool)
            .cloned()
    }

    pub fn is_registered(&self, server_id: &str) -> bool {
        self.servers.read().contains_key(server_id)
    }

    pub fn status(&self) -> Vec<ServerStatus> {
        let servers = self.servers.read();
        let mut slots: Vec<&ServerSlot> = servers.values().collect();
        slots.sort_by_key(|slot| slot.order);
        slots.into_iter().map(ServerSlot::status).collect()
    }

    pub fn server_status(&self, server_id: &str) -> Option<ServerStatus> {
        self.servers.read().get(server_id).map(ServerSlot::status)
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    /// Run `tool` on `server_id` and wait for its response.
    pub async fn invoke(&self, server_id: &str, tool: &str, params: Value) -> Result<Value, ToolError> {
        if !self.is_registered(server_id) {
            return Err(ToolError::UnknownServer(server_id.to_owned()));
        }
        self.correlator.invoke(self, server_id, tool, params).await
    }

    /// Encode and queue a frame on the server's live connection.
    pub async fn send(&self, server_id: &str, message: WireMessage) -> Result<(), ToolError> {
        let outbound = {
            let servers = self.servers.read();
            let slot = servers
                .get(server_id)
                .ok_or_else(|| ToolError::UnknownServer(server_id.to_owned()))?;
            match &slot.connection {
                Some(conn) => conn.outbound.clone(),
                None => {
                    return Err(ToolError::connection_lost(
                        server_id,
                        format!("server is {}", slot.current()),
                    ))
                }
            }
        };
        let frame = self.codec.encode(&message)?;
        outbound
            .send(frame)
            .await
            .map_err(|_| ToolError::connection_lost(server_id, "outbound queue closed"))
    }

    /// Stop every connection and timer. The manager cannot be reused.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let timers = self.scheduler.cancel_all();
        let ids: Vec<String> = {
            let mut servers = self.servers.write();
            for slot in servers.values_mut() {
                slot.stop();
            }
            servers.keys().cloned().collect()
        };
        for id in &ids {
            self.correlator.fail_server(id, "shutting down");
        }
        tracing::info!(servers = ids.len(), timers, "connection manager shut down");
    }

    // ── Attempt lifecycle ─────────────────────────────────────────────

    /// Bump the generation and spawn a fresh attempt. With `reconnect_of`
    /// set, only proceeds if that generation is still current.
    fn begin_attempt(
        self: &Arc<Self>,
        server_id: &str,
        reconnect_of: Option<u64>,
    ) -> Result<u64, ToolError> {
        if self.shutdown.is_cancelled() {
            return Err(ToolError::connection_lost(server_id, "manager is shut down"));
        }

        let (generation, token) = {
            let mut servers = self.servers.write();
            let slot = servers
                .get_mut(server_id)
                .ok_or_else(|| ToolError::UnknownServer(server_id.to_owned()))?;
            match reconnect_of {
                Some(expected) if slot.generation != expected || !slot.auto_reconnect => {
                    return Err(ToolError::connection_lost(server_id, "reconnect superseded"));
                }
                Some(_) => {}
                None => slot.reconnect_attempt = 0,
            }
            slot.generation += 1;
            if let Some(old) = slot.attempt.take() {
                old.cancel();
            }
            slot.connection = None;
            slot.auto_reconnect = true;
            let token = self.shutdown.child_token();
            slot.attempt = Some(token.clone());
            slot.transition(LifecycleState::Connecting);
            (slot.generation, token)
        };

        if reconnect_of.is_none() {
            self.scheduler.cancel(server_id);
        }
        self.correlator
            .fail_server(server_id, "superseded by a new connection");

        tracing::debug!(server_id = %server_id, generation, "connection attempt started");
        let this = Arc::clone(self);
        let id = server_id.to_owned();
        tokio::spawn(async move { this.run_attempt(id, generation, token).await });
        Ok(generation)
    }

    async fn run_attempt(self: Arc<Self>, server_id: String, generation: u64, token: CancellationToken) {
        let descriptor = {
            let servers = self.servers.read();
            match servers.get(&server_id) {
                Some(slot) if slot.generation == generation => slot.descriptor.clone(),
                _ => return,
            }
        };

        let attempt = tokio::select! {
            _ = token.cancelled() => return,
            result = self.open_and_handshake(&descriptor, generation) => result,
        };

        match attempt {
            Ok((transport, ack)) => {
                let Transport {
                    outbound,
                    inbound,
                    shutdown,
                } = transport;
                if !self.install(&server_id, generation, &token, outbound, ack) {
                    shutdown.cancel();
                    return;
                }
                self.drive(&server_id, generation, &token, inbound, &shutdown)
                    .await;
            }
            Err(AttemptError::Superseded) => {}
            Err(AttemptError::Failed(reason)) => {
                tracing::warn!(
                    server_id = %server_id,
                    generation,
                    reason = %reason,
                    "connection attempt failed"
                );
                self.on_connection_lost(&server_id, generation, reason);
            }
        }
    }

    async fn open_and_handshake(
        &self,
        descriptor: &ServerDescriptor,
        generation: u64,
    ) -> Result<(Transport, HandshakeAck), AttemptError> {
        let connect = self.connector.connect(descriptor);
        let mut transport = match tokio::time::timeout(self.settings.connect_timeout, connect).await {
            Ok(Ok(transport)) => transport,
            Ok(Err(e)) => return Err(AttemptError::Failed(e.to_string())),
            Err(_) => {
                return Err(AttemptError::Failed(format!(
                    "connect timed out after {}ms",
                    self.settings.connect_timeout.as_millis()
                )))
            }
        };

        let advanced = {
            let servers = self.servers.read();
            match servers.get(&descriptor.id) {
                Some(slot) if slot.generation == generation => {
                    slot.transition(LifecycleState::Handshaking);
                    true
                }
                _ => false,
            }
        };
        if !advanced {
            transport.shutdown.cancel();
            return Err(AttemptError::Superseded);
        }

        match self.handshake(descriptor, &mut transport).await {
            Ok(ack) => Ok((transport, ack)),
            Err(reason) => {
                transport.shutdown.cancel();
                Err(AttemptError::Failed(reason))
            }
        }
    }

    async fn handshake(
        &self,
        descriptor: &ServerDescriptor,
        transport: &mut Transport,
    ) -> Result<HandshakeAck, String> {
        let server_id = descriptor.id.as_str();
        let hello = self
            .codec
            .encode(&WireMessage::handshake(descriptor.capabilities.clone()))
            .map_err(|e| e.to_string())?;
        transport
            .outbound
            .send(hello)
            .await
            .map_err(|_| "transport closed before handshake".to_string())?;

        let codec = self.codec;
        let closed = transport.shutdown.clone();
        let inbound = &mut transport.inbound;
        let wait = async {
            loop {
                let text = tokio::select! {
                    _ = closed.cancelled() => None,
                    text = inbound.recv() => text,
                };
                let Some(text) = text else {
                    return Err("transport closed before handshake_response".to_string());
                };
                match codec.decode(&text) {
                    Ok(WireMessage::HandshakeResponse {
                        version,
                        capabilities,
                        tools,
                    }) => {
                        return Ok(HandshakeAck {
                            version,
                            capabilities,
                            tools,
                        })
                    }
                    Ok(other) => {
                        tracing::debug!(
                            server_id = %server_id,
                            kind = other.kind(),
                            "ignoring frame received before handshake_response"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(server_id = %server_id, error = %e, "dropping malformed frame during handshake");
                    }
                }
            }
        };

        match tokio::time::timeout(self.settings.handshake_timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(format!(
                "no handshake_response within {}ms",
                self.settings.handshake_timeout.as_millis()
            )),
        }
    }

    fn install(
        &self,
        server_id: &str,
        generation: u64,
        token: &CancellationToken,
        outbound: mpsc::Sender<String>,
        ack: HandshakeAck,
    ) -> bool {
        let mut servers = self.servers.write();
        let Some(slot) = servers.get_mut(server_id) else {
            return false;
        };
        if slot.generation != generation || token.is_cancelled() {
            return false;
        }

        if ack.version != PROTOCOL_VERSION {
            tracing::warn!(
                server_id = %server_id,
                server_version = %ack.version,
                core_version = PROTOCOL_VERSION,
                "protocol version mismatch, continuing"
            );
        }
        let advertised = ack.tools.len();
        let tools: Vec<ToolSpec> = ack
            .tools
            .into_iter()
            .filter(|t| slot.descriptor.allows_tool(&t.name))
            .collect();
        tracing::info!(
            server_id = %server_id,
            generation,
            tool_count = tools.len(),
            hidden = advertised - tools.len(),
            "tool server ready"
        );

        slot.connection = Some(Connection {
            outbound,
            tools,
            capabilities: ack.capabilities,
            protocol_version: ack.version,
            connected_at: Utc::now(),
        });
        slot.last_error = None;
        slot.reconnect_attempt = 0;
        slot.transition(LifecycleState::Ready);
        true
    }

    async fn drive(
        self: &Arc<Self>,
        server_id: &str,
        generation: u64,
        token: &CancellationToken,
        mut inbound: mpsc::Receiver<String>,
        closed: &CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    closed.cancel();
                    return;
                }
                frame = inbound.recv() => match frame {
                    Some(text) => self.dispatch(server_id, &text),
                    None => break,
                },
                _ = closed.cancelled() => break,
            }
        }
        closed.cancel();
        self.on_connection_lost(server_id, generation, "transport closed".to_string());
    }

    fn dispatch(&self, server_id: &str, text: &str) {
        let msg = match self.codec.decode(text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(server_id = %server_id, error = %e, "dropping malformed frame");
                return;
            }
        };

        match msg {
            WireMessage::ToolResponse {
                request_id,
                result,
                error,
            } => {
                self.correlator
                    .complete(server_id, &request_id, tool_outcome(result, error));
            }
            WireMessage::Event { name, data } => {
                tracing::info!(server_id = %server_id, event = %name, data = %data, "server event");
                let _ = self.notices.send(Notice::Event {
                    server_id: server_id.to_owned(),
                    name,
                    data,
                });
            }
            WireMessage::Log {
                level,
                message,
                fields,
            } => {
                log_remote(server_id, level, &message, &fields);
                let _ = self.notices.send(Notice::Log {
                    server_id: server_id.to_owned(),
                    level,
                    message,
                    fields,
                });
            }
            WireMessage::HandshakeResponse { .. } => {
                tracing::debug!(server_id = %server_id, "ignoring repeated handshake_response");
            }
            other => {
                tracing::warn!(server_id = %server_id, kind = other.kind(), "unexpected frame from server");
            }
        }
    }

    fn on_connection_lost(self: &Arc<Self>, server_id: &str, generation: u64, reason: String) {
        let next_attempt = {
            let mut servers = self.servers.write();
            let Some(slot) = servers.get_mut(server_id) else {
                return;
            };
            if slot.generation != generation {
                tracing::debug!(server_id = %server_id, generation, "ignoring close of superseded connection");
                return;
            }
            slot.connection = None;
            slot.attempt = None;
            slot.last_error = Some(reason.clone());
            slot.transition(LifecycleState::Disconnected);
            if slot.auto_reconnect {
                let attempt = slot.reconnect_attempt;
                slot.reconnect_attempt = attempt.saturating_add(1);
                Some(attempt)
            } else {
                None
            }
        };

        self.correlator.fail_server(server_id, &reason);

        if let Some(attempt) = next_attempt {
            self.schedule_reconnect(server_id, generation, attempt);
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, server_id: &str, generation: u64, attempt: u32) {
        let this = Arc::clone(self);
        let id = server_id.to_owned();
        let scheduled = self.scheduler.schedule(server_id, attempt, async move {
            if let Err(e) = this.begin_attempt(&id, Some(generation)) {
                tracing::debug!(server_id = %id, error = %e, "reconnect skipped");
            }
        });

        match scheduled {
            Some(delay) => {
                tracing::info!(
                    server_id = %server_id,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "reconnect scheduled"
                );
            }
            None => {
                let mut servers = self.servers.write();
                if let Some(slot) = servers.get_mut(server_id) {
                    if slot.generation == generation {
                        slot.auto_reconnect = false;
                        slot.last_error = Some("reconnect attempts exhausted".to_string());
                    }
                }
                tracing::error!(server_id = %server_id, attempts = attempt, "reconnect attempts exhausted");
            }
        }
    }
}

#[async_trait]
impl MessageLink for ConnectionManager {
    async fn send(&self, server_id: &str, message: WireMessage) -> Result<(), ToolError> {
        ConnectionManager::send(self, server_id, message).await
    }
}

fn log_remote(server_id: &str, level: LogLevel, message: &str, fields: &Value) {
    match level {
        LogLevel::Trace => {
            tracing::trace!(target: "toolbridge::server_log", server_id = %server_id, fields = %fields, "{message}")
        }
        LogLevel::Debug => {
            tracing::debug!(target: "toolbridge::server_log", server_id = %server_id, fields = %fields, "{message}")
        }
        LogLevel::Info => {
            tracing::info!(target: "toolbridge::server_log", server_id = %server_id, fields = %fields, "{message}")
        }
        LogLevel::Warn => {
            tracing::warn!(target: "toolbridge::server_log", server_id = %server_id, fields = %fields, "{message}")
        }
        LogLevel::Error => {
            tracing::error!(target: "toolbridge::server_log", server_id = %server_id, fields = %fields, "{message}")
        }
    }
}
