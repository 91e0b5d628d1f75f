//! Request/response correlation for remote tool calls.
//!
//! Every `execute_tool` carries a fresh UUID request id; the matching
//! `tool_response` is routed back by that id alone, so responses may arrive
//! in any order. A pending entry leaves the table exactly once: on response,
//! timeout, connection loss or when the caller stops waiting.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use tb_domain::trace::TraceEvent;
use tb_protocol::{RemoteError, WireMessage};

use crate::error::ToolError;

/// Outbound seam: anything that can deliver a frame to a named server.
#[async_trait]
pub trait MessageLink: Send + Sync {
    async fn send(&self, server_id: &str, message: WireMessage) -> Result<(), ToolError>;
}

/// Bounds on in-flight requests. `0` disables a bound.
#[derive(Debug, Clone, Copy)]
pub struct PendingLimits {
    pub per_server: usize,
    pub global: usize,
}

impl Default for PendingLimits {
    fn default() -> Self {
        Self {
            per_server: 50,
            global: 200,
        }
    }
}

struct PendingRequest {
    server_id: String,
    tool: String,
    submitted_at: Instant,
    tx: oneshot::Sender<Result<Value, ToolError>>,
}

pub struct RequestCorrelator {
    pending: Mutex<HashMap<String, PendingRequest>>,
    timeout: Duration,
    limits: PendingLimits,
}

/// Removes the pending entry if the waiting future is dropped early.
struct PendingGuard<'a> {
    correlator: &'a RequestCorrelator,
    request_id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.correlator.pending.lock().remove(&self.request_id);
    }
}

impl RequestCorrelator {
    pub fn new(timeout: Duration, limits: PendingLimits) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            timeout,
            limits,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send `execute_tool` through `link` and wait for the matching response.
    pub async fn invoke(
        &self,
        link: &dyn MessageLink,
        server_id: &str,
        tool: &str,
        params: Value,
    ) -> Result<Value, ToolError> {
        let started = Instant::now();
        let request_id = uuid::Uuid::new_v4().to_string();
        let rx = self.register(server_id, tool, &request_id)?;
        let _guard = PendingGuard {
            correlator: self,
            request_id: request_id.clone(),
        };

        let message = WireMessage::ExecuteTool {
            request_id: request_id.clone(),
            tool: tool.to_owned(),
            params,
        };

        let exchange = async {
            link.send(server_id, message).await?;
            match rx.await {
                Ok(outcome) => outcome,
                Err(_) => Err(ToolError::connection_lost(server_id, "request abandoned")),
            }
        };

        let outcome = match tokio::time::timeout(self.timeout, exchange).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ToolError::ToolTimeout {
                tool: tool.to_owned(),
                after: self.timeout,
            }),
        };

        TraceEvent::ToolInvoked {
            server_id: server_id.to_owned(),
            tool: tool.to_owned(),
            request_id,
            duration_ms: started.elapsed().as_millis() as u64,
            outcome: match &outcome {
                Ok(_) => "ok".to_owned(),
                Err(e) => e.kind().to_owned(),
            },
        }
        .emit();

        outcome
    }

    fn register(
        &self,
        server_id: &str,
        tool: &str,
        request_id: &str,
    ) -> Result<oneshot::Receiver<Result<Value, ToolError>>, ToolError> {
        let mut pending = self.pending.lock();

        if self.limits.global > 0 && pending.len() >= self.limits.global {
            return Err(ToolError::Backpressure(format!(
                "global limit of {} requests reached",
                self.limits.global
            )));
        }
        if self.limits.per_server > 0 {
            let in_flight = pending
                .values()
                .filter(|p| p.server_id == server_id)
                .count();
            if in_flight >= self.limits.per_server {
                return Err(ToolError::Backpressure(format!(
                    "{in_flight} requests in flight for server {server_id}"
                )));
            }
        }

        let (tx, rx) = oneshot::channel();
        let prev = pending.insert(
            request_id.to_owned(),
            PendingRequest {
                server_id: server_id.to_owned(),
                tool: tool.to_owned(),
                submitted_at: Instant::now(),
                tx,
            },
        );
        debug_assert!(prev.is_none(), "request_id collision: {request_id}");
        Ok(rx)
    }

    /// Deliver a `tool_response`. Returns `false` when no request was waiting
    /// (late reply after timeout, or an id that belongs to another server).
    pub fn complete(
        &self,
        server_id: &str,
        request_id: &str,
        outcome: Result<Value, RemoteError>,
    ) -> bool {
        let entry = {
            let mut pending = self.pending.lock();
            let owner = pending.get(request_id).map(|p| p.server_id.clone());
            match owner {
                Some(owner) if owner != server_id => {
                    tracing::warn!(
                        request_id = %request_id,
                        from = %server_id,
                        owner = %owner,
                        "tool_response from a server that does not own the request"
                    );
                    return false;
                }
                Some(_) => pending.remove(request_id),
                None => None,
            }
        };

        let Some(entry) = entry else {
            tracing::warn!(
                server_id = %server_id,
                request_id = %request_id,
                "dropping tool_response for unknown request"
            );
            return false;
        };

        tracing::debug!(
            server_id = %server_id,
            request_id = %request_id,
            tool = %entry.tool,
            elapsed_ms = entry.submitted_at.elapsed().as_millis() as u64,
            "tool_response matched"
        );

        let outcome = outcome.map_err(|e| ToolError::ToolExecutionError {
            tool: entry.tool.clone(),
            message: e.to_string(),
        });
        let _ = entry.tx.send(outcome);
        true
    }

    /// Reject every pending request of `server_id` with `ConnectionLost`.
    pub fn fail_server(&self, server_id: &str, reason: &str) -> usize {
        let failed: Vec<(String, PendingRequest)> = {
            let mut pending = self.pending.lock();
            let ids: Vec<String> = pending
                .iter()
                .filter(|(_, p)| p.server_id == server_id)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id).map(|p| (id, p)))
                .collect()
        };

        let count = failed.len();
        for (_, request) in failed {
            let _ = request
                .tx
                .send(Err(ToolError::connection_lost(server_id, reason)));
        }
        if count > 0 {
            tracing::warn!(
                server_id = %server_id,
                failed_requests = count,
                reason = %reason,
                "failed in-flight tool requests"
            );
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn pending_for(&self, server_id: &str) -> usize {
        self.pending
            .lock()
            .values()
            .filter(|p| p.server_id == server_id)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    /// Records outgoing frames instead of sending them anywhere.
    struct RecordingLink {
        tx: mpsc::UnboundedSender<(String, WireMessage)>,
        refuse: bool,
    }

    #[async_trait]
    impl MessageLink for RecordingLink {
        async fn send(&self, server_id: &str, message: WireMessage) -> Result<(), ToolError> {
            if self.refuse {
                return Err(ToolError::connection_lost(server_id, "not ready"));
            }
            let _ = self.tx.send((server_id.to_owned(), message));
            Ok(())
        }
    }

    fn link() -> (Arc<RecordingLink>, mpsc::UnboundedReceiver<(String, WireMessage)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(RecordingLink { tx, refuse: false }), rx)
    }

    fn sent_request_id(msg: &WireMessage) -> String {
        msg.request_id().unwrap().to_owned()
    }

    #[tokio::test]
    async fn out_of_order_responses_reach_their_callers() {
        let correlator = Arc::new(RequestCorrelator::new(
            Duration::from_secs(5),
            PendingLimits::default(),
        ));
        let (link, mut sent) = link();

        let c1 = Arc::clone(&correlator);
        let l1 = Arc::clone(&link);
        let first = tokio::spawn(async move { c1.invoke(&*l1, "s", "a", json!({"n": 1})).await });
        let (_, m1) = sent.recv().await.unwrap();

        let c2 = Arc::clone(&correlator);
        let l2 = Arc::clone(&link);
        let second = tokio::spawn(async move { c2.invoke(&*l2, "s", "b", json!({"n": 2})).await });
        let (_, m2) = sent.recv().await.unwrap();

        assert!(correlator.complete("s", &sent_request_id(&m2), Ok(json!("two"))));
        assert!(correlator.complete("s", &sent_request_id(&m1), Ok(json!("one"))));

        assert_eq!(first.await.unwrap().unwrap(), json!("one"));
        assert_eq!(second.await.unwrap().unwrap(), json!("two"));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn remote_error_becomes_execution_error() {
        let correlator = Arc::new(RequestCorrelator::new(
            Duration::from_secs(5),
            PendingLimits::default(),
        ));
        let (link, mut sent) = link();
        let c = Arc::clone(&correlator);
        let task = tokio::spawn(async move { c.invoke(&*link, "s", "lookup", json!({})).await });

        let (_, msg) = sent.recv().await.unwrap();
        correlator.complete(
            "s",
            &sent_request_id(&msg),
            Err(RemoteError {
                message: "bad query".into(),
                code: Some("invalid_args".into()),
            }),
        );

        assert_eq!(
            task.await.unwrap().unwrap_err(),
            ToolError::ToolExecutionError {
                tool: "lookup".into(),
                message: "invalid_args: bad query".into(),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_removes_entry_and_drops_late_reply() {
        let correlator = RequestCorrelator::new(Duration::from_secs(30), PendingLimits::default());
        let (link, mut sent) = link();

        let err = correlator
            .invoke(&*link, "s", "slow", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ToolTimeout { ref tool, after } if tool == "slow" && after == Duration::from_secs(30)));
        assert_eq!(correlator.pending_count(), 0);

        let (_, msg) = sent.recv().await.unwrap();
        assert!(!correlator.complete("s", &sent_request_id(&msg), Ok(json!(1))));
    }

    #[tokio::test]
    async fn fail_server_rejects_only_that_server() {
        let correlator = Arc::new(RequestCorrelator::new(
            Duration::from_secs(5),
            PendingLimits::default(),
        ));
        let (link, mut sent) = link();

        let mut tasks = Vec::new();
        for server in ["a", "a", "b"] {
            let c = Arc::clone(&correlator);
            let l = Arc::clone(&link);
            tasks.push(tokio::spawn(async move { c.invoke(&*l, server, "t", json!({})).await }));
            sent.recv().await.unwrap();
        }
        assert_eq!(correlator.pending_for("a"), 2);

        assert_eq!(correlator.fail_server("a", "transport closed"), 2);
        assert_eq!(correlator.fail_server("a", "transport closed"), 0);
        assert_eq!(correlator.pending_count(), 1);

        let b = tasks.pop().unwrap();
        for task in tasks {
            assert!(matches!(
                task.await.unwrap(),
                Err(ToolError::ConnectionLost { ref server_id, .. }) if server_id == "a"
            ));
        }
        b.abort();
    }

    #[tokio::test]
    async fn send_failure_leaves_nothing_pending() {
        let correlator = RequestCorrelator::new(Duration::from_secs(5), PendingLimits::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let link = RecordingLink { tx, refuse: true };
        let err = correlator.invoke(&link, "s", "t", json!({})).await.unwrap_err();
        assert_eq!(err.kind(), "connection_lost");
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn backpressure_per_server() {
        let correlator = Arc::new(RequestCorrelator::new(
            Duration::from_secs(5),
            PendingLimits {
                per_server: 1,
                global: 0,
            },
        ));
        let (link, mut sent) = link();
        let c = Arc::clone(&correlator);
        let l = Arc::clone(&link);
        let held = tokio::spawn(async move { c.invoke(&*l, "s", "t", json!({})).await });
        sent.recv().await.unwrap();

        let err = correlator.invoke(&*link, "s", "t", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::Backpressure(_)));

        // Another server is unaffected by the per-server bound.
        let c = Arc::clone(&correlator);
        let l = Arc::clone(&link);
        let other = tokio::spawn(async move { c.invoke(&*l, "t", "t", json!({})).await });
        let (_, msg) = sent.recv().await.unwrap();
        correlator.complete("t", &sent_request_id(&msg), Ok(json!(null)));
        assert!(other.await.unwrap().is_ok());
        held.abort();
    }

    #[tokio::test]
    async fn dropped_caller_cleans_up() {
        let correlator = Arc::new(RequestCorrelator::new(
            Duration::from_secs(5),
            PendingLimits::default(),
        ));
        let (link, mut sent) = link();
        let c = Arc::clone(&correlator);
        let task = tokio::spawn(async move { c.invoke(&*link, "s", "t", json!({})).await });
        sent.recv().await.unwrap();
        assert_eq!(correlator.pending_count(), 1);

        task.abort();
        let _ = task.await;
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn response_from_wrong_server_is_ignored() {
        let correlator = Arc::new(RequestCorrelator::new(
            Duration::from_secs(5),
            PendingLimits::default(),
        ));
        let (link, mut sent) = link();
        let c = Arc::clone(&correlator);
        let task = tokio::spawn(async move { c.invoke(&*link, "s", "t", json!({})).await });
        let (_, msg) = sent.recv().await.unwrap();
        let id = sent_request_id(&msg);

        assert!(!correlator.complete("intruder", &id, Ok(json!("spoof"))));
        assert!(correlator.complete("s", &id, Ok(json!("real"))));
        assert_eq!(task.await.unwrap().unwrap(), json!("real"));
    }
}
