//! Tool execution facade: the single entry point the agent loop uses to
//! discover and call remote tools.
//!
//! Calls consult the result cache first and only reach the wire on a miss.
//! Whether a tool's results are cached is decided per tool: an operator
//! override in `[cache.tools]` wins, then what the server declared in its
//! handshake, then `cache.default_cacheable`.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use tb_cache::ResultCache;
use tb_connections::{ConnectionManager, LifecycleState, ServerStatus, ToolError};
use tb_domain::config::CacheConfig;
use tb_protocol::ToolSpec;

/// A tool as presented to the agent loop.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub server_id: String,
    pub description: String,
    pub input_schema: Value,
    pub cacheable: bool,
}

/// Result of a successful invocation.
#[derive(Debug, Clone, Serialize)]
pub struct ToolOutput {
    pub tool: String,
    pub server_id: String,
    pub result: Value,
    /// Served from the result cache without touching the server.
    pub cached: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CachePolicy {
    cacheable: bool,
    ttl: Option<Duration>,
}

pub struct ToolExecutor {
    connections: Arc<ConnectionManager>,
    cache: Arc<ResultCache>,
    cache_config: CacheConfig,
}

impl ToolExecutor {
    pub fn new(
        connections: Arc<ConnectionManager>,
        cache: Arc<ResultCache>,
        cache_config: CacheConfig,
    ) -> Self {
        Self {
            connections,
            cache,
            cache_config,
        }
    }

    /// Every tool advertised by a ready server, in registration order.
    pub fn list_tools(&self) -> Vec<ToolInfo> {
        self.connections
            .list_tools()
            .into_iter()
            .map(|t| {
                let cacheable = self.policy(&t.spec.name, Some(&t.spec)).cacheable;
                ToolInfo {
                    name: t.spec.name,
                    server_id: t.server_id,
                    description: t.spec.description,
                    input_schema: t.spec.input_schema,
                    cacheable,
                }
            })
            .collect()
    }

    /// Invoke `tool` on whichever ready server advertises it.
    pub async fn invoke_tool(&self, tool: &str, params: Value) -> Result<ToolOutput, ToolError> {
        let remote = self
            .connections
            .resolve_tool(tool)
            .ok_or_else(|| ToolError::UnknownTool(tool.to_owned()))?;
        self.execute(&remote.server_id, tool, Some(remote.spec), params)
            .await
    }

    /// Invoke `tool` on a specific server.
    pub async fn invoke_on(
        &self,
        server_id: &str,
        tool: &str,
        params: Value,
    ) -> Result<ToolOutput, ToolError> {
        let state = self
            .connections
            .state(server_id)
            .ok_or_else(|| ToolError::UnknownServer(server_id.to_owned()))?;
        let spec = self.connections.tool_spec(server_id, tool);
        if spec.is_none() && state == LifecycleState::Ready {
            return Err(ToolError::UnknownTool(tool.to_owned()));
        }
        self.execute(server_id, tool, spec, params).await
    }

    pub fn status(&self) -> Vec<ServerStatus> {
        self.connections.status()
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    async fn execute(
        &self,
        server_id: &str,
        tool: &str,
        spec: Option<ToolSpec>,
        params: Value,
    ) -> Result<ToolOutput, ToolError> {
        let policy = self.policy(tool, spec.as_ref());

        if policy.cacheable {
            if let Some(entry) = self.cache.get(tool, &params).await {
                return Ok(ToolOutput {
                    tool: tool.to_owned(),
                    server_id: server_id.to_owned(),
                    result: entry.result,
                    cached: true,
                });
            }
        }

        let result = self
            .connections
            .invoke(server_id, tool, params.clone())
            .await?;

        if policy.cacheable {
            self.cache
                .put(tool, &params, result.clone(), policy.ttl)
                .await;
        }

        Ok(ToolOutput {
            tool: tool.to_owned(),
            server_id: server_id.to_owned(),
            result,
            cached: false,
        })
    }

    fn policy(&self, tool: &str, spec: Option<&ToolSpec>) -> CachePolicy {
        let overrides = self.cache_config.tools.get(tool);
        let cacheable = overrides
            .and_then(|o| o.cacheable)
            .or_else(|| spec.and_then(|s| s.cacheable))
            .unwrap_or(self.cache_config.default_cacheable);
        let ttl = overrides
            .and_then(|o| o.ttl_secs)
            .or_else(|| spec.and_then(|s| s.cache_ttl_secs))
            .map(Duration::from_secs);
        CachePolicy { cacheable, ttl }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;
    use tokio::sync::mpsc;

    use tb_cache::MemoryFastTier;
    use tb_connections::{ManagerSettings, MemoryConnector, ServerEnd};
    use tb_domain::config::{ServerDescriptor, ToolCachePolicy};
    use tb_domain::ManualClock;
    use tb_protocol::WireMessage;

    const WAIT: Duration = Duration::from_secs(10);

    struct Harness {
        executor: ToolExecutor,
        clock: Arc<ManualClock>,
        calls: Arc<AtomicUsize>,
    }

    fn tools() -> Vec<ToolSpec> {
        let mut no_cache = ToolSpec::new("now");
        no_cache.cacheable = Some(false);
        let mut short = ToolSpec::new("quote");
        short.cache_ttl_secs = Some(60);
        vec![ToolSpec::new("lookup"), no_cache, short]
    }

    fn serve(mut accept: mpsc::UnboundedReceiver<ServerEnd>, calls: Arc<AtomicUsize>) {
        tokio::spawn(async move {
            while let Some(mut end) = accept.recv().await {
                let calls = calls.clone();
                tokio::spawn(async move {
                    if !end.accept_handshake(tools()).await {
                        return;
                    }
                    while let Some(msg) = end.recv().await {
                        if let WireMessage::ExecuteTool {
                            request_id, params, ..
                        } = msg
                        {
                            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                            end.send(&WireMessage::ToolResponse {
                                request_id,
                                result: Some(json!({ "call": n, "params": params })),
                                error: None,
                            })
                            .await;
                        }
                    }
                });
            }
        });
    }

    async fn harness(cache_config: CacheConfig) -> Harness {
        let (connector, accept) = MemoryConnector::new();
        let calls = Arc::new(AtomicUsize::new(0));
        serve(accept, calls.clone());

        let manager = ConnectionManager::new(Arc::new(connector), ManagerSettings::default());
        manager.register(ServerDescriptor::new("search", "ws://search"));
        manager.connect("search").unwrap();
        assert!(manager.wait_for_state("search", LifecycleState::Ready, WAIT).await);

        let clock = ManualClock::starting_now();
        let cache = Arc::new(ResultCache::new(
            Arc::new(MemoryFastTier::new(clock.clone())),
            clock.clone(),
            Duration::from_secs(cache_config.default_ttl_secs),
        ));
        Harness {
            executor: ToolExecutor::new(manager, cache, cache_config),
            clock,
            calls,
        }
    }

    #[tokio::test]
    async fn second_call_is_served_from_cache() {
        let h = harness(CacheConfig::default()).await;

        let first = h.executor.invoke_tool("lookup", json!({"q": "x"})).await.unwrap();
        let second = h.executor.invoke_tool("lookup", json!({"q": "x"})).await.unwrap();

        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(first.result, second.result);
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_entry_triggers_exactly_one_refresh() {
        let h = harness(CacheConfig::default()).await;

        h.executor.invoke_on("search", "quote", json!({"s": "ACME"})).await.unwrap();
        h.clock.advance(Duration::from_secs(61));

        let refreshed = h.executor.invoke_on("search", "quote", json!({"s": "ACME"})).await.unwrap();
        assert!(!refreshed.cached);
        let again = h.executor.invoke_on("search", "quote", json!({"s": "ACME"})).await.unwrap();
        assert!(again.cached);
        assert_eq!(again.result["call"], json!(2));
        assert_eq!(h.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn declared_uncacheable_tool_always_reaches_the_server() {
        let h = harness(CacheConfig::default()).await;

        for _ in 0..3 {
            let out = h.executor.invoke_tool("now", json!({})).await.unwrap();
            assert!(!out.cached);
        }
        assert_eq!(h.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn operator_override_beats_declaration() {
        let mut cfg = CacheConfig::default();
        cfg.tools.insert(
            "now".into(),
            ToolCachePolicy {
                cacheable: Some(true),
                ttl_secs: None,
            },
        );
        cfg.tools.insert(
            "lookup".into(),
            ToolCachePolicy {
                cacheable: Some(false),
                ttl_secs: None,
            },
        );
        let h = harness(cfg).await;

        h.executor.invoke_tool("now", json!({})).await.unwrap();
        assert!(h.executor.invoke_tool("now", json!({})).await.unwrap().cached);
        h.executor.invoke_tool("lookup", json!({})).await.unwrap();
        assert!(!h.executor.invoke_tool("lookup", json!({})).await.unwrap().cached);

        let listed: Vec<(String, bool)> = h
            .executor
            .list_tools()
            .into_iter()
            .map(|t| (t.name, t.cacheable))
            .collect();
        assert_eq!(
            listed,
            [
                ("lookup".to_string(), false),
                ("now".to_string(), true),
                ("quote".to_string(), true)
            ]
        );
    }

    #[tokio::test]
    async fn unknown_names_are_rejected() {
        let h = harness(CacheConfig::default()).await;

        assert_eq!(
            h.executor.invoke_tool("nope", json!({})).await.unwrap_err(),
            ToolError::UnknownTool("nope".into())
        );
        assert_eq!(
            h.executor.invoke_on("search", "nope", json!({})).await.unwrap_err(),
            ToolError::UnknownTool("nope".into())
        );
        assert_eq!(
            h.executor.invoke_on("ghost", "lookup", json!({})).await.unwrap_err(),
            ToolError::UnknownServer("ghost".into())
        );
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    }
}
