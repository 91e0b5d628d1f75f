//! Two-tier agent state: a TTL-bound fast tier in front of the durable store.
//!
//! Full thread state is written through both tiers and read cache-first.
//! Streaming partial state lives only in the fast tier under a shorter TTL
//! until the stream completes.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use tb_cache::FastTier;
use tb_domain::clock::SharedClock;
use tb_domain::config::StateConfig;
use tb_domain::trace::TraceEvent;

use crate::durable::DurableStore;
use crate::error::{validate_thread_id, PersistenceError};
use crate::model::{
    Phase, SaveOptions, StateEnvelope, StateMeta, StreamingState, ThreadState,
};

pub const STATE_KEY_PREFIX: &str = "agent_state:";
pub const STREAMING_KEY_PREFIX: &str = "agent_stream:";

const LOCK_STRIPES: usize = 16;

fn state_key(thread_id: &str) -> String {
    format!("{STATE_KEY_PREFIX}{thread_id}")
}

fn streaming_key(thread_id: &str) -> String {
    format!("{STREAMING_KEY_PREFIX}{thread_id}")
}

#[derive(Debug, Clone, Copy)]
pub struct StateTtls {
    pub state: Duration,
    pub streaming: Duration,
}

impl From<&StateConfig> for StateTtls {
    fn from(cfg: &StateConfig) -> Self {
        Self {
            state: Duration::from_secs(cfg.default_ttl_secs),
            streaming: Duration::from_secs(cfg.streaming_ttl_secs),
        }
    }
}

impl Default for StateTtls {
    fn default() -> Self {
        Self::from(&StateConfig::default())
    }
}

pub struct StatePersistence {
    fast: Arc<dyn FastTier>,
    durable: Arc<dyn DurableStore>,
    clock: SharedClock,
    ttls: StateTtls,
    /// Serializes read-merge-write cycles per thread.
    stripes: Vec<tokio::sync::Mutex<()>>,
}

impl StatePersistence {
    pub fn new(
        fast: Arc<dyn FastTier>,
        durable: Arc<dyn DurableStore>,
        clock: SharedClock,
        ttls: StateTtls,
    ) -> Self {
        Self {
            fast,
            durable,
            clock,
            ttls,
            stripes: (0..LOCK_STRIPES).map(|_| tokio::sync::Mutex::new(())).collect(),
        }
    }

    pub fn ttls(&self) -> StateTtls {
        self.ttls
    }

    fn stripe(&self, thread_id: &str) -> &tokio::sync::Mutex<()> {
        let mut h = DefaultHasher::new();
        thread_id.hash(&mut h);
        &self.stripes[(h.finish() as usize) % LOCK_STRIPES]
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Full thread state
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Cache-first read. A fast-tier miss, outage or corrupt value falls
    /// back to the durable store and repopulates the fast tier.
    pub async fn get_state(&self, thread_id: &str) -> Result<Option<ThreadState>, PersistenceError> {
        validate_thread_id(thread_id)?;
        if let Some(state) = self.read_fast_state(thread_id).await {
            return Ok(Some(state));
        }

        let found = self.durable.get(thread_id).await?;
        TraceEvent::StateDurableFallback {
            thread_id: thread_id.to_owned(),
            found: found.is_some(),
        }
        .emit();

        if let Some(state) = &found {
            self.write_fast_state(state).await.unwrap_or_else(|e| {
                tracing::warn!(thread_id, error = %e, "could not repopulate fast tier");
            });
        }
        Ok(found)
    }

    /// Write-through save of the agent's payload.
    ///
    /// With `is_complete`, the streaming summary (chunk count, duration) is
    /// folded into the metadata and the streaming key is cleared. With
    /// `is_streaming`, a durable failure is logged instead of returned.
    pub async fn save_state(
        &self,
        thread_id: &str,
        payload: Value,
        opts: SaveOptions,
    ) -> Result<ThreadState, PersistenceError> {
        validate_thread_id(thread_id)?;
        let _guard = self.stripe(thread_id).lock().await;
        let now = self.clock.now();

        let previous = self.read_previous(thread_id).await;
        let mut meta = StateMeta {
            phase: Phase::for_save(opts.is_complete, opts.is_streaming),
            last_update: now,
            persisted_at: now,
            chunk_count: previous.as_ref().and_then(|p| p.state.meta.chunk_count),
            duration_ms: previous.as_ref().and_then(|p| p.state.meta.duration_ms),
        };
        if opts.is_complete {
            if let Some(streaming) = self.read_streaming(thread_id).await {
                meta.chunk_count = streaming.chunk_count().or(meta.chunk_count);
                meta.duration_ms = Some(streaming.duration_ms());
            }
        }

        let state = ThreadState {
            thread_id: thread_id.to_owned(),
            conversation_id: opts
                .conversation_id
                .or_else(|| previous.as_ref().and_then(|p| p.conversation_id.clone())),
            state: StateEnvelope { payload, meta },
            is_completed: opts.is_complete,
            ttl_secs: opts.ttl.unwrap_or(self.ttls.state).as_secs(),
            created_at: previous.as_ref().map_or(now, |p| p.created_at),
            updated_at: now,
        };

        let fast_result = self.write_fast_state(&state).await;
        if let Err(e) = &fast_result {
            tracing::warn!(thread_id, error = %e, "fast tier write failed");
        }

        let durable_ok = match self.durable.upsert(&state).await {
            Ok(()) => true,
            Err(e) if opts.is_streaming => {
                tracing::warn!(thread_id, error = %e, "durable checkpoint failed; continuing");
                false
            }
            Err(e) => return Err(e),
        };

        if opts.is_complete {
            if let Err(e) = self.fast.delete(&streaming_key(thread_id)).await {
                tracing::warn!(thread_id, error = %e, "could not clear streaming state");
            }
        }

        TraceEvent::StatePersisted {
            thread_id: thread_id.to_owned(),
            streaming: opts.is_streaming,
            durable: durable_ok,
        }
        .emit();

        match fast_result {
            Err(e) if !opts.is_streaming => Err(e),
            _ => Ok(state),
        }
    }

    /// Removes the thread from both tiers. Returns whether anything existed.
    pub async fn delete_state(&self, thread_id: &str) -> Result<bool, PersistenceError> {
        validate_thread_id(thread_id)?;
        let _guard = self.stripe(thread_id).lock().await;
        let mut removed = false;

        for key in [state_key(thread_id), streaming_key(thread_id)] {
            match self.fast.delete(&key).await {
                Ok(hit) => removed |= hit,
                Err(e) => tracing::warn!(thread_id, error = %e, "fast tier delete failed"),
            }
        }
        match self.durable.delete(thread_id).await {
            Ok(hit) => removed |= hit,
            Err(e) => tracing::warn!(thread_id, error = %e, "durable delete failed"),
        }

        tracing::debug!(thread_id, removed, "thread state deleted");
        Ok(removed)
    }

    /// Every durable thread of a conversation, keyed by thread id.
    pub async fn get_conversation_state(
        &self,
        conversation_id: &str,
    ) -> Result<BTreeMap<String, ThreadState>, PersistenceError> {
        Ok(self
            .durable
            .list_by_conversation(conversation_id)
            .await?
            .into_iter()
            .map(|s| (s.thread_id.clone(), s))
            .collect())
    }

    /// Wipes both tiers. Returns the number of durable records removed.
    pub async fn clear_all_state(&self) -> Result<usize, PersistenceError> {
        for prefix in [STATE_KEY_PREFIX, STREAMING_KEY_PREFIX] {
            if let Err(e) = self.fast.delete_prefix(prefix).await {
                tracing::warn!(prefix, error = %e, "fast tier clear failed");
            }
        }
        let removed = self.durable.clear().await?;
        tracing::info!(removed, "all agent state cleared");
        Ok(removed)
    }

    /// Sorted union of durable ids and ids live in the fast tier.
    pub async fn list_thread_ids(&self) -> Result<Vec<String>, PersistenceError> {
        let mut ids: BTreeSet<String> = self.durable.list_ids().await?.into_iter().collect();
        for prefix in [STATE_KEY_PREFIX, STREAMING_KEY_PREFIX] {
            match self.fast.keys(prefix).await {
                Ok(keys) => ids.extend(
                    keys.iter()
                        .filter_map(|k| k.strip_prefix(prefix))
                        .map(str::to_owned),
                ),
                Err(e) => tracing::warn!(prefix, error = %e, "fast tier listing failed"),
            }
        }
        Ok(ids.into_iter().collect())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Streaming state
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Merge `partial` into the thread's streaming state and return the
    /// merged result.
    ///
    /// Storage failures are logged, never returned; only an invalid thread
    /// id is an error. A partial carrying `"is_complete": true` mirrors the
    /// stream summary into the durable record.
    pub async fn save_streaming_state(
        &self,
        thread_id: &str,
        partial: Map<String, Value>,
    ) -> Result<StreamingState, PersistenceError> {
        validate_thread_id(thread_id)?;
        let _guard = self.stripe(thread_id).lock().await;
        let now = self.clock.now();

        let mut merged = self
            .read_streaming(thread_id)
            .await
            .unwrap_or_else(|| StreamingState::new(thread_id, now));
        merged.merge(partial, now);

        match serde_json::to_string(&merged) {
            Ok(raw) => {
                if let Err(e) = self
                    .fast
                    .set(&streaming_key(thread_id), raw, Some(self.ttls.streaming))
                    .await
                {
                    tracing::warn!(thread_id, error = %e, "streaming state write failed");
                }
            }
            Err(e) => tracing::warn!(thread_id, error = %e, "streaming state not serializable"),
        }

        let mirrored = merged.is_complete() && self.mirror_streaming(&merged).await;
        TraceEvent::StatePersisted {
            thread_id: thread_id.to_owned(),
            streaming: true,
            durable: mirrored,
        }
        .emit();

        Ok(merged)
    }

    /// Fast tier only; absent once the streaming TTL lapses.
    pub async fn get_streaming_state(
        &self,
        thread_id: &str,
    ) -> Result<Option<StreamingState>, PersistenceError> {
        validate_thread_id(thread_id)?;
        Ok(self.read_streaming(thread_id).await)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Internals
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn read_fast_state(&self, thread_id: &str) -> Option<ThreadState> {
        let raw = match self.fast.get(&state_key(thread_id)).await {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(thread_id, error = %e, "fast tier read failed");
                return None;
            }
        };
        let decoded = serde_json::from_str::<ThreadState>(&raw)
            .map_err(|e| e.to_string())
            .and_then(|s| s.check(thread_id).map(|()| s));
        match decoded {
            Ok(state) => Some(state),
            Err(reason) => {
                tracing::warn!(thread_id, %reason, "corrupt fast tier state treated as miss");
                None
            }
        }
    }

    async fn write_fast_state(&self, state: &ThreadState) -> Result<(), PersistenceError> {
        let raw = serde_json::to_string(state)?;
        self.fast
            .set(&state_key(&state.thread_id), raw, Some(state.ttl()))
            .await?;
        Ok(())
    }

    /// Previous record for carrying `created_at` and the conversation id
    /// across saves. Failures only cost that carry-over.
    async fn read_previous(&self, thread_id: &str) -> Option<ThreadState> {
        if let Some(state) = self.read_fast_state(thread_id).await {
            return Some(state);
        }
        match self.durable.get(thread_id).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(thread_id, error = %e, "previous state unreadable");
                None
            }
        }
    }

    async fn read_streaming(&self, thread_id: &str) -> Option<StreamingState> {
        let raw = match self.fast.get(&streaming_key(thread_id)).await {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(thread_id, error = %e, "streaming state read failed");
                return None;
            }
        };
        match serde_json::from_str::<StreamingState>(&raw) {
            Ok(s) if s.thread_id == thread_id => Some(s),
            Ok(_) => {
                tracing::warn!(thread_id, "streaming state belongs to another thread");
                None
            }
            Err(e) => {
                tracing::warn!(thread_id, error = %e, "corrupt streaming state treated as miss");
                None
            }
        }
    }

    /// Fold a finished stream into the durable record. An existing record
    /// keeps its payload and gains the summary; otherwise the streamed
    /// fields become the payload of a new in-progress record.
    async fn mirror_streaming(&self, streaming: &StreamingState) -> bool {
        let thread_id = streaming.thread_id.as_str();
        let now = self.clock.now();

        let existing = match self.durable.get(thread_id).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(thread_id, error = %e, "streaming mirror skipped");
                return false;
            }
        };
        let record = match existing {
            Some(mut record) => {
                record.state.meta.chunk_count = streaming.chunk_count();
                record.state.meta.duration_ms = Some(streaming.duration_ms());
                record.state.meta.persisted_at = now;
                record.updated_at = now.max(record.created_at);
                record
            }
            None => ThreadState {
                thread_id: thread_id.to_owned(),
                conversation_id: None,
                state: StateEnvelope {
                    payload: Value::Object(streaming.fields.clone()),
                    meta: StateMeta {
                        phase: Phase::Streaming,
                        last_update: streaming.updated_at,
                        persisted_at: now,
                        chunk_count: streaming.chunk_count(),
                        duration_ms: Some(streaming.duration_ms()),
                    },
                },
                is_completed: false,
                ttl_secs: self.ttls.state.as_secs(),
                created_at: streaming.started_at.min(now),
                updated_at: now,
            },
        };

        match self.durable.upsert(&record).await {
            Ok(()) => {
                // The fast copy would otherwise serve the pre-mirror record.
                if let Err(e) = self.fast.delete(&state_key(thread_id)).await {
                    tracing::warn!(thread_id, error = %e, "stale fast tier state not cleared");
                }
                true
            }
            Err(e) => {
                tracing::warn!(thread_id, error = %e, "streaming mirror failed");
                false
            }
        }
    }
}
