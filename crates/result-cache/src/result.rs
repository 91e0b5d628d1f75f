//! Tool result cache.
//!
//! Entries are immutable: while an entry is live, [`ResultCache::put`] for
//! the same key is a no-op, so concurrent misses for the same call cannot
//! overwrite each other. An expired entry reads as a miss and stays in the
//! tier until [`ResultCache::sweep_expired`] runs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tb_domain::clock::{expiry_after, SharedClock};
use tb_domain::trace::TraceEvent;

use crate::fast_tier::FastTier;
use crate::key::cache_key;

/// A cached tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub tool: String,
    pub key: String,
    pub result: Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Hit/miss counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
}

/// Result cache over a shared [`FastTier`].
///
/// Backend failures are logged and degrade to misses; the cache never fails
/// a tool call.
pub struct ResultCache {
    tier: Arc<dyn FastTier>,
    clock: SharedClock,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
}

impl ResultCache {
    pub fn new(tier: Arc<dyn FastTier>, clock: SharedClock, default_ttl: Duration) -> Self {
        Self {
            tier,
            clock,
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Look up a live entry for `(tool, params)`.
    pub async fn get(&self, tool: &str, params: &Value) -> Option<CacheEntry> {
        let key = cache_key(tool, params);
        let entry = match self.tier.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<CacheEntry>(&raw) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "discarding unreadable cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "result cache read failed, treating as miss");
                None
            }
        };

        match entry {
            Some(entry) if !entry.is_expired(self.clock.now()) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                TraceEvent::ToolCacheHit {
                    tool: tool.to_owned(),
                    key,
                }
                .emit();
                Some(entry)
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a result. `ttl` of `None` uses the default TTL.
    ///
    /// Returns `false` when a live entry already exists (it is kept), when
    /// the TTL is zero, or when the backend rejected the write.
    pub async fn put(&self, tool: &str, params: &Value, result: Value, ttl: Option<Duration>) -> bool {
        let ttl = ttl.unwrap_or(self.default_ttl);
        if ttl.is_zero() {
            return false;
        }

        let key = cache_key(tool, params);
        let now = self.clock.now();
        let entry = CacheEntry {
            tool: tool.to_owned(),
            key: key.clone(),
            result,
            created_at: now,
            expires_at: expiry_after(now, ttl),
        };
        let raw = match serde_json::to_string(&entry) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(tool = %tool, error = %e, "failed to serialize cache entry");
                return false;
            }
        };

        match self.tier.set_if_absent(&key, raw, Some(ttl)).await {
            Ok(written) => {
                if written {
                    self.writes.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(tool = %tool, ttl_secs = ttl.as_secs(), "cached tool result");
                }
                written
            }
            Err(e) => {
                tracing::warn!(tool = %tool, error = %e, "result cache write failed");
                false
            }
        }
    }

    /// Drop the entry for `(tool, params)` regardless of expiry.
    pub async fn invalidate(&self, tool: &str, params: &Value) -> bool {
        let key = cache_key(tool, params);
        match self.tier.delete(&key).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "result cache invalidate failed");
                false
            }
        }
    }

    /// Remove expired entries from the backing tier.
    pub async fn sweep_expired(&self) -> usize {
        match self.tier.purge_expired().await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "result cache sweep failed");
                0
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }
}
