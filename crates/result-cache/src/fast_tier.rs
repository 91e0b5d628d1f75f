//! Ephemeral key/value tier with per-key expiry.
//!
//! Expired keys are invisible to reads but stay in memory until
//! [`FastTier::purge_expired`] sweeps them.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use tb_domain::clock::{expiry_after, SharedClock};

/// Errors raised by a fast-tier backend.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("fast tier unavailable: {0}")]
    Unavailable(String),

    #[error("fast tier value for {key} is not valid: {reason}")]
    Corrupt { key: String, reason: String },
}

impl From<CacheError> for tb_domain::Error {
    fn from(e: CacheError) -> Self {
        tb_domain::Error::Cache(e.to_string())
    }
}

/// Atomic get/set/delete operations over string values.
///
/// Every operation is a suspension point so networked backends can
/// implement it; the in-process [`MemoryFastTier`] never actually waits.
#[async_trait]
pub trait FastTier: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Write only when no live value exists. Returns whether the write happened.
    async fn set_if_absent(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError>;

    /// Returns whether a live value was removed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Live keys starting with `prefix`.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, CacheError>;

    /// Remove every key (live or expired) starting with `prefix`.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize, CacheError>;

    /// Drop expired keys. Returns how many were dropped.
    async fn purge_expired(&self) -> Result<usize, CacheError>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Slot {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Slot {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Process-local fast tier.
pub struct MemoryFastTier {
    entries: RwLock<HashMap<String, Slot>>,
    clock: SharedClock,
}

impl MemoryFastTier {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Number of stored keys including expired ones not yet purged.
    pub fn raw_len(&self) -> usize {
        self.entries.read().len()
    }

    /// Drop everything. Simulates a cache flush or restart.
    pub fn flush(&self) {
        self.entries.write().clear();
    }

    fn slot(&self, value: String, ttl: Option<Duration>) -> Slot {
        Slot {
            value,
            expires_at: ttl.map(|ttl| expiry_after(self.clock.now(), ttl)),
        }
    }
}

#[async_trait]
impl FastTier for MemoryFastTier {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = self.clock.now();
        Ok(self
            .entries
            .read()
            .get(key)
            .filter(|slot| slot.is_live(now))
            .map(|slot| slot.value.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), CacheError> {
        let slot = self.slot(value, ttl);
        self.entries.write().insert(key.to_owned(), slot);
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError> {
        let now = self.clock.now();
        let slot = self.slot(value, ttl);
        let mut entries = self.entries.write();
        if entries.get(key).is_some_and(|existing| existing.is_live(now)) {
            return Ok(false);
        }
        entries.insert(key.to_owned(), slot);
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let now = self.clock.now();
        Ok(self
            .entries
            .write()
            .remove(key)
            .is_some_and(|slot| slot.is_live(now)))
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        let now = self.clock.now();
        let mut keys: Vec<String> = self
            .entries
            .read()
            .iter()
            .filter(|(k, slot)| k.starts_with(prefix) && slot.is_live(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        Ok(before - entries.len())
    }

    async fn purge_expired(&self) -> Result<usize, CacheError> {
        let now = self.clock.now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, slot| slot.is_live(now));
        let purged = before - entries.len();
        if purged > 0 {
            tracing::debug!(purged, remaining = entries.len(), "purged expired fast-tier keys");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tb_domain::ManualClock;

    fn tier() -> (Arc<ManualClock>, MemoryFastTier) {
        let clock = ManualClock::starting_now();
        let tier = MemoryFastTier::new(clock.clone());
        (clock, tier)
    }

    #[tokio::test]
    async fn expired_keys_are_hidden_but_kept() {
        let (clock, tier) = tier();
        tier.set("k", "v".into(), Some(Duration::from_secs(10)))
            .await
            .unwrap();
        assert_eq!(tier.get("k").await.unwrap().as_deref(), Some("v"));

        clock.advance(Duration::from_secs(11));
        assert!(tier.get("k").await.unwrap().is_none());
        assert_eq!(tier.raw_len(), 1);

        assert_eq!(tier.purge_expired().await.unwrap(), 1);
        assert_eq!(tier.raw_len(), 0);
    }

    #[tokio::test]
    async fn set_if_absent_respects_live_values() {
        let (clock, tier) = tier();
        let ttl = Some(Duration::from_secs(5));
        assert!(tier.set_if_absent("k", "first".into(), ttl).await.unwrap());
        assert!(!tier.set_if_absent("k", "second".into(), ttl).await.unwrap());
        assert_eq!(tier.get("k").await.unwrap().as_deref(), Some("first"));

        clock.advance(Duration::from_secs(6));
        assert!(tier.set_if_absent("k", "third".into(), ttl).await.unwrap());
        assert_eq!(tier.get("k").await.unwrap().as_deref(), Some("third"));
    }

    #[tokio::test]
    async fn keys_and_delete_prefix() {
        let (_clock, tier) = tier();
        for key in ["state:a", "state:b", "other:c"] {
            tier.set(key, "{}".into(), None).await.unwrap();
        }
        assert_eq!(tier.keys("state:").await.unwrap(), vec!["state:a", "state:b"]);
        assert_eq!(tier.delete_prefix("state:").await.unwrap(), 2);
        assert_eq!(tier.keys("").await.unwrap(), vec!["other:c"]);
    }

    #[tokio::test]
    async fn delete_reports_live_removal_only() {
        let (clock, tier) = tier();
        tier.set("k", "v".into(), Some(Duration::from_secs(1)))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(2));
        assert!(!tier.delete("k").await.unwrap());
        assert!(!tier.delete("missing").await.unwrap());
    }
}
