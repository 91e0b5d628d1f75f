//! Durable tier: the authoritative record of every thread's state.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::PersistenceError;
use crate::model::ThreadState;

/// Storage that survives process restarts.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Insert or replace the record for `state.thread_id`.
    async fn upsert(&self, state: &ThreadState) -> Result<(), PersistenceError>;

    async fn get(&self, thread_id: &str) -> Result<Option<ThreadState>, PersistenceError>;

    /// Returns whether a record existed.
    async fn delete(&self, thread_id: &str) -> Result<bool, PersistenceError>;

    async fn list_by_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<ThreadState>, PersistenceError>;

    /// Every stored thread id, sorted.
    async fn list_ids(&self) -> Result<Vec<String>, PersistenceError>;

    /// Remove every record. Returns how many were removed.
    async fn clear(&self) -> Result<usize, PersistenceError>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Process-local durable tier for tests and throwaway deployments.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<String, ThreadState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn upsert(&self, state: &ThreadState) -> Result<(), PersistenceError> {
        self.records
            .write()
            .insert(state.thread_id.clone(), state.clone());
        Ok(())
    }

    async fn get(&self, thread_id: &str) -> Result<Option<ThreadState>, PersistenceError> {
        Ok(self.records.read().get(thread_id).cloned())
    }

    async fn delete(&self, thread_id: &str) -> Result<bool, PersistenceError> {
        Ok(self.records.write().remove(thread_id).is_some())
    }

    async fn list_by_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<ThreadState>, PersistenceError> {
        Ok(self
            .records
            .read()
            .values()
            .filter(|s| s.conversation_id.as_deref() == Some(conversation_id))
            .cloned()
            .collect())
    }

    async fn list_ids(&self) -> Result<Vec<String>, PersistenceError> {
        Ok(self.records.read().keys().cloned().collect())
    }

    async fn clear(&self) -> Result<usize, PersistenceError> {
        let mut records = self.records.write();
        let n = records.len();
        records.clear();
        Ok(n)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// File store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One JSON document per thread under `<state_path>/threads/`.
///
/// Writes go to a temp file in the same directory and are renamed into
/// place, so a crash never leaves a half-written record behind.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(state_path: &Path) -> Result<Self, PersistenceError> {
        let dir = state_path.join("threads");
        std::fs::create_dir_all(&dir)?;
        tracing::info!(dir = %dir.display(), "file state store ready");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, thread_id: &str) -> PathBuf {
        self.dir.join(format!("{thread_id}.json"))
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, PersistenceError>
    where
        T: Send + 'static,
        F: FnOnce(PathBuf) -> Result<T, PersistenceError> + Send + 'static,
    {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || f(dir))
            .await
            .map_err(|e| PersistenceError::Durable(format!("blocking task failed: {e}")))?
    }
}

fn read_record(path: &Path, thread_id: &str) -> Result<Option<ThreadState>, PersistenceError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let state: ThreadState =
        serde_json::from_str(&raw).map_err(|e| PersistenceError::Corrupt {
            thread_id: thread_id.to_owned(),
            reason: e.to_string(),
        })?;
    state
        .check(thread_id)
        .map_err(|reason| PersistenceError::Corrupt {
            thread_id: thread_id.to_owned(),
            reason,
        })?;
    Ok(Some(state))
}

/// Thread ids of every `*.json` record in `dir`, sorted.
fn record_ids(dir: &Path) -> Result<Vec<String>, PersistenceError> {
    let mut ids = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            ids.push(stem.to_owned());
        }
    }
    ids.sort();
    Ok(ids)
}

#[async_trait]
impl DurableStore for FileStore {
    async fn upsert(&self, state: &ThreadState) -> Result<(), PersistenceError> {
        let body = serde_json::to_vec_pretty(state)?;
        let path = self.path_for(&state.thread_id);
        self.blocking(move |dir| {
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            tmp.write_all(&body)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
    }

    async fn get(&self, thread_id: &str) -> Result<Option<ThreadState>, PersistenceError> {
        let path = self.path_for(thread_id);
        let thread_id = thread_id.to_owned();
        self.blocking(move |_| read_record(&path, &thread_id)).await
    }

    async fn delete(&self, thread_id: &str) -> Result<bool, PersistenceError> {
        let path = self.path_for(thread_id);
        self.blocking(move |_| match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        })
        .await
    }

    async fn list_by_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<ThreadState>, PersistenceError> {
        let conversation_id = conversation_id.to_owned();
        self.blocking(move |dir| {
            let mut out = Vec::new();
            for id in record_ids(&dir)? {
                match read_record(&dir.join(format!("{id}.json")), &id) {
                    Ok(Some(state))
                        if state.conversation_id.as_deref() == Some(conversation_id.as_str()) =>
                    {
                        out.push(state)
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(thread_id = %id, error = %e, "skipping unreadable state record"),
                }
            }
            Ok(out)
        })
        .await
    }

    async fn list_ids(&self) -> Result<Vec<String>, PersistenceError> {
        self.blocking(|dir| record_ids(&dir)).await
    }

    async fn clear(&self) -> Result<usize, PersistenceError> {
        self.blocking(|dir| {
            let mut removed = 0;
            for id in record_ids(&dir)? {
                match std::fs::remove_file(dir.join(format!("{id}.json"))) {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
            Ok(removed)
        })
        .await
    }
}
