//! Persisted shapes: full thread state and transient streaming state.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Thread state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Regular save while the thread is still open.
    Checkpoint,
    /// Captured mid-stream, before the agent finished producing output.
    Streaming,
    Complete,
}

impl Phase {
    pub fn for_save(is_complete: bool, is_streaming: bool) -> Self {
        match (is_complete, is_streaming) {
            (true, _) => Phase::Complete,
            (false, true) => Phase::Streaming,
            (false, false) => Phase::Checkpoint,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMeta {
    pub phase: Phase,
    pub last_update: DateTime<Utc>,
    pub persisted_at: DateTime<Utc>,
    /// Folded in from the streaming state on completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Agent-owned payload plus the metadata the persistence layer maintains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEnvelope {
    pub payload: Value,
    pub meta: StateMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadState {
    pub thread_id: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub state: StateEnvelope,
    pub is_completed: bool,
    pub ttl_secs: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ThreadState {
    /// Structural checks applied whenever a record is read back.
    pub fn check(&self, expected_id: &str) -> Result<(), String> {
        if self.thread_id != expected_id {
            return Err(format!(
                "record belongs to thread {:?}",
                self.thread_id
            ));
        }
        if self.is_completed != (self.state.meta.phase == Phase::Complete) {
            return Err("is_completed disagrees with meta.phase".into());
        }
        if self.updated_at < self.created_at {
            return Err("updated_at precedes created_at".into());
        }
        Ok(())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Options for [`StatePersistence::save_state`](crate::StatePersistence::save_state).
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    /// Groups threads; kept from the previous save when `None`.
    pub conversation_id: Option<String>,
    /// Marks the thread complete and folds in the streaming summary.
    pub is_complete: bool,
    /// Fast-tier TTL. Defaults to the configured state TTL.
    pub ttl: Option<Duration>,
    /// Checkpoint taken mid-stream: the durable write becomes best-effort.
    pub is_streaming: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Partial output accumulated while a response streams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingState {
    pub thread_id: String,
    pub fields: Map<String, Value>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StreamingState {
    pub fn new(thread_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            thread_id: thread_id.into(),
            fields: Map::new(),
            started_at: now,
            updated_at: now,
        }
    }

    /// Shallow merge: incoming values win, absent fields are kept.
    pub fn merge(&mut self, partial: Map<String, Value>, now: DateTime<Utc>) {
        for (key, value) in partial {
            self.fields.insert(key, value);
        }
        self.updated_at = now;
    }

    /// Explicit `chunk_count`, else the length of a `chunks` array.
    pub fn chunk_count(&self) -> Option<u64> {
        self.fields
            .get("chunk_count")
            .and_then(Value::as_u64)
            .or_else(|| {
                self.fields
                    .get("chunks")
                    .and_then(Value::as_array)
                    .map(|c| c.len() as u64)
            })
    }

    /// Explicit `duration_ms`, else wall time between first and last write.
    pub fn duration_ms(&self) -> u64 {
        self.fields
            .get("duration_ms")
            .and_then(Value::as_u64)
            .unwrap_or_else(|| {
                (self.updated_at - self.started_at)
                    .num_milliseconds()
                    .max(0) as u64
            })
    }

    pub fn is_complete(&self) -> bool {
        self.fields
            .get("is_complete")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn merge_is_additive() {
        let t0 = Utc::now();
        let mut s = StreamingState::new("t1", t0);
        s.merge(obj(json!({"chunks": ["a"], "content": "a"})), t0);
        s.merge(
            obj(json!({"content": "ab"})),
            t0 + chrono::Duration::milliseconds(40),
        );

        assert_eq!(s.fields["chunks"], json!(["a"]));
        assert_eq!(s.fields["content"], json!("ab"));
        assert_eq!(s.chunk_count(), Some(1));
        assert_eq!(s.duration_ms(), 40);
        assert!(!s.is_complete());
    }

    #[test]
    fn explicit_summary_fields_win() {
        let mut s = StreamingState::new("t1", Utc::now());
        s.merge(
            obj(json!({"chunks": [1, 2, 3], "chunk_count": 7, "duration_ms": 1200, "is_complete": true})),
            Utc::now(),
        );
        assert_eq!(s.chunk_count(), Some(7));
        assert_eq!(s.duration_ms(), 1200);
        assert!(s.is_complete());
    }

    #[test]
    fn check_rejects_inconsistent_records() {
        let now = Utc::now();
        let mut state = ThreadState {
            thread_id: "t1".into(),
            conversation_id: None,
            state: StateEnvelope {
                payload: json!({}),
                meta: StateMeta {
                    phase: Phase::Complete,
                    last_update: now,
                    persisted_at: now,
                    chunk_count: None,
                    duration_ms: None,
                },
            },
            is_completed: true,
            ttl_secs: 60,
            created_at: now,
            updated_at: now,
        };
        assert!(state.check("t1").is_ok());
        assert!(state.check("t2").is_err());

        state.is_completed = false;
        assert!(state.check("t1").is_err());
    }

    #[test]
    fn envelope_wire_shape() {
        let now = Utc::now();
        let meta = StateMeta {
            phase: Phase::Streaming,
            last_update: now,
            persisted_at: now,
            chunk_count: None,
            duration_ms: None,
        };
        let v = serde_json::to_value(&meta).unwrap();
        assert_eq!(v["phase"], json!("streaming"));
        assert!(v.get("chunk_count").is_none());
    }

    #[test]
    fn phase_records_capture_mode() {
        assert_eq!(Phase::for_save(false, false), Phase::Checkpoint);
        assert_eq!(Phase::for_save(false, true), Phase::Streaming);
        assert_eq!(Phase::for_save(true, true), Phase::Complete);
        assert_eq!(serde_json::to_value(Phase::Checkpoint).unwrap(), json!("checkpoint"));
    }
}
