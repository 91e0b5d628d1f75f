//! Agent state persistence over a fast TTL tier and a durable store.

pub mod durable;
pub mod error;
pub mod model;
pub mod persistence;

pub use durable::{DurableStore, FileStore, MemoryStore};
pub use error::{validate_thread_id, PersistenceError};
pub use model::{Phase, SaveOptions, StateEnvelope, StateMeta, StreamingState, ThreadState};
pub use persistence::{StatePersistence, StateTtls, STATE_KEY_PREFIX, STREAMING_KEY_PREFIX};
