use tb_cache::CacheError;

/// Failures of the state persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("invalid thread id {0:?}")]
    InvalidThreadId(String),

    #[error("durable store: {0}")]
    Durable(String),

    #[error("stored state for {thread_id} is corrupt: {reason}")]
    Corrupt { thread_id: String, reason: String },

    #[error("fast tier: {0}")]
    FastTier(#[from] CacheError),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl From<PersistenceError> for tb_domain::Error {
    fn from(e: PersistenceError) -> Self {
        tb_domain::Error::Persistence(e.to_string())
    }
}

/// Thread ids double as file names and fast-tier key suffixes.
pub fn validate_thread_id(thread_id: &str) -> Result<(), PersistenceError> {
    let valid = !thread_id.is_empty()
        && thread_id.len() <= 200
        && !thread_id.starts_with('.')
        && thread_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(PersistenceError::InvalidThreadId(thread_id.to_owned()))
    }
}
