/// Shared error type used across all toolbridge crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("connection: {0}")]
    Connection(String),

    #[error("tool: {0}")]
    Tool(String),

    #[error("protocol: {0}")]
    Protocol(String),

    #[error("cache: {0}")]
    Cache(String),

    #[error("persistence: {0}")]
    Persistence(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
