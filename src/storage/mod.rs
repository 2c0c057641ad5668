use thiserror::Error;

pub mod queue;
pub mod recorder;
pub mod seed;
pub mod state;

pub use queue::UndoQueue;
pub use recorder::OrderRecorder;
pub use state::RedisStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("key not found: {0}")]
    NotFound(String),

    #[error("optimistic lock contention after {0} attempts")]
    Contention(u32),

    #[error("invalid state transition: {0}")]
    Invalid(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
