//! Error types for the store and the embedding processor.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("photo not found: {0}")]
    PhotoNotFound(String),

    #[error("database connection lock poisoned")]
    LockPoisoned,
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("embedding worker {worker_id} failed to initialize: {error}")]
    WorkerInit { worker_id: usize, error: String },

    #[error("embedding workers not ready after {0:?}")]
    InitTimeout(Duration),

    #[error("failed to spawn embedding worker: {0}")]
    Spawn(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("store task failed: {0}")]
    StoreTask(#[from] tokio::task::JoinError),
}
