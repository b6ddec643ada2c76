//! Error types for the gamification engine

use thiserror::Error;

/// Errors surfaced by the storage layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("duplicate id: {0}")]
    Duplicate(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("insufficient balance for {user_id}/{category}: have {balance}, need {requested}")]
    InsufficientBalance {
        user_id: String,
        category: String,
        balance: i64,
        requested: i64,
    },

    /// Transient backend failure. The worker retries these with backoff.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Errors surfaced by the engine to callers and workers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("duplicate event id: {0}")]
    DuplicateEventId(String),

    #[error("ingest queue is full")]
    QueueFull,

    #[error("ingest queue is closed")]
    QueueClosed,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("catalog reference missing: {0}")]
    CatalogMissing(String),

    #[error("invalid catalog: {}", .0.join("; "))]
    InvalidCatalog(Vec<String>),

    #[error("insufficient balance for {user_id}/{category}: have {balance}, need {requested}")]
    InsufficientBalance {
        user_id: String,
        category: String,
        balance: i64,
        requested: i64,
    },

    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    /// Whether a worker should retry the event that hit this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Storage(_))
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(id) => EngineError::DuplicateEventId(id),
            StoreError::NotFound(what) => EngineError::NotFound(what),
            StoreError::InsufficientBalance {
                user_id,
                category,
                balance,
                requested,
            } => EngineError::InsufficientBalance {
                user_id,
                category,
                balance,
                requested,
            },
            StoreError::Backend(msg) => EngineError::Storage(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
