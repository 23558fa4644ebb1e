#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Item not found: {0}")]
    NotFound(String),

    #[error("Item already exists: {0}")]
    AlreadyExists(String),

    #[error("Version conflict for {entity}: expected {expected}, got {got}")]
    VersionConflict {
        entity: String,
        expected: u64,
        got: u64,
    },

    #[error("Idempotency violation: {0} exists with different content")]
    IdempotencyViolation(String),

    #[error("Retry budget exhausted for entry {0}")]
    RetryExhausted(String),

    #[error("Invalid state transition for {id}: {detail}")]
    InvalidTransition { id: String, detail: String },

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
