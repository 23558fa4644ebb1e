use thiserror::Error;

/// Umbrella error for the propagation core.
#[derive(Error, Debug)]
pub enum PropagationError {
    #[error("ChangeSet error: {0}")]
    ChangeSet(#[from] ChangeSetError),

    #[error("Impact error: {0}")]
    Impact(#[from] ImpactError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Outbox error: {0}")]
    Outbox(#[from] OutboxError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Webhook error: {0}")]
    Webhook(#[from] WebhookError),

    #[error("Storage error: {0}")]
    Storage(#[from] ivm_storage::StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ivm_models::ValidationError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Error, Debug)]
pub enum ChangeSetError {
    #[error("A mutation needs at least one payload side")]
    NoPayloads,

    #[error("Version conflict: expected {expected}, got {got}")]
    VersionConflict { expected: u64, got: u64 },

    #[error("Invalid mutation: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum ImpactError {
    /// Fail-closed: the contract must cover every changed path, otherwise
    /// nothing is mapped and the mutation is rejected whole.
    #[error("Unmapped change paths: {}", .0.join(", "))]
    UnmappedPaths(Vec<String>),

    #[error("Contract {key} has status {status:?} and cannot drive impact")]
    ContractStatus {
        key: String,
        status: ivm_models::ContractStatus,
    },

    #[error("Contract {0} carries an empty impact map")]
    EmptyImpactMap(String),
}

/// Cloneable so single-flight followers can receive the leader's outcome.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Contract not found: {0}")]
    NotFound(String),

    #[error("Checksum mismatch for {key}: stored {stored}, computed {computed}")]
    ChecksumMismatch {
        key: String,
        stored: String,
        computed: String,
    },

    #[error("Contract load failed for {key}: {detail}")]
    LoadFailed { key: String, detail: String },

    #[error("Contract load timed out for {0}")]
    Timeout(String),
}

#[derive(Error, Debug)]
pub enum OutboxError {
    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Entry {0} exhausted its retry budget; use dead-letter replay")]
    RetryExhausted(String),

    #[error("Entry {id} cannot transition: {detail}")]
    InvalidTransition { id: String, detail: String },

    #[error("Storage error: {0}")]
    Storage(#[from] ivm_storage::StorageError),
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Unknown sink: {0}")]
    UnknownSink(String),

    #[error("Sink {sink} rejected {key}: {detail}")]
    Rejected {
        sink: String,
        key: String,
        detail: String,
    },

    #[error("Sink {0} is unavailable")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("Webhook not found: {0}")]
    NotFound(String),

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Delivery failed with status {0}")]
    Status(u16),

    #[error("Delivery rate limited")]
    RateLimited,

    #[error("Circuit open for webhook {0}")]
    CircuitOpen(String),

    #[error("Retries exhausted after {0} attempts")]
    RetriesExhausted(u32),

    #[error("Delivery timed out")]
    Timeout,

    #[error("Storage error: {0}")]
    Storage(#[from] ivm_storage::StorageError),
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unprocessable: {0}")]
    Unprocessable(String),

    #[error("Internal server error: {0}")]
    InternalServerError(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        use axum::{Json, http::StatusCode};
        use serde_json::json;

        let (status, error_message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Unprocessable(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, msg)
            }
            ApiError::InternalServerError(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
            ApiError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, msg)
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<OutboxError> for ApiError {
    fn from(err: OutboxError) -> Self {
        match &err {
            OutboxError::NotFound(_) => ApiError::NotFound(err.to_string()),
            OutboxError::RetryExhausted(_)
            | OutboxError::InvalidTransition { .. } => {
                ApiError::Conflict(err.to_string())
            }
            OutboxError::Storage(_) => {
                ApiError::InternalServerError(err.to_string())
            }
        }
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        match &err {
            WebhookError::NotFound(_) => ApiError::NotFound(err.to_string()),
            WebhookError::CircuitOpen(_) => {
                ApiError::ServiceUnavailable(err.to_string())
            }
            _ => ApiError::InternalServerError(err.to_string()),
        }
    }
}

impl From<PropagationError> for ApiError {
    fn from(err: PropagationError) -> Self {
        match &err {
            PropagationError::Impact(ImpactError::UnmappedPaths(_))
            | PropagationError::Impact(ImpactError::ContractStatus {
                ..
            }) => ApiError::Unprocessable(err.to_string()),
            PropagationError::Registry(RegistryError::NotFound(_)) => {
                ApiError::Unprocessable(err.to_string())
            }
            PropagationError::Validation(_) => {
                ApiError::BadRequest(err.to_string())
            }
            PropagationError::ChangeSet(ChangeSetError::VersionConflict {
                ..
            }) => ApiError::Conflict(err.to_string()),
            PropagationError::Storage(
                ivm_storage::StorageError::NotFound(_),
            ) => ApiError::NotFound(err.to_string()),
            PropagationError::Storage(
                ivm_storage::StorageError::VersionConflict { .. },
            )
            | PropagationError::Storage(
                ivm_storage::StorageError::IdempotencyViolation(_),
            ) => ApiError::Conflict(err.to_string()),
            _ => ApiError::InternalServerError(err.to_string()),
        }
    }
}
