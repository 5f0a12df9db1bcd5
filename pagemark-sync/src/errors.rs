//! Error types for sync operations

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Store error: {0}")]
    Store(#[from] pagemark_store::StoreError),

    #[error("API error: {0}")]
    Api(#[from] pagemark_api::ApiError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Queue item not found: {0}")]
    QueueItemNotFound(String),

    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Timed out waiting for: {0}")]
    Timeout(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
