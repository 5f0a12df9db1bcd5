use thiserror::Error;

use pagemark_api::ApiError;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Store error: {0}")]
    Store(#[from] pagemark_store::StoreError),

    #[error("Sync error: {0}")]
    Sync(#[from] pagemark_sync::SyncError),

    #[error("API error: {0}")]
    Api(ApiError),

    #[error("Session signed out")]
    SignedOut,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<ApiError> for ServiceError {
    fn from(e: ApiError) -> Self {
        // Auth expiry terminates the outer user flow instead of being
        // absorbed by any fallback.
        match e {
            ApiError::AuthExpired => ServiceError::SignedOut,
            other => ServiceError::Api(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
