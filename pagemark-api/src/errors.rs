//! Error taxonomy for the remote API boundary
//!
//! The sync engine and facade branch on error *class*, not on message
//! text: transient failures are absorbed by backoff and offline
//! fallback, conflicts and not-founds have success-equivalent handling,
//! everything else surfaces verbatim.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Authentication expired")]
    AuthExpired,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation failed ({status}): {message}")]
    Validation { status: u16, message: String },

    #[error("Invalid base URL: {0}")]
    InvalidUrl(String),

    #[error("Unexpected response body: {0}")]
    Decode(String),
}

impl ApiError {
    /// Build the error class for a non-success HTTP status.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 | 403 => ApiError::AuthExpired,
            404 => ApiError::NotFound(message),
            409 => ApiError::Conflict(message),
            400..=499 => ApiError::Validation { status, message },
            _ => ApiError::Server { status, message },
        }
    }

    /// Transient failures are retried by the engine's backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiError::Transport(_) | ApiError::Timeout(_) | ApiError::Server { .. }
        )
    }

    /// Network-class failures flip the facade to its offline path.
    ///
    /// Same set as [`is_transient`](Self::is_transient) today; kept
    /// separate because the facade additionally consults the probe.
    pub fn is_network_class(&self) -> bool {
        self.is_transient()
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout(e.to_string())
        } else if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else {
            ApiError::Transport(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(
            ApiError::from_status(401, String::new()),
            ApiError::AuthExpired
        ));
        assert!(matches!(
            ApiError::from_status(403, String::new()),
            ApiError::AuthExpired
        ));
        assert!(matches!(
            ApiError::from_status(404, String::new()),
            ApiError::NotFound(_)
        ));
        assert!(matches!(
            ApiError::from_status(409, String::new()),
            ApiError::Conflict(_)
        ));
        assert!(matches!(
            ApiError::from_status(422, String::new()),
            ApiError::Validation { status: 422, .. }
        ));
        assert!(matches!(
            ApiError::from_status(503, String::new()),
            ApiError::Server { status: 503, .. }
        ));
    }

    #[test]
    fn transience_follows_class() {
        assert!(ApiError::Transport("reset".into()).is_transient());
        assert!(ApiError::Timeout("10s".into()).is_transient());
        assert!(ApiError::Server {
            status: 503,
            message: String::new()
        }
        .is_transient());

        assert!(!ApiError::Conflict("dup".into()).is_transient());
        assert!(!ApiError::NotFound("gone".into()).is_transient());
        assert!(!ApiError::AuthExpired.is_transient());
        assert!(!ApiError::Validation {
            status: 400,
            message: String::new()
        }
        .is_transient());
    }
}
