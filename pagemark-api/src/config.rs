//! Client configuration

use std::time::Duration;

/// Configuration for the remote API client.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL including the `/api/v1` prefix.
    pub base_url: String,
    /// Applies to every request except the health probes.
    pub request_timeout: Duration,
    /// HEAD /health deadline.
    pub local_probe_timeout: Duration,
    /// GET /health/aladin deadline.
    pub external_probe_timeout: Duration,
    /// Bearer token, when the session is authenticated.
    pub auth_token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api/v1".to_string(),
            request_timeout: Duration::from_secs(10),
            local_probe_timeout: Duration::from_secs(3),
            external_probe_timeout: Duration::from_secs(5),
            auth_token: None,
        }
    }
}

impl ApiConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }
}
