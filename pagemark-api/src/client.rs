//! Core HTTP client and health probes

use reqwest::RequestBuilder;
use tracing::debug;

use crate::config::ApiConfig;
use crate::errors::{ApiError, Result};

/// Header carried by CREATE requests so duplicate replays collapse
/// server-side.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Typed client for the remote reading-journal API.
#[derive(Clone)]
pub struct ApiClient {
    pub(crate) http: reqwest::Client,
    pub(crate) config: ApiConfig,
}

impl ApiClient {
    pub fn new(config: ApiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    pub(crate) fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.config.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Map non-success statuses to the error taxonomy.
    pub(crate) async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| status.to_string());
        Err(ApiError::from_status(status.as_u16(), message))
    }

    /// Stage-1 probe: is the local API up at all.
    pub async fn health(&self) -> Result<()> {
        let response = self
            .http
            .head(self.url("/health"))
            .timeout(self.config.local_probe_timeout)
            .send()
            .await?;
        Self::check(response).await?;
        debug!("health probe ok");
        Ok(())
    }

    /// Stage-2 probe: is the external search dependency reachable.
    pub async fn health_aladin(&self) -> Result<()> {
        let response = self
            .http
            .get(self.url("/health/aladin"))
            .timeout(self.config.external_probe_timeout)
            .send()
            .await?;
        Self::check(response).await?;
        debug!("external dependency probe ok");
        Ok(())
    }
}
