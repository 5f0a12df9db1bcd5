//! Application configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use pagemark_api::ApiConfig;
use pagemark_net::ProbeConfig;
use pagemark_sync::SyncConfig;

use crate::errors::{Result, ServiceError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Base URL including the `/api/v1` prefix.
    pub base_url: String,
    /// Directory holding the store database.
    pub data_dir: PathBuf,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_secs: u64,
    pub retention_window_days: i64,
    pub sweep_age_days: i64,
    pub sync_wait_timeout_secs: u64,
    #[serde(default = "default_probe_stabilization_ms")]
    pub probe_stabilization_ms: u64,
    #[serde(default = "default_probe_retry_ms")]
    pub probe_retry_ms: u64,
    #[serde(default)]
    pub auth_token: Option<String>,
}

fn default_probe_stabilization_ms() -> u64 {
    1_000
}

fn default_probe_retry_ms() -> u64 {
    5_000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api/v1".to_string(),
            data_dir: default_data_dir(),
            request_timeout_secs: 10,
            max_retries: 3,
            backoff_base_secs: 5,
            retention_window_days: 7,
            sweep_age_days: 30,
            sync_wait_timeout_secs: 30,
            probe_stabilization_ms: default_probe_stabilization_ms(),
            probe_retry_ms: default_probe_retry_ms(),
            auth_token: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default location.
    pub fn load() -> Result<AppConfig> {
        let path = config_path();
        let content = std::fs::read_to_string(&path)?;
        let config: AppConfig =
            toml::from_str(&content).map_err(|e| ServiceError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<()> {
        let path = config_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| ServiceError::Config(e.to_string()))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(pagemark_store::DB_FILE_NAME)
    }

    pub fn api_config(&self) -> ApiConfig {
        ApiConfig {
            base_url: self.base_url.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            auth_token: self.auth_token.clone(),
            ..ApiConfig::default()
        }
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            max_retries: self.max_retries,
            backoff_base: Duration::from_secs(self.backoff_base_secs),
            retention_window: chrono::Duration::days(self.retention_window_days),
            sweep_age: chrono::Duration::days(self.sweep_age_days),
            sync_wait_timeout: Duration::from_secs(self.sync_wait_timeout_secs),
        }
    }

    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            stabilization_delay: Duration::from_millis(self.probe_stabilization_ms),
            reprobe_delay: Duration::from_millis(self.probe_retry_ms),
        }
    }
}

fn config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".pagemark")
        .join("config.toml")
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".pagemark")
}
