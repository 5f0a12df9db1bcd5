//! Sync engine configuration

use std::time::Duration;

/// Knobs for the outbox, engine, and retention policy.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Automatic retries before an item parks in FAILED.
    pub max_retries: u32,
    /// Base of the exponential re-arm delay: base * 2^(retry-1).
    pub backoff_base: Duration,
    /// Memos authored longer ago than this leave the local store after
    /// a successful sync.
    pub retention_window: chrono::Duration,
    /// Synced memos idle longer than this are swept.
    pub sweep_age: chrono::Duration,
    /// Default deadline for `wait_for_complete`.
    pub sync_wait_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_secs(5),
            retention_window: chrono::Duration::days(7),
            sweep_age: chrono::Duration::days(30),
            sync_wait_timeout: Duration::from_secs(30),
        }
    }
}
