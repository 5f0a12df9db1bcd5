//! Background sync worker
//!
//! A second, isolated replay loop: it opens its own store handle on the
//! same database file and owns its own API client, sharing nothing
//! in-memory with the foreground. Credentials arrive once, at
//! registration. It drives the queue (promote, collect, claim, replay)
//! and leaves lifecycle reporting to the foreground coordinator.

use std::path::Path;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info};

use pagemark_api::{ApiClient, ApiConfig};
use pagemark_proto::EventBus;
use pagemark_store::AsyncStore;

use crate::config::SyncConfig;
use crate::coordinator::SyncCoordinator;
use crate::engine::{PassStats, SyncEngine};
use crate::errors::Result;
use crate::outbox::OutboxQueue;

pub struct BackgroundSyncWorker {
    engine: SyncEngine,
    poll_interval: Duration,
}

impl BackgroundSyncWorker {
    /// Register a worker on the shared database file.
    ///
    /// Everything the worker needs is passed in here; it never reaches
    /// into foreground state.
    pub async fn register(
        db_path: impl AsRef<Path>,
        api_config: ApiConfig,
        sync_config: SyncConfig,
        poll_interval: Duration,
    ) -> Result<Self> {
        let store = AsyncStore::open(db_path).await?;
        let api = ApiClient::new(api_config)?;

        // Private bus and coordinator: the worker's events stay inside
        // its own loop.
        let bus = EventBus::new();
        let outbox = OutboxQueue::new(store.clone(), sync_config.clone());
        let coordinator = SyncCoordinator::new(store.clone(), bus.clone());
        let engine = SyncEngine::new(store, outbox, coordinator, api, bus, sync_config);

        info!("background sync worker registered");
        Ok(Self {
            engine,
            poll_interval,
        })
    }

    /// One queue-draining pass.
    pub async fn run_once(&self) -> Result<PassStats> {
        self.engine.drive_queue_once().await
    }

    /// Run forever on the poll interval.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                sleep(self.poll_interval).await;
                match self.engine.drive_queue_once().await {
                    Ok(stats) if stats == PassStats::default() => {
                        debug!("background pass found no work");
                    }
                    Ok(stats) => {
                        info!(
                            processed = stats.processed,
                            retrying = stats.retrying,
                            parked = stats.parked,
                            "background pass finished"
                        );
                    }
                    Err(e) => error!("background pass failed: {}", e),
                }
            }
        })
    }
}
