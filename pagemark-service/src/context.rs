//! Composition root
//!
//! Every component is wired exactly once here and passed explicitly to
//! the things that need it. There is no module-level state; tests build
//! an `App` over an in-memory store and a mock API the same way
//! production builds one over the real ones.

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use pagemark_api::ApiClient;
use pagemark_net::NetworkProbe;
use pagemark_proto::{Event, EventBus};
use pagemark_store::AsyncStore;
use pagemark_sync::{OutboxQueue, RequestGate, SyncCoordinator, SyncEngine};

use crate::config::AppConfig;
use crate::errors::Result;
use crate::memos::MemoService;
use crate::shelf::ShelfService;

pub struct App {
    pub config: AppConfig,
    pub store: AsyncStore,
    pub api: ApiClient,
    pub bus: EventBus,
    pub probe: NetworkProbe,
    pub outbox: OutboxQueue,
    pub coordinator: SyncCoordinator,
    pub gate: RequestGate,
    pub engine: SyncEngine,
    pub memos: MemoService,
    pub shelf: ShelfService,
}

impl App {
    /// Open the store at the configured path and wire everything up.
    pub async fn bootstrap(config: AppConfig) -> Result<App> {
        std::fs::create_dir_all(&config.data_dir)?;
        let store = AsyncStore::open(config.db_path()).await?;
        Self::assemble(store, config)
    }

    /// Wire components over an existing store handle.
    pub fn assemble(store: AsyncStore, config: AppConfig) -> Result<App> {
        let bus = EventBus::new();
        let api = ApiClient::new(config.api_config())?;
        let sync_config = config.sync_config();

        let probe = NetworkProbe::new(api.clone(), bus.clone(), config.probe_config());
        let outbox = OutboxQueue::new(store.clone(), sync_config.clone());
        let coordinator = SyncCoordinator::new(store.clone(), bus.clone());
        let gate = RequestGate::new(bus.clone(), coordinator.clone());
        let engine = SyncEngine::new(
            store.clone(),
            outbox.clone(),
            coordinator.clone(),
            api.clone(),
            bus.clone(),
            sync_config,
        );

        let memos = MemoService::new(
            store.clone(),
            outbox.clone(),
            gate.clone(),
            coordinator.clone(),
            probe.clone(),
            api.clone(),
            bus.clone(),
        );
        let shelf = ShelfService::new(
            store.clone(),
            outbox.clone(),
            gate.clone(),
            coordinator.clone(),
            probe.clone(),
            api.clone(),
            bus.clone(),
        );

        info!("application assembled");
        Ok(App {
            config,
            store,
            api,
            bus,
            probe,
            outbox,
            coordinator,
            gate,
            engine,
            memos,
            shelf,
        })
    }

    /// Start the background machinery: the gate's drain loop and the
    /// task that runs an engine pass whenever the network comes up or a
    /// write gets deferred.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        let mut tasks = vec![self.gate.spawn_drain()];

        let engine = self.engine.clone();
        let probe = self.probe.clone();
        let coordinator = self.coordinator.clone();
        let mut rx = self.bus.subscribe();
        tasks.push(tokio::spawn(async move {
            loop {
                let event = match rx.recv().await {
                    Ok(event) => event,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "engine wake task lagged");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };

                let sweep = match event {
                    Event::NetworkOnline { .. } => true,
                    Event::SyncDeferred => false,
                    _ => continue,
                };

                if !probe.is_online().await || coordinator.is_syncing().await {
                    continue;
                }
                if let Err(e) = engine.run_pass().await {
                    // Error sink for the wake task; the next event
                    // retries.
                    error!("engine pass failed: {}", e);
                }
                if sweep {
                    if let Err(e) = engine.run_sweep().await {
                        error!("retention sweep failed: {}", e);
                    }
                }
            }
        }));

        tasks
    }

    /// Verify connectivity immediately (startup path).
    pub async fn probe_now(&self) {
        self.probe.probe_now().await;
    }

    /// Block until the active cycle completes; `false` on timeout.
    pub async fn wait_for_sync_complete(&self) -> bool {
        self.coordinator
            .wait_for_complete(self.config.sync_config().sync_wait_timeout)
            .await
    }
}
