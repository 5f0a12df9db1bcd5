//! Two-stage reachability probe
//!
//! Connectivity edges (the OS or embedding shell reporting online or
//! offline) only *seed* the probe; "online" is not believed until the
//! local API answers its health check. A second probe against the
//! external search dependency decides degraded mode: sync proceeds
//! without it, search-like features do not.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use pagemark_api::ApiClient;
use pagemark_proto::{Event, EventBus};

/// Probe timing knobs.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Wait after a connectivity edge before verifying; links flap.
    pub stabilization_delay: Duration,
    /// Wait between stage-1 attempts while the local API stays silent.
    pub reprobe_delay: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            stabilization_delay: Duration::from_secs(1),
            reprobe_delay: Duration::from_secs(5),
        }
    }
}

/// What the probe currently believes about the network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectivityState {
    pub is_online: bool,
    pub local_reachable: bool,
    pub external_reachable: bool,
}

/// Reachability detector for the local API and its external dependency.
#[derive(Clone)]
pub struct NetworkProbe {
    api: ApiClient,
    bus: EventBus,
    config: ProbeConfig,
    state: Arc<RwLock<ConnectivityState>>,
    /// Bumped on every connectivity edge; stale verification runs
    /// observe the bump and stop.
    epoch: Arc<AtomicU64>,
}

impl NetworkProbe {
    pub fn new(api: ApiClient, bus: EventBus, config: ProbeConfig) -> Self {
        Self {
            api,
            bus,
            config,
            state: Arc::new(RwLock::new(ConnectivityState::default())),
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Current snapshot.
    pub async fn state(&self) -> ConnectivityState {
        *self.state.read().await
    }

    pub async fn is_online(&self) -> bool {
        self.state.read().await.is_online
    }

    /// Feed a connectivity edge into the probe.
    ///
    /// Offline takes effect immediately. Online starts an asynchronous
    /// verification pass; `NetworkOnline` fires only once the local API
    /// has answered.
    pub fn notify_connectivity(&self, online: bool) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;

        if online {
            self.bus.publish(Event::NetworkOnlineStart);
            let probe = self.clone();
            tokio::spawn(async move {
                probe.verify_online(epoch).await;
            });
        } else {
            self.bus.publish(Event::NetworkOfflineStart);
            let probe = self.clone();
            tokio::spawn(async move {
                {
                    let mut state = probe.state.write().await;
                    *state = ConnectivityState::default();
                }
                info!("network offline");
                probe.bus.publish(Event::NetworkOffline);
            });
        }
    }

    /// Run verification on startup without waiting for an edge.
    pub async fn probe_now(&self) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.bus.publish(Event::NetworkOnlineStart);
        self.verify_online(epoch).await;
    }

    fn stale(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) != epoch
    }

    async fn verify_online(&self, epoch: u64) {
        sleep(self.config.stabilization_delay).await;

        // Stage 1: the local API, retried until it answers or the edge
        // is superseded.
        loop {
            if self.stale(epoch) {
                debug!("verification superseded before local probe");
                return;
            }
            match self.api.health().await {
                Ok(()) => break,
                Err(e) => {
                    warn!("local health probe failed, retrying: {}", e);
                    sleep(self.config.reprobe_delay).await;
                }
            }
        }

        if self.stale(epoch) {
            return;
        }

        // Stage 2: the external dependency; failure degrades, never blocks.
        let external_reachable = match self.api.health_aladin().await {
            Ok(()) => true,
            Err(e) => {
                warn!("external dependency unreachable, degraded mode: {}", e);
                false
            }
        };

        if self.stale(epoch) {
            return;
        }

        {
            let mut state = self.state.write().await;
            *state = ConnectivityState {
                is_online: true,
                local_reachable: true,
                external_reachable,
            };
        }

        info!(external_reachable, "network online");
        self.bus.publish(Event::NetworkOnline { external_reachable });
    }
}
