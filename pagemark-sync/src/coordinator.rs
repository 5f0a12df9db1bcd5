//! Sync cycle lifecycle
//!
//! One coherent is-syncing lifecycle shared by every driver (memo,
//! shelf, background). Drivers report progress into the same cycle;
//! completion is decided by looking at the outbox, not by counting
//! driver exits, and is announced exactly once per cycle.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info};

use pagemark_proto::{Event, EventBus};
use pagemark_store::{AsyncStore, OutboxStatus};

use crate::errors::Result;

/// Point-in-time view of the cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncSnapshot {
    pub is_syncing: bool,
    pub pending_count: usize,
    pub processed_count: usize,
    pub sync_start_time: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct SyncCoordinator {
    state: Arc<Mutex<SyncSnapshot>>,
    bus: EventBus,
    store: AsyncStore,
}

impl SyncCoordinator {
    pub fn new(store: AsyncStore, bus: EventBus) -> Self {
        Self {
            state: Arc::new(Mutex::new(SyncSnapshot::default())),
            bus,
            store,
        }
    }

    /// Begin (or join) a cycle. Only the first caller transitions the
    /// lifecycle; later drivers contribute their counts to it.
    pub async fn start(&self, pending: usize) -> bool {
        let mut state = self.state.lock().await;
        if state.is_syncing {
            state.pending_count += pending;
            debug!(pending, "driver joined active cycle");
            return false;
        }

        *state = SyncSnapshot {
            is_syncing: true,
            pending_count: pending,
            processed_count: 0,
            sync_start_time: Some(Utc::now()),
        };
        info!(pending, "sync cycle started");
        self.bus.publish(Event::SyncStarted { pending });
        true
    }

    /// Accumulate progress from a driver.
    pub async fn update_progress(&self, delta: usize, remaining: usize) {
        let mut state = self.state.lock().await;
        state.processed_count += delta;
        state.pending_count = remaining;
        let processed = state.processed_count;
        drop(state);
        self.bus.publish(Event::SyncProgress {
            processed,
            remaining,
        });
    }

    /// Close the cycle if the outbox has drained.
    ///
    /// Emits `SyncCompleted` exactly once per cycle: the is-syncing flag
    /// is cleared under the same lock that guards the check.
    pub async fn check_complete(&self) -> Result<bool> {
        let mut state = self.state.lock().await;
        if !state.is_syncing {
            return Ok(false);
        }

        let pending = self.store.count_queue_by_status(OutboxStatus::Pending).await?;
        if pending > 0 {
            debug!(pending, "cycle still has work");
            return Ok(false);
        }

        state.is_syncing = false;
        state.pending_count = 0;
        let processed = state.processed_count;
        drop(state);

        info!(processed, "sync cycle complete");
        self.bus.publish(Event::SyncCompleted { processed });
        Ok(true)
    }

    pub async fn is_syncing(&self) -> bool {
        self.state.lock().await.is_syncing
    }

    pub async fn snapshot(&self) -> SyncSnapshot {
        self.state.lock().await.clone()
    }

    /// Wait until the running cycle announces completion.
    ///
    /// Resolves `true` immediately when no cycle is active, `false` on
    /// timeout; never errors.
    pub async fn wait_for_complete(&self, deadline: Duration) -> bool {
        // Subscribe before reading the flag so a completion between the
        // two cannot be missed.
        let mut rx = self.bus.subscribe();
        if !self.is_syncing().await {
            return true;
        }

        let wait = async {
            loop {
                match rx.recv().await {
                    Ok(Event::SyncCompleted { .. }) => return,
                    Ok(_) => continue,
                    // Lagged or closed: fall back to polling the flag.
                    Err(_) => {
                        if !self.is_syncing().await {
                            return;
                        }
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                }
            }
        };

        timeout(deadline, wait).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn coordinator() -> (SyncCoordinator, EventBus) {
        let store = AsyncStore::open_in_memory().await.unwrap();
        let bus = EventBus::new();
        (SyncCoordinator::new(store, bus.clone()), bus)
    }

    #[tokio::test]
    async fn start_is_idempotent_and_accumulates() {
        let (coordinator, _bus) = coordinator().await;

        assert!(coordinator.start(3).await);
        assert!(!coordinator.start(2).await);

        let snapshot = coordinator.snapshot().await;
        assert!(snapshot.is_syncing);
        assert_eq!(snapshot.pending_count, 5);
    }

    #[tokio::test]
    async fn complete_emits_exactly_once() {
        let (coordinator, bus) = coordinator().await;
        let mut rx = bus.subscribe();

        coordinator.start(1).await;
        coordinator.update_progress(1, 0).await;

        assert!(coordinator.check_complete().await.unwrap());
        assert!(!coordinator.check_complete().await.unwrap());

        assert_eq!(rx.recv().await.unwrap(), Event::SyncStarted { pending: 1 });
        assert_eq!(
            rx.recv().await.unwrap(),
            Event::SyncProgress {
                processed: 1,
                remaining: 0
            }
        );
        assert_eq!(rx.recv().await.unwrap(), Event::SyncCompleted { processed: 1 });
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn wait_resolves_immediately_when_idle() {
        let (coordinator, _bus) = coordinator().await;
        assert!(coordinator.wait_for_complete(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn wait_times_out_as_false() {
        let (coordinator, _bus) = coordinator().await;
        coordinator.start(1).await;
        assert!(
            !coordinator
                .wait_for_complete(Duration::from_millis(50))
                .await
        );
    }

    #[tokio::test]
    async fn wait_observes_completion() {
        let (coordinator, _bus) = coordinator().await;
        coordinator.start(1).await;

        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.wait_for_complete(Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        coordinator.check_complete().await.unwrap();

        assert!(waiter.await.unwrap());
    }
}
