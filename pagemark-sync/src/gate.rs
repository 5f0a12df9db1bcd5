//! Request gate
//!
//! A pure scheduling layer: user operations arriving while a sync cycle
//! is active are parked here and replayed strictly in arrival order once
//! the cycle completes. The gate never reorders, batches, or coalesces;
//! if a new cycle starts mid-drain, draining pauses until the next
//! completion.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use pagemark_proto::{Event, EventBus};

use crate::coordinator::SyncCoordinator;

type DeferredTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
type TaskFactory = Box<dyn FnOnce() -> DeferredTask + Send + 'static>;

#[derive(Clone)]
pub struct RequestGate {
    queue: Arc<Mutex<VecDeque<TaskFactory>>>,
    bus: EventBus,
    coordinator: SyncCoordinator,
}

impl RequestGate {
    pub fn new(bus: EventBus, coordinator: SyncCoordinator) -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            bus,
            coordinator,
        }
    }

    /// Park an operation; the receiver resolves with its result when the
    /// drain reaches it. A cleared gate drops the sender, which the
    /// caller observes as cancellation.
    pub async fn defer<T, F, Fut>(&self, op: F) -> oneshot::Receiver<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let factory: TaskFactory = Box::new(move || {
            Box::pin(async move {
                let result = op().await;
                let _ = tx.send(result);
            })
        });

        let mut queue = self.queue.lock().await;
        queue.push_back(factory);
        debug!(depth = queue.len(), "operation deferred");
        rx
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.queue.lock().await.is_empty()
    }

    /// Reject everything still queued.
    pub async fn clear(&self) -> usize {
        let mut queue = self.queue.lock().await;
        let dropped = queue.len();
        // Dropping the factories drops their result senders; every
        // parked caller sees a cancellation.
        queue.clear();
        if dropped > 0 {
            info!(dropped, "request gate cleared");
        }
        dropped
    }

    /// Run the drain loop: wake on every `SyncCompleted`, replay in FIFO
    /// order, pause when a new cycle begins.
    pub fn spawn_drain(&self) -> JoinHandle<()> {
        let gate = self.clone();
        // Subscribe before spawning so a completion published right
        // after this call cannot be missed.
        let mut rx = self.bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(Event::SyncCompleted { .. }) => gate.drain().await,
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "gate lagged behind the bus, draining anyway");
                        gate.drain().await;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn drain(&self) {
        loop {
            if self.coordinator.is_syncing().await {
                debug!("drain paused, new sync cycle active");
                return;
            }

            let next = self.queue.lock().await.pop_front();
            let Some(task) = next else {
                return;
            };
            task().await;
        }
    }
}
