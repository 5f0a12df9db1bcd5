//! Outbox queue
//!
//! The single source of truth for pending work. Enqueueing enforces the
//! one-active-item-per-entity invariant: a mutation either lands as a
//! fresh PENDING item, folds into an unclaimed one, or parks WAITING
//! behind the in-flight item it must not overtake. Claiming is a
//! compare-and-set on the stored status, nothing else.

use chrono::Utc;
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use pagemark_store::{AsyncStore, EntityKind, OpKind, OutboxItem, OutboxStatus};

use crate::config::SyncConfig;
use crate::errors::{Result, SyncError};

/// What happened to a mutation handed to the queue.
#[derive(Debug)]
pub enum EnqueueOutcome {
    /// A fresh PENDING item was stored.
    Enqueued(OutboxItem),
    /// The body was folded into an item that has not been claimed yet.
    Coalesced(OutboxItem),
    /// Queued WAITING behind the in-flight item for the same entity.
    Waiting(OutboxItem),
    /// DELETE of a draft the server never saw: queued work was removed,
    /// the caller drops the entity row itself.
    CancelledLocalDraft { removed: Vec<String> },
}

impl EnqueueOutcome {
    pub fn item(&self) -> Option<&OutboxItem> {
        match self {
            EnqueueOutcome::Enqueued(item)
            | EnqueueOutcome::Coalesced(item)
            | EnqueueOutcome::Waiting(item) => Some(item),
            EnqueueOutcome::CancelledLocalDraft { .. } => None,
        }
    }
}

/// Merge a patch body into a queued body, key by key.
fn merge_payload(base: &mut Value, patch: &Value) {
    match (base.as_object_mut(), patch.as_object()) {
        (Some(base_map), Some(patch_map)) => {
            for (key, value) in patch_map {
                base_map.insert(key.clone(), value.clone());
            }
        }
        _ => *base = patch.clone(),
    }
}

#[derive(Clone)]
pub struct OutboxQueue {
    store: AsyncStore,
    config: SyncConfig,
}

impl OutboxQueue {
    pub fn new(store: AsyncStore, config: SyncConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &AsyncStore {
        &self.store
    }

    /// Enqueue a mutation, applying the coalescing rules.
    pub async fn enqueue_mutation(
        &self,
        kind: OpKind,
        entity_kind: EntityKind,
        local_ref: Uuid,
        server_ref: Option<i64>,
        payload: Value,
    ) -> Result<EnqueueOutcome> {
        let active: Vec<OutboxItem> = self
            .store
            .queue_items_by_local_ref(&local_ref)
            .await?
            .into_iter()
            .filter(|item| {
                matches!(
                    item.status,
                    OutboxStatus::Pending | OutboxStatus::Waiting | OutboxStatus::Syncing
                )
            })
            .collect();

        match kind {
            OpKind::Create => self.enqueue_create(entity_kind, local_ref, payload, &active).await,
            OpKind::Update => {
                self.enqueue_update(entity_kind, local_ref, server_ref, payload, &active)
                    .await
            }
            OpKind::Delete => {
                self.enqueue_delete(entity_kind, local_ref, server_ref, &active).await
            }
        }
    }

    async fn enqueue_create(
        &self,
        entity_kind: EntityKind,
        local_ref: Uuid,
        payload: Value,
        active: &[OutboxItem],
    ) -> Result<EnqueueOutcome> {
        if let Some(existing) = active.first() {
            return Err(SyncError::InvariantViolation(format!(
                "create for {} while item {} is {:?}",
                local_ref, existing.id, existing.status
            )));
        }

        let item = OutboxItem::new(OpKind::Create, entity_kind, local_ref, None, payload);
        self.store.insert_queue_item(&item).await?;
        debug!(queue_id = %item.id, entity = %local_ref, "enqueued CREATE");
        Ok(EnqueueOutcome::Enqueued(item))
    }

    async fn enqueue_update(
        &self,
        entity_kind: EntityKind,
        local_ref: Uuid,
        server_ref: Option<i64>,
        payload: Value,
        active: &[OutboxItem],
    ) -> Result<EnqueueOutcome> {
        // An unclaimed item absorbs the new body.
        if let Some(pending) = active.iter().find(|i| i.status == OutboxStatus::Pending) {
            return match pending.kind {
                OpKind::Create => {
                    // The entity has no server row yet; the newest state
                    // rides along inside the CREATE body.
                    let mut item = pending.clone();
                    merge_payload(&mut item.payload, &payload);
                    item.updated_at = Utc::now();
                    self.store.update_queue_item(&item).await?;
                    debug!(queue_id = %item.id, "folded update into pending CREATE");
                    Ok(EnqueueOutcome::Coalesced(item))
                }
                OpKind::Update => {
                    // Replace so only the latest body replays.
                    self.store.delete_queue_item(&pending.id).await?;
                    let item = OutboxItem::new(
                        OpKind::Update,
                        entity_kind,
                        local_ref,
                        server_ref.or(pending.server_ref),
                        payload,
                    );
                    self.store.insert_queue_item(&item).await?;
                    debug!(
                        queue_id = %item.id,
                        replaced = %pending.id,
                        "replaced pending UPDATE"
                    );
                    Ok(EnqueueOutcome::Enqueued(item))
                }
                OpKind::Delete => Err(SyncError::InvariantViolation(format!(
                    "update for {} after its delete was queued",
                    local_ref
                ))),
            };
        }

        // Behind an in-flight item the update must wait.
        if let Some(syncing) = active.iter().find(|i| i.status == OutboxStatus::Syncing) {
            // A WAITING item for this entity absorbs the body instead of
            // stacking a second one.
            if let Some(waiting) = active.iter().find(|i| i.status == OutboxStatus::Waiting) {
                if waiting.kind == OpKind::Delete {
                    return Err(SyncError::InvariantViolation(format!(
                        "update for {} after its delete was queued",
                        local_ref
                    )));
                }
                let mut item = waiting.clone();
                merge_payload(&mut item.payload, &payload);
                item.updated_at = Utc::now();
                self.store.update_queue_item(&item).await?;
                debug!(queue_id = %item.id, "folded update into waiting item");
                return Ok(EnqueueOutcome::Coalesced(item));
            }

            let item =
                OutboxItem::new(OpKind::Update, entity_kind, local_ref, server_ref, payload)
                    .waiting_on(&syncing.id);
            self.store.insert_queue_item(&item).await?;
            debug!(queue_id = %item.id, behind = %syncing.id, "queued UPDATE as WAITING");
            return Ok(EnqueueOutcome::Waiting(item));
        }

        let item = OutboxItem::new(OpKind::Update, entity_kind, local_ref, server_ref, payload);
        self.store.insert_queue_item(&item).await?;
        debug!(queue_id = %item.id, entity = %local_ref, "enqueued UPDATE");
        Ok(EnqueueOutcome::Enqueued(item))
    }

    async fn enqueue_delete(
        &self,
        entity_kind: EntityKind,
        local_ref: Uuid,
        server_ref: Option<i64>,
        active: &[OutboxItem],
    ) -> Result<EnqueueOutcome> {
        // Delete supersedes anything not yet claimed; while an item is in
        // flight the delete waits for it.
        if let Some(syncing) = active.iter().find(|i| i.status == OutboxStatus::Syncing) {
            let mut removed = Vec::new();
            for stale in active.iter().filter(|i| i.status == OutboxStatus::Waiting) {
                self.store.delete_queue_item(&stale.id).await?;
                removed.push(stale.id.clone());
            }
            if !removed.is_empty() {
                debug!(?removed, "delete superseded waiting items");
            }

            let item = OutboxItem::new(
                OpKind::Delete,
                entity_kind,
                local_ref,
                server_ref,
                Value::Null,
            )
            .waiting_on(&syncing.id);
            self.store.insert_queue_item(&item).await?;
            debug!(queue_id = %item.id, behind = %syncing.id, "queued DELETE as WAITING");
            return Ok(EnqueueOutcome::Waiting(item));
        }

        if server_ref.is_none() {
            // The server never heard of this entity; drop the queued work
            // and let the caller remove the local row.
            let mut removed = Vec::new();
            for item in active {
                self.store.delete_queue_item(&item.id).await?;
                removed.push(item.id.clone());
            }
            info!(entity = %local_ref, count = removed.len(), "cancelled local-only draft");
            return Ok(EnqueueOutcome::CancelledLocalDraft { removed });
        }

        if let Some(pending) = active.iter().find(|i| i.status == OutboxStatus::Pending) {
            if pending.kind == OpKind::Delete {
                return Ok(EnqueueOutcome::Coalesced(pending.clone()));
            }
            self.store.delete_queue_item(&pending.id).await?;
            debug!(replaced = %pending.id, "delete superseded pending item");
        }

        let item = OutboxItem::new(
            OpKind::Delete,
            entity_kind,
            local_ref,
            server_ref,
            Value::Null,
        );
        self.store.insert_queue_item(&item).await?;
        debug!(queue_id = %item.id, entity = %local_ref, "enqueued DELETE");
        Ok(EnqueueOutcome::Enqueued(item))
    }

    /// PENDING items in strict arrival order.
    pub async fn get_pending(&self) -> Result<Vec<OutboxItem>> {
        Ok(self.store.queue_items_by_status(OutboxStatus::Pending).await?)
    }

    pub async fn get_waiting(&self) -> Result<Vec<OutboxItem>> {
        Ok(self.store.queue_items_by_status(OutboxStatus::Waiting).await?)
    }

    pub async fn get_failed(&self) -> Result<Vec<OutboxItem>> {
        Ok(self.store.queue_items_by_status(OutboxStatus::Failed).await?)
    }

    pub async fn get_by_local_ref(&self, local_ref: &Uuid) -> Result<Vec<OutboxItem>> {
        Ok(self.store.queue_items_by_local_ref(local_ref).await?)
    }

    pub async fn get(&self, id: &str) -> Result<Option<OutboxItem>> {
        Ok(self.store.get_queue_item(id).await?)
    }

    /// Persist modified fields of an item.
    pub async fn update(&self, item: &mut OutboxItem) -> Result<()> {
        item.updated_at = Utc::now();
        Ok(self.store.update_queue_item(item).await?)
    }

    pub async fn remove(&self, id: &str) -> Result<()> {
        Ok(self.store.delete_queue_item(id).await?)
    }

    pub async fn count_pending(&self) -> Result<usize> {
        Ok(self.store.count_queue_by_status(OutboxStatus::Pending).await?)
    }

    /// The sole claim primitive.
    pub async fn try_update_status(
        &self,
        id: &str,
        expected: OutboxStatus,
        next: OutboxStatus,
    ) -> Result<bool> {
        Ok(self.store.try_update_queue_status(id, expected, next).await?)
    }

    pub async fn mark_success(&self, id: &str) -> Result<()> {
        let mut item = self
            .get(id)
            .await?
            .ok_or_else(|| SyncError::QueueItemNotFound(id.to_string()))?;
        item.status = OutboxStatus::Success;
        self.update(&mut item).await?;
        debug!(queue_id = %id, "item succeeded");
        Ok(())
    }

    /// Record a failure and, below the retry cap, schedule the re-arm.
    ///
    /// The re-arm flips FAILED back to PENDING after
    /// `backoff_base * 2^(retry-1)`; at the cap the item stays FAILED
    /// for operator visibility.
    pub async fn mark_failed(&self, id: &str, error: &str) -> Result<OutboxItem> {
        let mut item = self
            .get(id)
            .await?
            .ok_or_else(|| SyncError::QueueItemNotFound(id.to_string()))?;

        item.retry_count += 1;
        item.last_error = Some(error.to_string());
        item.last_retry_at = Some(Utc::now());
        item.status = OutboxStatus::Failed;
        self.update(&mut item).await?;

        if item.retry_count < self.config.max_retries {
            let delay = self.config.backoff_base * 2u32.pow(item.retry_count - 1);
            warn!(
                queue_id = %id,
                retry = item.retry_count,
                ?delay,
                "item failed, re-arming: {}",
                error
            );

            let queue = self.clone();
            let id = id.to_string();
            let scheduled_retry = item.retry_count;
            tokio::spawn(async move {
                sleep(delay).await;
                // A later failure supersedes this re-arm; only the timer
                // belonging to the current retry count may fire.
                match queue.get(&id).await {
                    Ok(Some(current)) if current.retry_count == scheduled_retry => {
                        match queue
                            .try_update_status(&id, OutboxStatus::Failed, OutboxStatus::Pending)
                            .await
                        {
                            Ok(true) => debug!(queue_id = %id, "re-armed after backoff"),
                            Ok(false) => {
                                debug!(queue_id = %id, "re-arm skipped, status moved on")
                            }
                            Err(e) => error_sink(&id, e),
                        }
                    }
                    Ok(_) => debug!(queue_id = %id, "re-arm superseded"),
                    Err(e) => error_sink(&id, e),
                }
            });
        } else {
            warn!(
                queue_id = %id,
                retries = item.retry_count,
                "item exhausted retries, parked in FAILED: {}",
                error
            );
        }

        Ok(item)
    }

    /// Park an item in FAILED with no automatic re-arm.
    ///
    /// Used for non-transient failures where retrying cannot help; the
    /// item stays visible until an operator re-arms or removes it.
    pub async fn park(&self, id: &str, error: &str) -> Result<OutboxItem> {
        let mut item = self
            .get(id)
            .await?
            .ok_or_else(|| SyncError::QueueItemNotFound(id.to_string()))?;
        item.status = OutboxStatus::Failed;
        item.last_error = Some(error.to_string());
        item.last_retry_at = Some(Utc::now());
        self.update(&mut item).await?;
        warn!(queue_id = %id, "item parked: {}", error);
        Ok(item)
    }

    /// Operator-driven re-arm of a parked item; resets the retry budget.
    pub async fn rearm_failed(&self, id: &str) -> Result<bool> {
        if !self
            .try_update_status(id, OutboxStatus::Failed, OutboxStatus::Pending)
            .await?
        {
            return Ok(false);
        }
        let mut item = self
            .get(id)
            .await?
            .ok_or_else(|| SyncError::QueueItemNotFound(id.to_string()))?;
        item.retry_count = 0;
        item.last_error = None;
        self.update(&mut item).await?;
        info!(queue_id = %id, "manually re-armed");
        Ok(true)
    }

    /// Drop SUCCESS rows nothing is waiting on.
    pub async fn purge_completed(&self) -> Result<usize> {
        let waiting = self.get_waiting().await?;
        let referenced: Vec<&str> = waiting
            .iter()
            .filter_map(|w| w.original_queue_id.as_deref())
            .collect();

        let done = self.store.queue_items_by_status(OutboxStatus::Success).await?;
        let mut purged = 0;
        for item in done {
            if !referenced.contains(&item.id.as_str()) {
                self.store.delete_queue_item(&item.id).await?;
                purged += 1;
            }
        }
        if purged > 0 {
            debug!(purged, "purged completed queue items");
        }
        Ok(purged)
    }
}

fn error_sink(queue_id: &str, e: SyncError) {
    // Fire-and-forget tasks land here; never swallowed silently.
    tracing::error!(queue_id = %queue_id, "re-arm task failed: {}", e);
}
