//! The sync engine
//!
//! One pass: promote WAITING items whose predecessor finished, collect
//! PENDING in strict arrival order, claim each through the CAS, replay
//! it against the remote API, and reconcile the store. Transient
//! failures hand the item back to the outbox for backoff; terminal ones
//! park it for operator attention.

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use pagemark_api::{ApiClient, ApiError};
use pagemark_proto::{Event, EventBus};
use pagemark_store::{
    AsyncStore, EntityKind, MemoRecord, OpKind, OutboxItem, OutboxStatus, ShelfRecord, SyncStatus,
};

use crate::config::SyncConfig;
use crate::coordinator::SyncCoordinator;
use crate::errors::{Result, SyncError};
use crate::outbox::OutboxQueue;

/// Counters from one engine pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    /// Items replayed successfully.
    pub processed: usize,
    /// Items that failed transiently and will re-arm.
    pub retrying: usize,
    /// Items parked in FAILED with no automatic retry.
    pub parked: usize,
    /// Items another driver claimed first.
    pub skipped: usize,
}

enum ItemOutcome {
    Completed,
    Retrying,
    Parked,
}

#[derive(Clone)]
pub struct SyncEngine {
    store: AsyncStore,
    outbox: OutboxQueue,
    coordinator: SyncCoordinator,
    api: ApiClient,
    bus: EventBus,
    config: SyncConfig,
}

impl SyncEngine {
    pub fn new(
        store: AsyncStore,
        outbox: OutboxQueue,
        coordinator: SyncCoordinator,
        api: ApiClient,
        bus: EventBus,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            outbox,
            coordinator,
            api,
            bus,
            config,
        }
    }

    /// Full foreground pass with lifecycle reporting.
    pub async fn run_pass(&self) -> Result<PassStats> {
        self.promote_waiting().await?;
        self.outbox.purge_completed().await?;

        let pending = self.outbox.get_pending().await?;
        if pending.is_empty() {
            self.coordinator.check_complete().await?;
            return Ok(PassStats::default());
        }

        self.coordinator.start(pending.len()).await;
        let stats = self.process_batch(pending, true).await?;
        self.coordinator.check_complete().await?;

        if stats.parked > 0 {
            let failed = self.outbox.get_failed().await?.len();
            self.bus.publish(Event::SyncFailedItems { count: failed });
        }

        info!(
            processed = stats.processed,
            retrying = stats.retrying,
            parked = stats.parked,
            skipped = stats.skipped,
            "sync pass finished"
        );
        Ok(stats)
    }

    /// Queue-draining pass without lifecycle reporting, for the
    /// background worker's isolated loop.
    pub async fn drive_queue_once(&self) -> Result<PassStats> {
        self.promote_waiting().await?;
        self.outbox.purge_completed().await?;
        let pending = self.outbox.get_pending().await?;
        if pending.is_empty() {
            return Ok(PassStats::default());
        }
        self.process_batch(pending, false).await
    }

    /// Step 1: WAITING items whose predecessor reached SUCCESS (or was
    /// purged after it) become PENDING.
    pub async fn promote_waiting(&self) -> Result<usize> {
        let waiting = self.outbox.get_waiting().await?;
        let mut promoted = 0;

        for item in waiting {
            let release = match &item.original_queue_id {
                None => true,
                Some(orig_id) => match self.outbox.get(orig_id).await? {
                    None => true,
                    Some(orig) => orig.status == OutboxStatus::Success,
                },
            };

            if release
                && self
                    .outbox
                    .try_update_status(&item.id, OutboxStatus::Waiting, OutboxStatus::Pending)
                    .await?
            {
                debug!(queue_id = %item.id, "promoted waiting item");
                promoted += 1;
            }
        }

        Ok(promoted)
    }

    async fn process_batch(&self, pending: Vec<OutboxItem>, report: bool) -> Result<PassStats> {
        let mut stats = PassStats::default();
        let total = pending.len();

        for (index, item) in pending.into_iter().enumerate() {
            // The CAS is the only claim; losing it means another driver
            // owns the item.
            if !self
                .outbox
                .try_update_status(&item.id, OutboxStatus::Pending, OutboxStatus::Syncing)
                .await?
            {
                stats.skipped += 1;
                continue;
            }

            // Re-read after the claim: a coalesce may have touched the
            // body between the scan and the CAS.
            let item = match self.outbox.get(&item.id).await? {
                Some(current) => current,
                None => {
                    stats.skipped += 1;
                    continue;
                }
            };

            let outcome = self.process_item(&item).await?;
            match outcome {
                ItemOutcome::Completed => {
                    stats.processed += 1;
                    if report {
                        let remaining = total - index - 1;
                        self.coordinator.update_progress(1, remaining).await;
                    }
                }
                ItemOutcome::Retrying => stats.retrying += 1,
                ItemOutcome::Parked => stats.parked += 1,
            }
        }

        Ok(stats)
    }

    async fn process_item(&self, item: &OutboxItem) -> Result<ItemOutcome> {
        debug!(
            queue_id = %item.id,
            kind = item.kind.as_str(),
            entity = item.entity_kind.as_str(),
            "processing item"
        );

        let result = match (item.entity_kind, item.kind) {
            (EntityKind::Memo, OpKind::Create) => self.create_memo(item).await,
            (EntityKind::Memo, OpKind::Update) => self.update_memo(item).await,
            (EntityKind::Memo, OpKind::Delete) => self.delete_memo(item).await,
            (EntityKind::Shelf, OpKind::Create) => self.create_shelf(item).await,
            (EntityKind::Shelf, OpKind::Update) => self.update_shelf(item).await,
            (EntityKind::Shelf, OpKind::Delete) => self.delete_shelf(item).await,
        };

        match result {
            Ok(()) => {
                self.outbox.mark_success(&item.id).await?;
                Ok(ItemOutcome::Completed)
            }
            Err(SyncError::Api(e)) if e.is_transient() => {
                self.mark_entity_failed(item).await?;
                let updated = self.outbox.mark_failed(&item.id, &e.to_string()).await?;
                if updated.retry_count >= self.config.max_retries {
                    Ok(ItemOutcome::Parked)
                } else {
                    Ok(ItemOutcome::Retrying)
                }
            }
            Err(e) => {
                warn!(queue_id = %item.id, "terminal failure: {}", e);
                self.mark_entity_failed(item).await?;
                self.outbox.park(&item.id, &e.to_string()).await?;
                Ok(ItemOutcome::Parked)
            }
        }
    }

    // ---- memo operations ----

    async fn create_memo(&self, item: &OutboxItem) -> Result<()> {
        let Some(mut memo) = self.store.get_memo(&item.local_ref).await? else {
            warn!(queue_id = %item.id, "memo vanished before CREATE, dropping item");
            return Ok(());
        };

        memo.sync_status = SyncStatus::SyncingCreate;
        memo.sync_queue_id = Some(item.id.clone());
        self.store.put_memo(&memo).await?;

        let response = self
            .api
            .create_memo(&item.payload, item.idempotency_key)
            .await?;
        self.adopt_memo_server_id(memo, response.id, item).await
    }

    async fn update_memo(&self, item: &OutboxItem) -> Result<()> {
        let server_ref = require_server_ref(item)?;
        let Some(mut memo) = self.store.get_memo(&item.local_ref).await? else {
            warn!(queue_id = %item.id, "memo vanished before UPDATE, dropping item");
            return Ok(());
        };

        memo.sync_status = SyncStatus::SyncingUpdate;
        memo.sync_queue_id = Some(item.id.clone());
        self.store.put_memo(&memo).await?;

        self.api.update_memo(server_ref, &item.payload).await?;

        // Reload before finishing; concurrent facade edits win.
        let mut memo = self
            .store
            .get_memo(&item.local_ref)
            .await?
            .unwrap_or(memo);
        memo.server_id.get_or_insert(server_ref);
        let more_work = self.remaining_active(&item.local_ref, &item.id).await?;
        memo.sync_status = if more_work {
            SyncStatus::Pending
        } else {
            SyncStatus::Synced
        };
        memo.sync_queue_id = None;
        memo.updated_at = Utc::now();
        self.store.put_memo(&memo).await?;

        if more_work {
            return Ok(());
        }
        self.apply_memo_retention(&memo).await
    }

    async fn delete_memo(&self, item: &OutboxItem) -> Result<()> {
        let server_ref = require_server_ref(item)?;
        if let Some(mut memo) = self.store.get_memo(&item.local_ref).await? {
            memo.sync_status = SyncStatus::SyncingDelete;
            memo.sync_queue_id = Some(item.id.clone());
            self.store.put_memo(&memo).await?;
        }

        match self.api.delete_memo(server_ref).await {
            Ok(()) => {}
            // Already gone server-side is success for a delete.
            Err(ApiError::NotFound(_)) => {
                debug!(queue_id = %item.id, "memo already deleted server-side");
            }
            Err(e) => return Err(e.into()),
        }

        self.store.delete_memo(&item.local_ref).await?;
        Ok(())
    }

    async fn adopt_memo_server_id(
        &self,
        memo: MemoRecord,
        server_id: i64,
        item: &OutboxItem,
    ) -> Result<()> {
        // Reload: the facade may have edited the row while the request
        // was in flight, and those edits must not be stomped.
        let mut memo = self
            .store
            .get_memo(&item.local_ref)
            .await?
            .unwrap_or(memo);

        match memo.server_id {
            None => memo.server_id = Some(server_id),
            Some(existing) if existing != server_id => {
                // A server id never changes once set; the duplicate row
                // the server answered with is the one we keep pointing at.
                warn!(
                    local_id = %memo.local_id,
                    existing,
                    server_id,
                    "CREATE answered with a different server id, keeping existing"
                );
            }
            Some(_) => {}
        }

        let more_work = self.remaining_active(&item.local_ref, &item.id).await?;
        memo.sync_status = if more_work {
            SyncStatus::Pending
        } else {
            SyncStatus::Synced
        };
        memo.sync_queue_id = None;
        memo.updated_at = Utc::now();
        self.store.put_memo(&memo).await?;

        self.cascade_server_ref(&item.local_ref, memo.server_id.unwrap_or(server_id))
            .await?;
        if !more_work {
            self.apply_memo_retention(&memo).await?;
        }
        Ok(())
    }

    /// Drop a memo authored outside the retention window; it lives on
    /// the server now and comes back on demand.
    async fn apply_memo_retention(&self, memo: &MemoRecord) -> Result<()> {
        let age = Utc::now() - memo.memo_start_time;
        if age > self.config.retention_window {
            info!(
                local_id = %memo.local_id,
                days = age.num_days(),
                "retention drop after sync"
            );
            self.store.delete_memo(&memo.local_id).await?;
        }
        Ok(())
    }

    // ---- shelf operations ----

    async fn create_shelf(&self, item: &OutboxItem) -> Result<()> {
        let Some(mut shelf) = self.store.get_shelf(&item.local_ref).await? else {
            warn!(queue_id = %item.id, "shelf entry vanished before CREATE, dropping item");
            return Ok(());
        };

        shelf.sync_status = SyncStatus::SyncingCreate;
        shelf.sync_queue_id = Some(item.id.clone());
        self.store.put_shelf(&shelf).await?;

        let server_id = match self
            .api
            .create_book(&item.payload, item.idempotency_key)
            .await
        {
            Ok(response) => response.user_book_id,
            Err(ApiError::Conflict(msg)) => {
                // The shelf already holds this book; adopt the existing
                // server row instead of failing the item.
                match self.disambiguate_shelf(&shelf).await? {
                    Some(id) => {
                        info!(isbn = %shelf.isbn, server_id = id, "conflict resolved by isbn");
                        id
                    }
                    None => return Err(SyncError::Api(ApiError::Conflict(msg))),
                }
            }
            Err(e) => return Err(e.into()),
        };

        // Reload before finishing; concurrent facade edits win.
        let mut shelf = self
            .store
            .get_shelf(&item.local_ref)
            .await?
            .unwrap_or(shelf);

        match shelf.server_id {
            None => shelf.server_id = Some(server_id),
            Some(existing) if existing != server_id => {
                warn!(
                    local_id = %shelf.local_id,
                    existing,
                    server_id,
                    "CREATE answered with a different server id, keeping existing"
                );
            }
            Some(_) => {}
        }

        shelf.sync_status = if self.remaining_active(&item.local_ref, &item.id).await? {
            SyncStatus::Pending
        } else {
            SyncStatus::Synced
        };
        shelf.sync_queue_id = None;
        self.store.put_shelf(&shelf).await?;

        self.cascade_server_ref(&item.local_ref, shelf.server_id.unwrap_or(server_id))
            .await?;
        Ok(())
    }

    async fn update_shelf(&self, item: &OutboxItem) -> Result<()> {
        let server_ref = require_server_ref(item)?;
        let Some(mut shelf) = self.store.get_shelf(&item.local_ref).await? else {
            warn!(queue_id = %item.id, "shelf entry vanished before UPDATE, dropping item");
            return Ok(());
        };

        shelf.sync_status = SyncStatus::SyncingUpdate;
        shelf.sync_queue_id = Some(item.id.clone());
        self.store.put_shelf(&shelf).await?;

        self.api.update_book(server_ref, &item.payload).await?;

        // Reload before finishing; concurrent facade edits win.
        let mut shelf = self
            .store
            .get_shelf(&item.local_ref)
            .await?
            .unwrap_or(shelf);
        shelf.server_id.get_or_insert(server_ref);
        shelf.sync_status = if self.remaining_active(&item.local_ref, &item.id).await? {
            SyncStatus::Pending
        } else {
            SyncStatus::Synced
        };
        shelf.sync_queue_id = None;
        self.store.put_shelf(&shelf).await?;
        Ok(())
    }

    async fn delete_shelf(&self, item: &OutboxItem) -> Result<()> {
        let server_ref = require_server_ref(item)?;
        if let Some(mut shelf) = self.store.get_shelf(&item.local_ref).await? {
            shelf.sync_status = SyncStatus::SyncingDelete;
            shelf.sync_queue_id = Some(item.id.clone());
            self.store.put_shelf(&shelf).await?;
        }

        match self.api.delete_book(server_ref).await {
            Ok(()) => {}
            Err(ApiError::NotFound(_)) => {
                debug!(queue_id = %item.id, "shelf entry already deleted server-side");
            }
            Err(e) => return Err(e.into()),
        }

        self.store.delete_shelf(&item.local_ref).await?;
        Ok(())
    }

    /// Conflict disambiguation: find the server row by ISBN.
    async fn disambiguate_shelf(&self, shelf: &ShelfRecord) -> Result<Option<i64>> {
        let books = self.api.list_books().await?;
        Ok(books
            .into_iter()
            .find(|b| b.isbn == shelf.isbn)
            .map(|b| b.user_book_id))
    }

    // ---- shared ----

    /// Whether other unfinished queue items still govern this entity.
    async fn remaining_active(&self, local_ref: &Uuid, current_id: &str) -> Result<bool> {
        Ok(self
            .outbox
            .get_by_local_ref(local_ref)
            .await?
            .iter()
            .any(|queued| {
                queued.id != current_id
                    && matches!(
                        queued.status,
                        OutboxStatus::Pending | OutboxStatus::Waiting | OutboxStatus::Syncing
                    )
            }))
    }

    /// Cascade: after a CREATE assigns a server id, backfill it into
    /// every queued UPDATE/DELETE for the same entity.
    async fn cascade_server_ref(&self, local_ref: &Uuid, server_id: i64) -> Result<usize> {
        let items = self.outbox.get_by_local_ref(local_ref).await?;
        let mut patched = 0;

        for mut queued in items {
            if queued.server_ref.is_none()
                && matches!(queued.kind, OpKind::Update | OpKind::Delete)
            {
                queued.server_ref = Some(server_id);
                self.outbox.update(&mut queued).await?;
                patched += 1;
            }
        }

        if patched > 0 {
            debug!(entity = %local_ref, server_id, patched, "cascaded server id");
        }
        Ok(patched)
    }

    async fn mark_entity_failed(&self, item: &OutboxItem) -> Result<()> {
        match item.entity_kind {
            EntityKind::Memo => {
                if let Some(mut memo) = self.store.get_memo(&item.local_ref).await? {
                    memo.sync_status = SyncStatus::Failed;
                    self.store.put_memo(&memo).await?;
                }
            }
            EntityKind::Shelf => {
                if let Some(mut shelf) = self.store.get_shelf(&item.local_ref).await? {
                    shelf.sync_status = SyncStatus::Failed;
                    self.store.put_shelf(&shelf).await?;
                }
            }
        }
        Ok(())
    }

    /// Sweep: remove synced memos idle past the sweep age. Shelf entries
    /// are the user's library and never swept.
    pub async fn run_sweep(&self) -> Result<usize> {
        let cutoff = Utc::now() - self.config.sweep_age;
        let idle = self.store.synced_memos_idle_before(cutoff).await?;
        let count = idle.len();

        for memo in idle {
            self.store.delete_memo(&memo.local_id).await?;
        }

        if count > 0 {
            info!(count, "swept idle synced memos");
        }
        Ok(count)
    }
}

fn require_server_ref(item: &OutboxItem) -> Result<i64> {
    item.server_ref.ok_or_else(|| {
        SyncError::InvariantViolation(format!(
            "{} item {} for {} has no server ref",
            item.kind.as_str(),
            item.id,
            item.local_ref
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagemark_api::ApiConfig;
    use serde_json::json;

    /// Engine wired to an address nothing listens on; paths that reach
    /// the network fail transiently, paths that do not never notice.
    async fn engine() -> (SyncEngine, AsyncStore, OutboxQueue) {
        let store = AsyncStore::open_in_memory().await.unwrap();
        let bus = EventBus::new();
        let config = SyncConfig {
            backoff_base: std::time::Duration::from_millis(20),
            ..SyncConfig::default()
        };
        let outbox = OutboxQueue::new(store.clone(), config.clone());
        let coordinator = SyncCoordinator::new(store.clone(), bus.clone());
        let api = ApiClient::new(
            ApiConfig {
                request_timeout: std::time::Duration::from_millis(200),
                ..ApiConfig::default()
            }
            .with_base_url("http://192.0.2.1:9/api/v1"),
        )
        .unwrap();
        (
            SyncEngine::new(store.clone(), outbox.clone(), coordinator, api, bus, config),
            store,
            outbox,
        )
    }

    #[tokio::test]
    async fn promote_releases_items_behind_success() {
        let (engine, _store, outbox) = engine().await;
        let entity = Uuid::new_v4();

        let create = outbox
            .enqueue_mutation(OpKind::Create, EntityKind::Memo, entity, None, json!({}))
            .await
            .unwrap();
        let create_id = create.item().unwrap().id.clone();
        outbox
            .try_update_status(&create_id, OutboxStatus::Pending, OutboxStatus::Syncing)
            .await
            .unwrap();

        let delete = outbox
            .enqueue_mutation(
                OpKind::Delete,
                EntityKind::Memo,
                entity,
                None,
                serde_json::Value::Null,
            )
            .await
            .unwrap();
        let delete_id = delete.item().unwrap().id.clone();

        // Predecessor still in flight: nothing moves.
        assert_eq!(engine.promote_waiting().await.unwrap(), 0);

        outbox.mark_success(&create_id).await.unwrap();
        assert_eq!(engine.promote_waiting().await.unwrap(), 1);

        let item = outbox.get(&delete_id).await.unwrap().unwrap();
        assert_eq!(item.status, OutboxStatus::Pending);
    }

    #[tokio::test]
    async fn promote_releases_items_whose_predecessor_was_purged() {
        let (engine, _store, outbox) = engine().await;
        let entity = Uuid::new_v4();

        let create = outbox
            .enqueue_mutation(OpKind::Create, EntityKind::Memo, entity, None, json!({}))
            .await
            .unwrap();
        let create_id = create.item().unwrap().id.clone();
        outbox
            .try_update_status(&create_id, OutboxStatus::Pending, OutboxStatus::Syncing)
            .await
            .unwrap();

        outbox
            .enqueue_mutation(
                OpKind::Delete,
                EntityKind::Memo,
                entity,
                None,
                serde_json::Value::Null,
            )
            .await
            .unwrap();

        outbox.mark_success(&create_id).await.unwrap();
        outbox.remove(&create_id).await.unwrap();

        assert_eq!(engine.promote_waiting().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn update_without_server_ref_parks_terminally() {
        let (engine, store, outbox) = engine().await;

        let memo = MemoRecord::new(7, "note".to_string(), vec![], None, Utc::now());
        store.put_memo(&memo).await.unwrap();

        // Force an UPDATE with no server ref past the enqueue guards.
        let item = OutboxItem::new(
            OpKind::Update,
            EntityKind::Memo,
            memo.local_id,
            None,
            json!({"content": "x"}),
        );
        store.insert_queue_item(&item).await.unwrap();

        let stats = engine.run_pass().await.unwrap();
        assert_eq!(stats.parked, 1);
        assert_eq!(stats.processed, 0);

        let parked = outbox.get(&item.id).await.unwrap().unwrap();
        assert_eq!(parked.status, OutboxStatus::Failed);
        assert!(parked.last_error.as_deref().unwrap().contains("server ref"));

        let entity = store.get_memo(&memo.local_id).await.unwrap().unwrap();
        assert_eq!(entity.sync_status, SyncStatus::Failed);
    }

    #[tokio::test]
    async fn create_for_vanished_entity_completes_and_purges() {
        let (engine, _store, outbox) = engine().await;

        let outcome = outbox
            .enqueue_mutation(
                OpKind::Create,
                EntityKind::Memo,
                Uuid::new_v4(),
                None,
                json!({"content": "orphan"}),
            )
            .await
            .unwrap();
        let id = outcome.item().unwrap().id.clone();

        let stats = engine.run_pass().await.unwrap();
        assert_eq!(stats.processed, 1);

        // SUCCESS with no waiters purges on the next pass.
        engine.run_pass().await.unwrap();
        assert!(outbox.get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn transient_failure_marks_entity_failed_and_rearms() {
        let (engine, store, outbox) = engine().await;

        let memo = MemoRecord::new(7, "offline note".to_string(), vec![], None, Utc::now());
        store.put_memo(&memo).await.unwrap();
        let outcome = outbox
            .enqueue_mutation(
                OpKind::Create,
                EntityKind::Memo,
                memo.local_id,
                None,
                json!({"content": "offline note"}),
            )
            .await
            .unwrap();
        let id = outcome.item().unwrap().id.clone();

        // The API address is unreachable: transient failure.
        let stats = engine.run_pass().await.unwrap();
        assert_eq!(stats.retrying, 1);

        let entity = store.get_memo(&memo.local_id).await.unwrap().unwrap();
        assert_eq!(entity.sync_status, SyncStatus::Failed);

        let item = outbox.get(&id).await.unwrap().unwrap();
        assert_eq!(item.retry_count, 1);
    }
}
