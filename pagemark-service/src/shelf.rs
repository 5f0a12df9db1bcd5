//! Shelf facade
//!
//! Same hybrid policy as the memo facade. Shelf entries are the user's
//! library: they are cached in full and never swept.

use chrono::{NaiveDate, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use pagemark_api::ApiClient;
use pagemark_net::NetworkProbe;
use pagemark_proto::shelf::{ShelfResponse, ShelfUpdatePayload, StartReadingPayload};
use pagemark_proto::{EntityRef, Event, EventBus, ReadingCategory};
use pagemark_store::{AsyncStore, EntityKind, OpKind, ShelfRecord, SyncStatus};
use pagemark_sync::{EnqueueOutcome, OutboxQueue, RequestGate, SyncCoordinator};

use crate::errors::{Result, ServiceError};
use crate::mapping;
use crate::policy::{read_route, write_route, ReadRoute, WriteRoute};

/// Input for adding a book to the shelf.
#[derive(Debug, Clone)]
pub struct NewShelfEntry {
    pub book_id: Option<i64>,
    pub isbn: String,
    pub title: String,
    pub author: Option<String>,
    pub publisher: Option<String>,
    pub pub_date: Option<NaiveDate>,
    pub description: Option<String>,
    pub cover_url: Option<String>,
    pub total_pages: Option<i64>,
    pub main_genre: Option<String>,
    pub category: ReadingCategory,
    pub expectation: Option<String>,
    pub purchase_type: Option<String>,
}

#[derive(Clone)]
pub struct ShelfService {
    store: AsyncStore,
    outbox: OutboxQueue,
    gate: RequestGate,
    coordinator: SyncCoordinator,
    probe: NetworkProbe,
    api: ApiClient,
    bus: EventBus,
}

impl ShelfService {
    pub fn new(
        store: AsyncStore,
        outbox: OutboxQueue,
        gate: RequestGate,
        coordinator: SyncCoordinator,
        probe: NetworkProbe,
        api: ApiClient,
        bus: EventBus,
    ) -> Self {
        Self {
            store,
            outbox,
            gate,
            coordinator,
            probe,
            api,
            bus,
        }
    }

    async fn route(&self) -> WriteRoute {
        write_route(
            self.probe.is_online().await,
            self.coordinator.is_syncing().await,
        )
    }

    // ---- writes ----

    pub async fn add_book(&self, input: NewShelfEntry) -> Result<ShelfRecord> {
        match self.route().await {
            WriteRoute::StoreFirst => {
                let record = new_shelf_record(input);
                self.finish_store_first(record).await
            }
            WriteRoute::ServerFirst => self.add_server_first(input).await,
            WriteRoute::Defer => {
                let service = self.clone();
                let rx = self
                    .gate
                    .defer(move || async move { service.add_server_first(input).await })
                    .await;
                rx.await.map_err(|_| ServiceError::Cancelled)?
            }
        }
    }

    async fn add_server_first(&self, input: NewShelfEntry) -> Result<ShelfRecord> {
        let mut record = new_shelf_record(input);
        let payload = mapping::shelf_create_payload(&record);

        match self.api.create_book(&payload, Uuid::new_v4()).await {
            Ok(response) => {
                record.server_id = Some(response.user_book_id);
                record.book_id = response.book_id.or(record.book_id);
                record.sync_status = SyncStatus::Synced;
                self.store.put_shelf(&record).await?;
                Ok(record)
            }
            Err(e) if e.is_network_class() => {
                warn!("add-book fell back to offline path: {}", e);
                self.finish_store_first(record).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn finish_store_first(&self, mut record: ShelfRecord) -> Result<ShelfRecord> {
        record.sync_status = SyncStatus::Pending;
        self.store.put_shelf(&record).await?;

        let payload = serde_json::to_value(mapping::shelf_create_payload(&record))?;
        let outcome = self
            .outbox
            .enqueue_mutation(
                OpKind::Create,
                EntityKind::Shelf,
                record.local_id,
                None,
                payload,
            )
            .await?;

        if let Some(item) = outcome.item() {
            record.sync_queue_id = Some(item.id.clone());
            self.store.put_shelf(&record).await?;
        }

        info!(local_id = %record.local_id, isbn = %record.isbn, "shelf entry queued for sync");
        self.bus.publish(Event::SyncDeferred);
        Ok(record)
    }

    pub async fn update_book(
        &self,
        local_id: Uuid,
        update: ShelfUpdatePayload,
    ) -> Result<ShelfRecord> {
        match self.route().await {
            WriteRoute::StoreFirst => self.update_store_first(local_id, update).await,
            WriteRoute::ServerFirst => self.update_server_first(local_id, update).await,
            WriteRoute::Defer => {
                let service = self.clone();
                let rx = self
                    .gate
                    .defer(
                        move || async move { service.update_server_first(local_id, update).await },
                    )
                    .await;
                rx.await.map_err(|_| ServiceError::Cancelled)?
            }
        }
    }

    async fn update_server_first(
        &self,
        local_id: Uuid,
        update: ShelfUpdatePayload,
    ) -> Result<ShelfRecord> {
        let mut record = self.require_shelf(&local_id).await?;
        mapping::apply_shelf_update(&mut record, &update);

        let Some(server_id) = record.server_id else {
            return self.enqueue_update(record, update).await;
        };

        match self.api.update_book(server_id, &update).await {
            Ok(()) => {
                record.sync_status = SyncStatus::Synced;
                record.sync_queue_id = None;
                self.store.put_shelf(&record).await?;
                Ok(record)
            }
            Err(e) if e.is_network_class() => {
                warn!("update-book fell back to offline path: {}", e);
                self.enqueue_update(record, update).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update_store_first(
        &self,
        local_id: Uuid,
        update: ShelfUpdatePayload,
    ) -> Result<ShelfRecord> {
        let mut record = self.require_shelf(&local_id).await?;
        mapping::apply_shelf_update(&mut record, &update);
        self.enqueue_update(record, update).await
    }

    async fn enqueue_update(
        &self,
        mut record: ShelfRecord,
        update: ShelfUpdatePayload,
    ) -> Result<ShelfRecord> {
        let payload = serde_json::to_value(&update)?;
        let outcome = self
            .outbox
            .enqueue_mutation(
                OpKind::Update,
                EntityKind::Shelf,
                record.local_id,
                record.server_id,
                payload,
            )
            .await?;

        match &outcome {
            EnqueueOutcome::Waiting(item) => {
                record.sync_status = SyncStatus::Waiting;
                record.sync_queue_id = Some(item.id.clone());
            }
            EnqueueOutcome::Enqueued(item) | EnqueueOutcome::Coalesced(item) => {
                record.sync_status = SyncStatus::Pending;
                record.sync_queue_id = Some(item.id.clone());
            }
            EnqueueOutcome::CancelledLocalDraft { .. } => {}
        }

        self.store.put_shelf(&record).await?;
        self.bus.publish(Event::SyncDeferred);
        Ok(record)
    }

    pub async fn delete_book(&self, local_id: Uuid) -> Result<()> {
        match self.route().await {
            WriteRoute::StoreFirst => self.delete_store_first(local_id).await,
            WriteRoute::ServerFirst => self.delete_server_first(local_id).await,
            WriteRoute::Defer => {
                let service = self.clone();
                let rx = self
                    .gate
                    .defer(move || async move { service.delete_server_first(local_id).await })
                    .await;
                rx.await.map_err(|_| ServiceError::Cancelled)?
            }
        }
    }

    async fn delete_server_first(&self, local_id: Uuid) -> Result<()> {
        let record = self.require_shelf(&local_id).await?;

        let Some(server_id) = record.server_id else {
            return self.delete_store_first(local_id).await;
        };

        match self.api.delete_book(server_id).await {
            Ok(()) | Err(pagemark_api::ApiError::NotFound(_)) => {
                self.store.delete_shelf(&local_id).await?;
                Ok(())
            }
            Err(e) if e.is_network_class() => {
                warn!("delete-book fell back to offline path: {}", e);
                self.delete_store_first(local_id).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_store_first(&self, local_id: Uuid) -> Result<()> {
        let Some(mut record) = self.store.get_shelf(&local_id).await? else {
            return Ok(());
        };

        let outcome = self
            .outbox
            .enqueue_mutation(
                OpKind::Delete,
                EntityKind::Shelf,
                local_id,
                record.server_id,
                serde_json::Value::Null,
            )
            .await?;

        match &outcome {
            EnqueueOutcome::CancelledLocalDraft { .. } => {
                self.store.delete_shelf(&local_id).await?;
                debug!(local_id = %local_id, "local draft cancelled");
            }
            EnqueueOutcome::Waiting(item) => {
                record.sync_status = SyncStatus::Waiting;
                record.sync_queue_id = Some(item.id.clone());
                self.store.put_shelf(&record).await?;
            }
            EnqueueOutcome::Enqueued(item) | EnqueueOutcome::Coalesced(item) => {
                record.sync_status = SyncStatus::Pending;
                record.sync_queue_id = Some(item.id.clone());
                self.store.put_shelf(&record).await?;
            }
        }
        self.bus.publish(Event::SyncDeferred);
        Ok(())
    }

    /// Record the moment the user starts reading.
    pub async fn start_reading(
        &self,
        local_id: Uuid,
        payload: StartReadingPayload,
    ) -> Result<ShelfRecord> {
        let record = self.require_shelf(&local_id).await?;
        let online = self.probe.is_online().await;

        if online && !self.coordinator.is_syncing().await {
            if let Some(server_id) = record.server_id {
                match self.api.start_reading(server_id, &payload).await {
                    Ok(()) => {
                        let mut record = record;
                        apply_start_reading(&mut record, &payload);
                        record.sync_status = SyncStatus::Synced;
                        self.store.put_shelf(&record).await?;
                        return Ok(record);
                    }
                    Err(e) if e.is_network_class() => {
                        warn!("start-reading fell back to offline path: {}", e);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        // Offline path: the state change replays as a partial update.
        let mut record = record;
        apply_start_reading(&mut record, &payload);
        let update = ShelfUpdatePayload {
            category: Some(ReadingCategory::Reading),
            last_read_page: Some(payload.reading_progress),
            last_read_at: record.last_read_at,
            purchase_type: payload.purchase_type.clone(),
            ..Default::default()
        };
        self.enqueue_update(record, update).await
    }

    // ---- reads ----

    /// The whole shelf, server-first with store fallback.
    pub async fn list_books(&self) -> Result<Vec<ShelfRecord>> {
        match read_route(self.probe.is_online().await) {
            ReadRoute::ServerFirst => match self.api.list_books().await {
                Ok(responses) => {
                    let mut records = Vec::with_capacity(responses.len());
                    for response in &responses {
                        records.push(self.cache_shelf(response).await?);
                    }
                    Ok(records)
                }
                Err(e) if e.is_network_class() => {
                    warn!("shelf read fell back to the store: {}", e);
                    Ok(self.store.all_shelves().await?)
                }
                Err(e) => Err(e.into()),
            },
            ReadRoute::StoreOnly => Ok(self.store.all_shelves().await?),
        }
    }

    /// One shelf entry by either identity. Offline, the stored
    /// bibliographic block is the detail view.
    pub async fn book_detail(&self, entity: EntityRef) -> Result<ShelfRecord> {
        let found = match entity {
            EntityRef::Local(local_id) => self.store.get_shelf(&local_id).await?,
            EntityRef::Server(server_id) => {
                if self.probe.is_online().await {
                    let books = self.list_books().await?;
                    books.into_iter().find(|b| b.server_id == Some(server_id))
                } else {
                    self.store.get_shelf_by_server_id(Some(server_id)).await?
                }
            }
        };

        found.ok_or_else(|| ServiceError::NotFound(format!("shelf entry {}", entity)))
    }

    pub async fn books_by_category(&self, category: ReadingCategory) -> Result<Vec<ShelfRecord>> {
        Ok(self.store.shelves_by_category(category).await?)
    }

    // ---- helpers ----

    async fn require_shelf(&self, local_id: &Uuid) -> Result<ShelfRecord> {
        self.store
            .get_shelf(local_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("shelf entry {}", local_id)))
    }

    /// Reconcile one server shelf entry into the store; rows with
    /// pending local changes win until their replay finishes.
    async fn cache_shelf(&self, response: &ShelfResponse) -> Result<ShelfRecord> {
        match self
            .store
            .get_shelf_by_server_id(Some(response.user_book_id))
            .await?
        {
            Some(record) if record.sync_status == SyncStatus::Synced => {
                let mut fresh = mapping::shelf_record_from_response(response);
                fresh.local_id = record.local_id;
                fresh.added_at = record.added_at;
                self.store.put_shelf(&fresh).await?;
                Ok(fresh)
            }
            Some(record) => Ok(record),
            None => {
                let record = mapping::shelf_record_from_response(response);
                self.store.put_shelf(&record).await?;
                Ok(record)
            }
        }
    }
}

fn new_shelf_record(input: NewShelfEntry) -> ShelfRecord {
    ShelfRecord {
        local_id: Uuid::new_v4(),
        server_id: None,
        book_id: input.book_id,
        isbn: input.isbn,
        title: input.title,
        author: input.author,
        publisher: input.publisher,
        pub_date: input.pub_date,
        description: input.description,
        cover_url: input.cover_url,
        total_pages: input.total_pages,
        main_genre: input.main_genre,
        category: input.category,
        expectation: input.expectation,
        last_read_page: None,
        last_read_at: None,
        reading_finished_date: None,
        purchase_type: input.purchase_type,
        rating: None,
        review: None,
        sync_status: SyncStatus::Pending,
        sync_queue_id: None,
        added_at: Utc::now(),
    }
}

fn apply_start_reading(record: &mut ShelfRecord, payload: &StartReadingPayload) {
    record.category = ReadingCategory::Reading;
    record.last_read_page = Some(payload.reading_progress);
    record.last_read_at = Some(Utc::now());
    if let Some(purchase_type) = &payload.purchase_type {
        record.purchase_type = Some(purchase_type.clone());
    }
}
