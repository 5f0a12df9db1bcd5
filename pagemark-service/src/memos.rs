//! Memo facade
//!
//! The write paths implement the hybrid policy: server-first when the
//! network is up and no cycle is running, deferred through the gate
//! while one is, store-first (enqueue) when offline or when a
//! network-class failure interrupts a server-first attempt. Reads are
//! server-first with a store fallback; every returned handle is a store
//! record so callers can keep mutating by `local_id`.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use pagemark_api::ApiClient;
use pagemark_net::NetworkProbe;
use pagemark_proto::memo::{MemoResponse, TodayFlowQuery};
use pagemark_proto::{Event, EventBus};
use pagemark_store::{AsyncStore, EntityKind, MemoRecord, OpKind, SyncStatus};
use pagemark_sync::{EnqueueOutcome, OutboxQueue, RequestGate, SyncCoordinator};

use crate::errors::{Result, ServiceError};
use crate::mapping;
use crate::policy::{read_route, write_route, ReadRoute, WriteRoute};

/// Input for a new memo.
#[derive(Debug, Clone)]
pub struct NewMemo {
    pub user_book_id: i64,
    pub content: String,
    pub tags: Vec<String>,
    pub page_number: Option<i64>,
    pub memo_start_time: DateTime<Utc>,
}

/// Partial memo edit; absent fields stay untouched.
#[derive(Debug, Clone, Default)]
pub struct MemoEdit {
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    pub page_number: Option<i64>,
}

/// Memos for one book in the today view.
#[derive(Debug, Clone)]
pub struct BookMemos {
    pub user_book_id: i64,
    pub book_title: Option<String>,
    pub memos: Vec<MemoRecord>,
}

/// Memos sharing one tag in the today view.
#[derive(Debug, Clone)]
pub struct TagMemos {
    pub tag: String,
    pub memos: Vec<MemoRecord>,
}

/// Aggregated today view, served from the API or the store.
#[derive(Debug, Clone, Default)]
pub struct TodayFlow {
    pub memos_by_book: Vec<BookMemos>,
    pub memos_by_tag: Vec<TagMemos>,
    pub total_memo_count: u64,
}

#[derive(Clone)]
pub struct MemoService {
    store: AsyncStore,
    outbox: OutboxQueue,
    gate: RequestGate,
    coordinator: SyncCoordinator,
    probe: NetworkProbe,
    api: ApiClient,
    bus: EventBus,
}

impl MemoService {
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

    pub async fn create_memo(&self, input: NewMemo) -> Result<MemoRecord> {
        match self.route().await {
            WriteRoute::StoreFirst => self.create_store_first(input).await,
            WriteRoute::ServerFirst => self.create_server_first(input).await,
            WriteRoute::Defer => {
                let service = self.clone();
                let rx = self
                    .gate
                    .defer(move || async move { service.create_server_first(input).await })
                    .await;
                rx.await.map_err(|_| ServiceError::Cancelled)?
            }
        }
    }

    async fn create_server_first(&self, input: NewMemo) -> Result<MemoRecord> {
        let mut record = MemoRecord::new(
            input.user_book_id,
            input.content,
            input.tags,
            input.page_number,
            input.memo_start_time,
        );

        let payload = mapping::memo_payload(&record);
        match self.api.create_memo(&payload, Uuid::new_v4()).await {
            Ok(response) => {
                mapping::apply_memo_response(&mut record, &response);
                self.store.put_memo(&record).await?;
                Ok(record)
            }
            Err(e) if e.is_network_class() => {
                warn!("create fell back to offline path: {}", e);
                self.finish_store_first(record).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn create_store_first(&self, input: NewMemo) -> Result<MemoRecord> {
        let record = MemoRecord::new(
            input.user_book_id,
            input.content,
            input.tags,
            input.page_number,
            input.memo_start_time,
        );
        self.finish_store_first(record).await
    }

    async fn finish_store_first(&self, mut record: MemoRecord) -> Result<MemoRecord> {
        record.sync_status = SyncStatus::Pending;
        self.store.put_memo(&record).await?;

        let payload = serde_json::to_value(mapping::memo_payload(&record))?;
        let outcome = self
            .outbox
            .enqueue_mutation(
                OpKind::Create,
                EntityKind::Memo,
                record.local_id,
                None,
                payload,
            )
            .await?;

        if let Some(item) = outcome.item() {
            record.sync_queue_id = Some(item.id.clone());
            self.store.put_memo(&record).await?;
        }

        info!(local_id = %record.local_id, "memo queued for sync");
        self.bus.publish(Event::SyncDeferred);
        Ok(record)
    }

    pub async fn update_memo(&self, local_id: Uuid, edit: MemoEdit) -> Result<MemoRecord> {
        match self.route().await {
            WriteRoute::StoreFirst => self.update_store_first(local_id, edit).await,
            WriteRoute::ServerFirst => self.update_server_first(local_id, edit).await,
            WriteRoute::Defer => {
                let service = self.clone();
                let rx = self
                    .gate
                    .defer(move || async move { service.update_server_first(local_id, edit).await })
                    .await;
                rx.await.map_err(|_| ServiceError::Cancelled)?
            }
        }
    }

    async fn update_server_first(&self, local_id: Uuid, edit: MemoEdit) -> Result<MemoRecord> {
        let mut record = self.require_memo(&local_id).await?;
        apply_edit(&mut record, &edit);

        let Some(server_id) = record.server_id else {
            // Draft the server has not seen: the edit rides in the
            // queued CREATE body.
            return self.enqueue_update(record).await;
        };

        match self
            .api
            .update_memo(server_id, &mapping::memo_payload(&record))
            .await
        {
            Ok(response) => {
                mapping::apply_memo_response(&mut record, &response);
                self.store.put_memo(&record).await?;
                Ok(record)
            }
            Err(e) if e.is_network_class() => {
                warn!("update fell back to offline path: {}", e);
                self.enqueue_update(record).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update_store_first(&self, local_id: Uuid, edit: MemoEdit) -> Result<MemoRecord> {
        let mut record = self.require_memo(&local_id).await?;
        apply_edit(&mut record, &edit);
        self.enqueue_update(record).await
    }

    async fn enqueue_update(&self, mut record: MemoRecord) -> Result<MemoRecord> {
        record.updated_at = Utc::now();

        let payload = serde_json::to_value(mapping::memo_payload(&record))?;
        let outcome = self
            .outbox
            .enqueue_mutation(
                OpKind::Update,
                EntityKind::Memo,
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
            EnqueueOutcome::CancelledLocalDraft { .. } => {
                // enqueue_mutation never answers this for updates
            }
        }

        self.store.put_memo(&record).await?;
        self.bus.publish(Event::SyncDeferred);
        Ok(record)
    }

    pub async fn delete_memo(&self, local_id: Uuid) -> Result<()> {
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
        let record = self.require_memo(&local_id).await?;

        let Some(server_id) = record.server_id else {
            return self.delete_store_first(local_id).await;
        };

        match self.api.delete_memo(server_id).await {
            Ok(()) => {
                self.store.delete_memo(&local_id).await?;
                Ok(())
            }
            Err(pagemark_api::ApiError::NotFound(_)) => {
                self.store.delete_memo(&local_id).await?;
                Ok(())
            }
            Err(e) if e.is_network_class() => {
                warn!("delete fell back to offline path: {}", e);
                self.delete_store_first(local_id).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_store_first(&self, local_id: Uuid) -> Result<()> {
        let Some(mut record) = self.store.get_memo(&local_id).await? else {
            return Ok(());
        };

        let outcome = self
            .outbox
            .enqueue_mutation(
                OpKind::Delete,
                EntityKind::Memo,
                local_id,
                record.server_id,
                serde_json::Value::Null,
            )
            .await?;

        match &outcome {
            EnqueueOutcome::CancelledLocalDraft { .. } => {
                self.store.delete_memo(&local_id).await?;
                debug!(local_id = %local_id, "local draft cancelled");
            }
            EnqueueOutcome::Waiting(item) => {
                record.sync_status = SyncStatus::Waiting;
                record.sync_queue_id = Some(item.id.clone());
                self.store.put_memo(&record).await?;
            }
            EnqueueOutcome::Enqueued(item) | EnqueueOutcome::Coalesced(item) => {
                record.sync_status = SyncStatus::Pending;
                record.sync_queue_id = Some(item.id.clone());
                self.store.put_memo(&record).await?;
            }
        }
        self.bus.publish(Event::SyncDeferred);
        Ok(())
    }

    // ---- reads ----

    /// Today's memos grouped by book and by tag.
    pub async fn today_flow(&self, query: TodayFlowQuery) -> Result<TodayFlow> {
        match read_route(self.probe.is_online().await) {
            ReadRoute::ServerFirst => match self.api.today_flow(&query).await {
                Ok(response) => {
                    let flow = TodayFlow {
                        memos_by_book: response
                            .memos_by_book
                            .iter()
                            .map(|group| BookMemos {
                                user_book_id: group.user_book_id,
                                book_title: group.book_title.clone(),
                                memos: group
                                    .memos
                                    .iter()
                                    .map(mapping::memo_record_from_response)
                                    .collect(),
                            })
                            .collect(),
                        memos_by_tag: response
                            .memos_by_tag
                            .iter()
                            .map(|group| TagMemos {
                                tag: group.tag.clone(),
                                memos: group
                                    .memos
                                    .iter()
                                    .map(mapping::memo_record_from_response)
                                    .collect(),
                            })
                            .collect(),
                        total_memo_count: response.total_memo_count,
                    };

                    self.spawn_cache_write_through(
                        response
                            .memos_by_book
                            .into_iter()
                            .flat_map(|g| g.memos)
                            .collect(),
                    );
                    Ok(flow)
                }
                Err(e) if e.is_network_class() => {
                    warn!("today-flow fell back to the store: {}", e);
                    self.today_flow_local(query.date).await
                }
                Err(e) => Err(e.into()),
            },
            ReadRoute::StoreOnly => self.today_flow_local(query.date).await,
        }
    }

    async fn today_flow_local(&self, date: Option<NaiveDate>) -> Result<TodayFlow> {
        let date = date.unwrap_or_else(|| Utc::now().date_naive());
        let memos: Vec<MemoRecord> = self
            .store
            .all_memos()
            .await?
            .into_iter()
            .filter(|m| m.memo_start_time.date_naive() == date)
            .collect();

        let mut by_book: BTreeMap<i64, Vec<MemoRecord>> = BTreeMap::new();
        let mut by_tag: BTreeMap<String, Vec<MemoRecord>> = BTreeMap::new();
        let total = memos.len() as u64;

        for memo in memos {
            for tag in &memo.tags {
                by_tag.entry(tag.clone()).or_default().push(memo.clone());
            }
            by_book.entry(memo.user_book_id).or_default().push(memo);
        }

        Ok(TodayFlow {
            memos_by_book: by_book
                .into_iter()
                .map(|(user_book_id, memos)| BookMemos {
                    user_book_id,
                    book_title: None,
                    memos,
                })
                .collect(),
            memos_by_tag: by_tag
                .into_iter()
                .map(|(tag, memos)| TagMemos { tag, memos })
                .collect(),
            total_memo_count: total,
        })
    }

    /// Memos for one book, optionally restricted to a date.
    pub async fn memos_by_book(
        &self,
        user_book_id: i64,
        date: Option<NaiveDate>,
    ) -> Result<Vec<MemoRecord>> {
        match read_route(self.probe.is_online().await) {
            ReadRoute::ServerFirst => match self.api.memos_by_book(user_book_id, date).await {
                Ok(responses) => {
                    // Reconcile synchronously so the returned local ids
                    // are the stored ones.
                    let mut records = Vec::with_capacity(responses.len());
                    for response in &responses {
                        records.push(self.cache_memo(response).await?);
                    }
                    Ok(records)
                }
                Err(e) if e.is_network_class() => {
                    warn!("by-book read fell back to the store: {}", e);
                    self.memos_by_book_local(user_book_id, date).await
                }
                Err(e) => Err(e.into()),
            },
            ReadRoute::StoreOnly => self.memos_by_book_local(user_book_id, date).await,
        }
    }

    async fn memos_by_book_local(
        &self,
        user_book_id: i64,
        date: Option<NaiveDate>,
    ) -> Result<Vec<MemoRecord>> {
        let memos = self.store.memos_by_user_book(user_book_id).await?;
        Ok(match date {
            Some(date) => memos
                .into_iter()
                .filter(|m| m.memo_start_time.date_naive() == date)
                .collect(),
            None => memos,
        })
    }

    /// Days in a month that have memos.
    pub async fn memo_dates(&self, year: i32, month: u32) -> Result<Vec<NaiveDate>> {
        match read_route(self.probe.is_online().await) {
            ReadRoute::ServerFirst => match self.api.memo_dates(year, month).await {
                Ok(dates) => Ok(dates),
                Err(e) if e.is_network_class() => {
                    warn!("dates read fell back to the store: {}", e);
                    self.memo_dates_local(year, month).await
                }
                Err(e) => Err(e.into()),
            },
            ReadRoute::StoreOnly => self.memo_dates_local(year, month).await,
        }
    }

    async fn memo_dates_local(&self, year: i32, month: u32) -> Result<Vec<NaiveDate>> {
        let mut dates: Vec<NaiveDate> = self
            .store
            .all_memos()
            .await?
            .into_iter()
            .map(|m| m.memo_start_time.date_naive())
            .filter(|d| d.year() == year && d.month() == month)
            .collect();
        dates.sort();
        dates.dedup();
        Ok(dates)
    }

    // ---- helpers ----

    async fn require_memo(&self, local_id: &Uuid) -> Result<MemoRecord> {
        self.store
            .get_memo(local_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("memo {}", local_id)))
    }

    /// Reconcile one server memo into the store; a row with local edits
    /// pending wins until its replay finishes.
    async fn cache_memo(&self, response: &MemoResponse) -> Result<MemoRecord> {
        match self.store.get_memo_by_server_id(Some(response.id)).await? {
            Some(mut record) if record.sync_status == SyncStatus::Synced => {
                mapping::apply_memo_response(&mut record, response);
                self.store.put_memo(&record).await?;
                Ok(record)
            }
            Some(record) => Ok(record),
            None => {
                let record = mapping::memo_record_from_response(response);
                self.store.put_memo(&record).await?;
                Ok(record)
            }
        }
    }

    /// Best-effort cache fill; never blocks the read that spawned it.
    fn spawn_cache_write_through(&self, responses: Vec<MemoResponse>) {
        if responses.is_empty() {
            return;
        }
        let service = self.clone();
        tokio::spawn(async move {
            for response in &responses {
                if let Err(e) = service.cache_memo(response).await {
                    // Error sink for the fire-and-forget path.
                    tracing::error!(server_id = response.id, "cache write-through failed: {}", e);
                }
            }
            debug!(count = responses.len(), "cache write-through finished");
        });
    }
}

fn apply_edit(record: &mut MemoRecord, edit: &MemoEdit) {
    if let Some(content) = &edit.content {
        record.content = content.clone();
    }
    if let Some(tags) = &edit.tags {
        record.tags = tags.clone();
    }
    if let Some(page_number) = edit.page_number {
        record.page_number = Some(page_number);
    }
}
