//! Async-safe wrapper around the store
//!
//! SQLite connections are not Sync; the wrapper serializes access behind
//! a tokio Mutex so the store can be shared across async tasks and
//! await points, the same handle cloned into every component.

use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use pagemark_proto::ReadingCategory;

use crate::database::Store;
use crate::errors::Result;
use crate::models::{MemoRecord, OutboxItem, OutboxStatus, ShelfRecord, SyncStatus};

/// Clone-able async handle to the store.
#[derive(Clone)]
pub struct AsyncStore {
    inner: Arc<Mutex<Store>>,
}

impl AsyncStore {
    pub fn new(store: Store) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    /// Open or create the store at the given path.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let store = Store::open(path)?;
        Ok(Self::new(store))
    }

    /// Create an in-memory store (for testing).
    pub async fn open_in_memory() -> Result<Self> {
        let store = Store::open_in_memory()?;
        Ok(Self::new(store))
    }

    // ---- memos ----

    pub async fn put_memo(&self, memo: &MemoRecord) -> Result<()> {
        self.inner.lock().await.put_memo(memo)
    }

    pub async fn get_memo(&self, local_id: &Uuid) -> Result<Option<MemoRecord>> {
        self.inner.lock().await.get_memo(local_id)
    }

    pub async fn get_memo_by_server_id(&self, server_id: Option<i64>) -> Result<Option<MemoRecord>> {
        self.inner.lock().await.get_memo_by_server_id(server_id)
    }

    pub async fn get_all_memos_by_server_id(&self, server_id: i64) -> Result<Vec<MemoRecord>> {
        self.inner.lock().await.get_all_memos_by_server_id(server_id)
    }

    pub async fn delete_memo(&self, local_id: &Uuid) -> Result<()> {
        self.inner.lock().await.delete_memo(local_id)
    }

    pub async fn memos_by_status(&self, status: SyncStatus) -> Result<Vec<MemoRecord>> {
        self.inner.lock().await.memos_by_status(status)
    }

    pub async fn memos_by_user_book(&self, user_book_id: i64) -> Result<Vec<MemoRecord>> {
        self.inner.lock().await.memos_by_user_book(user_book_id)
    }

    pub async fn all_memos(&self) -> Result<Vec<MemoRecord>> {
        self.inner.lock().await.all_memos()
    }

    pub async fn synced_memos_idle_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<MemoRecord>> {
        self.inner.lock().await.synced_memos_idle_before(cutoff)
    }

    // ---- shelf entries ----

    pub async fn put_shelf(&self, shelf: &ShelfRecord) -> Result<()> {
        self.inner.lock().await.put_shelf(shelf)
    }

    pub async fn get_shelf(&self, local_id: &Uuid) -> Result<Option<ShelfRecord>> {
        self.inner.lock().await.get_shelf(local_id)
    }

    pub async fn get_shelf_by_server_id(
        &self,
        server_id: Option<i64>,
    ) -> Result<Option<ShelfRecord>> {
        self.inner.lock().await.get_shelf_by_server_id(server_id)
    }

    pub async fn get_all_shelves_by_server_id(&self, server_id: i64) -> Result<Vec<ShelfRecord>> {
        self.inner
            .lock()
            .await
            .get_all_shelves_by_server_id(server_id)
    }

    pub async fn delete_shelf(&self, local_id: &Uuid) -> Result<()> {
        self.inner.lock().await.delete_shelf(local_id)
    }

    pub async fn shelves_by_status(&self, status: SyncStatus) -> Result<Vec<ShelfRecord>> {
        self.inner.lock().await.shelves_by_status(status)
    }

    pub async fn shelves_by_category(&self, category: ReadingCategory) -> Result<Vec<ShelfRecord>> {
        self.inner.lock().await.shelves_by_category(category)
    }

    pub async fn all_shelves(&self) -> Result<Vec<ShelfRecord>> {
        self.inner.lock().await.all_shelves()
    }

    // ---- sync queue ----

    pub async fn insert_queue_item(&self, item: &OutboxItem) -> Result<()> {
        self.inner.lock().await.insert_queue_item(item)
    }

    pub async fn get_queue_item(&self, id: &str) -> Result<Option<OutboxItem>> {
        self.inner.lock().await.get_queue_item(id)
    }

    pub async fn update_queue_item(&self, item: &OutboxItem) -> Result<()> {
        self.inner.lock().await.update_queue_item(item)
    }

    pub async fn delete_queue_item(&self, id: &str) -> Result<()> {
        self.inner.lock().await.delete_queue_item(id)
    }

    pub async fn queue_items_by_status(&self, status: OutboxStatus) -> Result<Vec<OutboxItem>> {
        self.inner.lock().await.queue_items_by_status(status)
    }

    pub async fn queue_items_by_local_ref(&self, local_ref: &Uuid) -> Result<Vec<OutboxItem>> {
        self.inner.lock().await.queue_items_by_local_ref(local_ref)
    }

    pub async fn try_update_queue_status(
        &self,
        id: &str,
        expected: OutboxStatus,
        next: OutboxStatus,
    ) -> Result<bool> {
        self.inner
            .lock()
            .await
            .try_update_queue_status(id, expected, next)
    }

    pub async fn count_queue_by_status(&self, status: OutboxStatus) -> Result<usize> {
        self.inner.lock().await.count_queue_by_status(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityKind, OpKind};

    #[tokio::test]
    async fn handle_is_shared_across_clones() {
        let store = AsyncStore::open_in_memory().await.unwrap();
        let other = store.clone();

        let memo = MemoRecord::new(1, "note".to_string(), vec![], None, Utc::now());
        store.put_memo(&memo).await.unwrap();

        let loaded = other.get_memo(&memo.local_id).await.unwrap();
        assert!(loaded.is_some());
    }

    #[tokio::test]
    async fn queue_counts_follow_status_changes() {
        let store = AsyncStore::open_in_memory().await.unwrap();
        let item = OutboxItem::new(
            OpKind::Create,
            EntityKind::Memo,
            Uuid::new_v4(),
            None,
            serde_json::json!({}),
        );
        store.insert_queue_item(&item).await.unwrap();
        assert_eq!(
            store.count_queue_by_status(OutboxStatus::Pending).await.unwrap(),
            1
        );

        store
            .try_update_queue_status(&item.id, OutboxStatus::Pending, OutboxStatus::Success)
            .await
            .unwrap();
        assert_eq!(
            store.count_queue_by_status(OutboxStatus::Pending).await.unwrap(),
            0
        );
    }
}
