//! Row types for the three tables and their status enums

use chrono::{DateTime, NaiveDate, Utc};
use pagemark_proto::ReadingCategory;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-entity sync lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    SyncingCreate,
    SyncingUpdate,
    SyncingDelete,
    Waiting,
    Synced,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::SyncingCreate => "syncing_create",
            SyncStatus::SyncingUpdate => "syncing_update",
            SyncStatus::SyncingDelete => "syncing_delete",
            SyncStatus::Waiting => "waiting",
            SyncStatus::Synced => "synced",
            SyncStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SyncStatus::Pending),
            "syncing_create" => Some(SyncStatus::SyncingCreate),
            "syncing_update" => Some(SyncStatus::SyncingUpdate),
            "syncing_delete" => Some(SyncStatus::SyncingDelete),
            "waiting" => Some(SyncStatus::Waiting),
            "synced" => Some(SyncStatus::Synced),
            "failed" => Some(SyncStatus::Failed),
            _ => None,
        }
    }

    /// True while an outbox item for this entity is being replayed.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            SyncStatus::SyncingCreate | SyncStatus::SyncingUpdate | SyncStatus::SyncingDelete
        )
    }
}

/// Outbox item lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    Waiting,
    Syncing,
    Success,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Waiting => "WAITING",
            OutboxStatus::Syncing => "SYNCING",
            OutboxStatus::Success => "SUCCESS",
            OutboxStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(OutboxStatus::Pending),
            "WAITING" => Some(OutboxStatus::Waiting),
            "SYNCING" => Some(OutboxStatus::Syncing),
            "SUCCESS" => Some(OutboxStatus::Success),
            "FAILED" => Some(OutboxStatus::Failed),
            _ => None,
        }
    }
}

/// Kind of mutation an outbox item replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpKind {
    Create,
    Update,
    Delete,
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Create => "CREATE",
            OpKind::Update => "UPDATE",
            OpKind::Delete => "DELETE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CREATE" => Some(OpKind::Create),
            "UPDATE" => Some(OpKind::Update),
            "DELETE" => Some(OpKind::Delete),
            _ => None,
        }
    }
}

/// Which entity family an outbox item belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Memo,
    Shelf,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Memo => "memo",
            EntityKind::Shelf => "shelf",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "memo" => Some(EntityKind::Memo),
            "shelf" => Some(EntityKind::Shelf),
            _ => None,
        }
    }
}

/// A dated annotation bound to a book on the user's shelf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoRecord {
    pub local_id: Uuid,
    pub server_id: Option<i64>,
    pub user_book_id: i64,
    pub page_number: Option<i64>,
    pub content: String,
    pub tags: Vec<String>,
    /// User-authored timestamp, distinct from the engine's wall clock.
    pub memo_start_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sync_status: SyncStatus,
    /// Outbox item currently governing this entity, if any.
    pub sync_queue_id: Option<String>,
}

impl MemoRecord {
    pub fn new(
        user_book_id: i64,
        content: String,
        tags: Vec<String>,
        page_number: Option<i64>,
        memo_start_time: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            local_id: Uuid::new_v4(),
            server_id: None,
            user_book_id,
            page_number,
            content,
            tags,
            memo_start_time,
            created_at: now,
            updated_at: now,
            sync_status: SyncStatus::Pending,
            sync_queue_id: None,
        }
    }
}

/// A user's relationship to a book: bibliographic block plus reading state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShelfRecord {
    pub local_id: Uuid,
    /// The server calls this `userBookId`.
    pub server_id: Option<i64>,
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
    pub last_read_page: Option<i64>,
    pub last_read_at: Option<DateTime<Utc>>,
    pub reading_finished_date: Option<NaiveDate>,
    pub purchase_type: Option<String>,
    pub rating: Option<i32>,
    pub review: Option<String>,
    pub sync_status: SyncStatus,
    pub sync_queue_id: Option<String>,
    pub added_at: DateTime<Utc>,
}

/// A pending mutation awaiting replay against the remote API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxItem {
    pub id: String,
    pub kind: OpKind,
    pub entity_kind: EntityKind,
    /// Owning entity's local id.
    pub local_ref: Uuid,
    /// Owning entity's server id; eager for UPDATE/DELETE, patched in for
    /// items queued behind a CREATE.
    pub server_ref: Option<i64>,
    /// Request body replayed verbatim.
    pub payload: serde_json::Value,
    /// Fixed for the life of the item; retries reuse it verbatim.
    pub idempotency_key: Uuid,
    pub status: OutboxStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    /// For WAITING items, the in-flight item that must succeed first.
    pub original_queue_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_retry_at: Option<DateTime<Utc>>,
}

impl OutboxItem {
    pub fn new(
        kind: OpKind,
        entity_kind: EntityKind,
        local_ref: Uuid,
        server_ref: Option<i64>,
        payload: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            entity_kind,
            local_ref,
            server_ref,
            payload,
            idempotency_key: Uuid::new_v4(),
            status: OutboxStatus::Pending,
            retry_count: 0,
            last_error: None,
            original_queue_id: None,
            created_at: now,
            updated_at: now,
            last_retry_at: None,
        }
    }

    /// Mark this item as blocked behind an in-flight item.
    pub fn waiting_on(mut self, original_queue_id: &str) -> Self {
        self.status = OutboxStatus::Waiting;
        self.original_queue_id = Some(original_queue_id.to_string());
        self
    }
}
