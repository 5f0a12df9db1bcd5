//! Synchronous store over rusqlite
//!
//! All writes are serialized through single-table transactions; the
//! connection itself provides them. Cross-table atomicity is not offered,
//! the sync layer compensates with idempotency keys and status
//! reconciliation.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

use pagemark_proto::ReadingCategory;

use crate::errors::{Result, StoreError};
use crate::migrations::{current_version, run_migrations};
use crate::models::{
    EntityKind, MemoRecord, OpKind, OutboxItem, OutboxStatus, ShelfRecord, SyncStatus,
};
use crate::schema::{SCHEMA, SCHEMA_VERSION};

/// The offline store: two entity tables plus the sync queue.
pub struct Store {
    conn: Connection,
}

fn conversion_err(idx: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

#[derive(Debug)]
struct BadEnumValue(String);

impl std::fmt::Display for BadEnumValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unrecognized stored value: {}", self.0)
    }
}

impl std::error::Error for BadEnumValue {}

fn parse_ts(idx: usize, s: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

fn parse_ts_opt(idx: usize, s: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.map(|s| parse_ts(idx, s)).transpose()
}

fn parse_date_opt(idx: usize, s: Option<String>) -> rusqlite::Result<Option<NaiveDate>> {
    s.map(|s| {
        NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|e| conversion_err(idx, e))
    })
    .transpose()
}

fn parse_uuid(idx: usize, s: String) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(&s).map_err(|e| conversion_err(idx, e))
}

fn memo_from_row(row: &Row<'_>) -> rusqlite::Result<MemoRecord> {
    let tags_json: String = row.get(5)?;
    let tags: Vec<String> =
        serde_json::from_str(&tags_json).map_err(|e| conversion_err(5, e))?;
    let status_str: String = row.get(9)?;
    let sync_status = SyncStatus::parse(&status_str)
        .ok_or_else(|| conversion_err(9, BadEnumValue(status_str)))?;

    Ok(MemoRecord {
        local_id: parse_uuid(0, row.get(0)?)?,
        server_id: row.get(1)?,
        user_book_id: row.get(2)?,
        page_number: row.get(3)?,
        content: row.get(4)?,
        tags,
        memo_start_time: parse_ts(6, row.get(6)?)?,
        created_at: parse_ts(7, row.get(7)?)?,
        updated_at: parse_ts(8, row.get(8)?)?,
        sync_status,
        sync_queue_id: row.get(10)?,
    })
}

fn shelf_from_row(row: &Row<'_>) -> rusqlite::Result<ShelfRecord> {
    let category_str: String = row.get(12)?;
    let category = ReadingCategory::parse(&category_str)
        .ok_or_else(|| conversion_err(12, BadEnumValue(category_str)))?;
    let status_str: String = row.get(20)?;
    let sync_status = SyncStatus::parse(&status_str)
        .ok_or_else(|| conversion_err(20, BadEnumValue(status_str)))?;

    Ok(ShelfRecord {
        local_id: parse_uuid(0, row.get(0)?)?,
        server_id: row.get(1)?,
        book_id: row.get(2)?,
        isbn: row.get(3)?,
        title: row.get(4)?,
        author: row.get(5)?,
        publisher: row.get(6)?,
        pub_date: parse_date_opt(7, row.get(7)?)?,
        description: row.get(8)?,
        cover_url: row.get(9)?,
        total_pages: row.get(10)?,
        main_genre: row.get(11)?,
        category,
        expectation: row.get(13)?,
        last_read_page: row.get(14)?,
        last_read_at: parse_ts_opt(15, row.get(15)?)?,
        reading_finished_date: parse_date_opt(16, row.get(16)?)?,
        purchase_type: row.get(17)?,
        rating: row.get(18)?,
        review: row.get(19)?,
        sync_status,
        sync_queue_id: row.get(21)?,
        added_at: parse_ts(22, row.get(22)?)?,
    })
}

fn queue_from_row(row: &Row<'_>) -> rusqlite::Result<OutboxItem> {
    let kind_str: String = row.get(1)?;
    let kind =
        OpKind::parse(&kind_str).ok_or_else(|| conversion_err(1, BadEnumValue(kind_str)))?;
    let entity_str: String = row.get(2)?;
    let entity_kind = EntityKind::parse(&entity_str)
        .ok_or_else(|| conversion_err(2, BadEnumValue(entity_str)))?;
    let status_str: String = row.get(8)?;
    let status = OutboxStatus::parse(&status_str)
        .ok_or_else(|| conversion_err(8, BadEnumValue(status_str)))?;
    let payload_json: String = row.get(6)?;
    let payload = serde_json::from_str(&payload_json).map_err(|e| conversion_err(6, e))?;

    // The owning entity's local id lives in one of two indexed columns.
    let local_memo: Option<String> = row.get(3)?;
    let local_book: Option<String> = row.get(4)?;
    let local_ref = match entity_kind {
        EntityKind::Memo => local_memo,
        EntityKind::Shelf => local_book,
    }
    .ok_or_else(|| conversion_err(3, BadEnumValue("missing local ref".into())))?;

    Ok(OutboxItem {
        id: row.get(0)?,
        kind,
        entity_kind,
        local_ref: parse_uuid(3, local_ref)?,
        server_ref: row.get(5)?,
        payload,
        idempotency_key: parse_uuid(7, row.get(7)?)?,
        status,
        retry_count: row.get(9)?,
        last_error: row.get(10)?,
        original_queue_id: row.get(11)?,
        created_at: parse_ts(12, row.get(12)?)?,
        updated_at: parse_ts(13, row.get(13)?)?,
        last_retry_at: parse_ts_opt(14, row.get(14)?)?,
    })
}

const MEMO_COLUMNS: &str = "local_id, server_id, user_book_id, page_number, content, tags, \
     memo_start_time, created_at, updated_at, sync_status, sync_queue_id";

const SHELF_COLUMNS: &str = "local_id, server_id, book_id, isbn, title, author, publisher, \
     pub_date, description, cover_url, total_pages, main_genre, category, expectation, \
     last_read_page, last_read_at, reading_finished_date, purchase_type, rating, review, \
     sync_status, sync_queue_id, added_at";

const QUEUE_COLUMNS: &str = "id, kind, entity_kind, local_memo_id, local_book_id, server_ref, \
     payload, idempotency_key, status, retry_count, last_error, original_queue_id, \
     created_at, updated_at, last_retry_at";

impl Store {
    /// Open or create the store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        let mut store = Self { conn };
        store.initialize()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut store = Self { conn };
        store.initialize()?;
        Ok(store)
    }

    /// Idempotent schema initialization.
    fn initialize(&mut self) -> Result<()> {
        match current_version(&self.conn)? {
            0 => {
                info!("Initializing new store schema (version {})", SCHEMA_VERSION);
                self.conn.execute_batch(SCHEMA)?;
                self.conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?1)",
                    params![SCHEMA_VERSION],
                )?;
            }
            v if v < SCHEMA_VERSION => {
                run_migrations(&mut self.conn, v, SCHEMA_VERSION)?;
            }
            v if v > SCHEMA_VERSION => {
                return Err(StoreError::SchemaVersionMismatch {
                    expected: SCHEMA_VERSION,
                    actual: v,
                });
            }
            _ => {
                debug!("Store schema up to date (version {})", SCHEMA_VERSION);
            }
        }
        Ok(())
    }

    // ---- memos ----

    /// Insert or replace a memo row.
    pub fn put_memo(&mut self, memo: &MemoRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO offline_memos
                (local_id, server_id, user_book_id, page_number, content, tags,
                 memo_start_time, created_at, updated_at, sync_status, sync_queue_id)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(local_id) DO UPDATE SET
                server_id = excluded.server_id,
                user_book_id = excluded.user_book_id,
                page_number = excluded.page_number,
                content = excluded.content,
                tags = excluded.tags,
                memo_start_time = excluded.memo_start_time,
                updated_at = excluded.updated_at,
                sync_status = excluded.sync_status,
                sync_queue_id = excluded.sync_queue_id
            "#,
            params![
                memo.local_id.to_string(),
                memo.server_id,
                memo.user_book_id,
                memo.page_number,
                memo.content,
                serde_json::to_string(&memo.tags)?,
                memo.memo_start_time.to_rfc3339(),
                memo.created_at.to_rfc3339(),
                memo.updated_at.to_rfc3339(),
                memo.sync_status.as_str(),
                memo.sync_queue_id,
            ],
        )?;
        Ok(())
    }

    pub fn get_memo(&self, local_id: &Uuid) -> Result<Option<MemoRecord>> {
        let result = self
            .conn
            .query_row(
                &format!("SELECT {} FROM offline_memos WHERE local_id = ?1", MEMO_COLUMNS),
                params![local_id.to_string()],
                memo_from_row,
            )
            .optional()?;
        Ok(result)
    }

    /// Nullable-safe lookup: a `None` input answers `None` instead of erroring.
    pub fn get_memo_by_server_id(&self, server_id: Option<i64>) -> Result<Option<MemoRecord>> {
        let Some(server_id) = server_id else {
            return Ok(None);
        };
        let result = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM offline_memos WHERE server_id = ?1 LIMIT 1",
                    MEMO_COLUMNS
                ),
                params![server_id],
                memo_from_row,
            )
            .optional()?;
        Ok(result)
    }

    /// Every row claiming a server id, for duplicate cleanup.
    pub fn get_all_memos_by_server_id(&self, server_id: i64) -> Result<Vec<MemoRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM offline_memos WHERE server_id = ?1 ORDER BY created_at ASC",
            MEMO_COLUMNS
        ))?;
        let rows = stmt.query_map(params![server_id], memo_from_row)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn delete_memo(&mut self, local_id: &Uuid) -> Result<()> {
        self.conn.execute(
            "DELETE FROM offline_memos WHERE local_id = ?1",
            params![local_id.to_string()],
        )?;
        Ok(())
    }

    pub fn memos_by_status(&self, status: SyncStatus) -> Result<Vec<MemoRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM offline_memos WHERE sync_status = ?1 ORDER BY created_at ASC",
            MEMO_COLUMNS
        ))?;
        let rows = stmt.query_map(params![status.as_str()], memo_from_row)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn memos_by_user_book(&self, user_book_id: i64) -> Result<Vec<MemoRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM offline_memos WHERE user_book_id = ?1 ORDER BY memo_start_time ASC",
            MEMO_COLUMNS
        ))?;
        let rows = stmt.query_map(params![user_book_id], memo_from_row)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn all_memos(&self) -> Result<Vec<MemoRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM offline_memos ORDER BY memo_start_time ASC",
            MEMO_COLUMNS
        ))?;
        let rows = stmt.query_map([], memo_from_row)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Synced memos untouched since the cutoff, candidates for the sweep.
    pub fn synced_memos_idle_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<MemoRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM offline_memos WHERE sync_status = 'synced' AND updated_at < ?1",
            MEMO_COLUMNS
        ))?;
        let rows = stmt.query_map(params![cutoff.to_rfc3339()], memo_from_row)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    // ---- shelf entries ----

    pub fn put_shelf(&mut self, shelf: &ShelfRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO offline_books
                (local_id, server_id, book_id, isbn, title, author, publisher, pub_date,
                 description, cover_url, total_pages, main_genre, category, expectation,
                 last_read_page, last_read_at, reading_finished_date, purchase_type,
                 rating, review, sync_status, sync_queue_id, added_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                    ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)
            ON CONFLICT(local_id) DO UPDATE SET
                server_id = excluded.server_id,
                book_id = excluded.book_id,
                isbn = excluded.isbn,
                title = excluded.title,
                author = excluded.author,
                publisher = excluded.publisher,
                pub_date = excluded.pub_date,
                description = excluded.description,
                cover_url = excluded.cover_url,
                total_pages = excluded.total_pages,
                main_genre = excluded.main_genre,
                category = excluded.category,
                expectation = excluded.expectation,
                last_read_page = excluded.last_read_page,
                last_read_at = excluded.last_read_at,
                reading_finished_date = excluded.reading_finished_date,
                purchase_type = excluded.purchase_type,
                rating = excluded.rating,
                review = excluded.review,
                sync_status = excluded.sync_status,
                sync_queue_id = excluded.sync_queue_id
            "#,
            params![
                shelf.local_id.to_string(),
                shelf.server_id,
                shelf.book_id,
                shelf.isbn,
                shelf.title,
                shelf.author,
                shelf.publisher,
                shelf.pub_date.map(|d| d.to_string()),
                shelf.description,
                shelf.cover_url,
                shelf.total_pages,
                shelf.main_genre,
                shelf.category.as_str(),
                shelf.expectation,
                shelf.last_read_page,
                shelf.last_read_at.map(|t| t.to_rfc3339()),
                shelf.reading_finished_date.map(|d| d.to_string()),
                shelf.purchase_type,
                shelf.rating,
                shelf.review,
                shelf.sync_status.as_str(),
                shelf.sync_queue_id,
                shelf.added_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_shelf(&self, local_id: &Uuid) -> Result<Option<ShelfRecord>> {
        let result = self
            .conn
            .query_row(
                &format!("SELECT {} FROM offline_books WHERE local_id = ?1", SHELF_COLUMNS),
                params![local_id.to_string()],
                shelf_from_row,
            )
            .optional()?;
        Ok(result)
    }

    /// Nullable-safe lookup by the server's userBookId.
    pub fn get_shelf_by_server_id(&self, server_id: Option<i64>) -> Result<Option<ShelfRecord>> {
        let Some(server_id) = server_id else {
            return Ok(None);
        };
        let result = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM offline_books WHERE server_id = ?1 LIMIT 1",
                    SHELF_COLUMNS
                ),
                params![server_id],
                shelf_from_row,
            )
            .optional()?;
        Ok(result)
    }

    pub fn get_all_shelves_by_server_id(&self, server_id: i64) -> Result<Vec<ShelfRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM offline_books WHERE server_id = ?1 ORDER BY added_at ASC",
            SHELF_COLUMNS
        ))?;
        let rows = stmt.query_map(params![server_id], shelf_from_row)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn delete_shelf(&mut self, local_id: &Uuid) -> Result<()> {
        self.conn.execute(
            "DELETE FROM offline_books WHERE local_id = ?1",
            params![local_id.to_string()],
        )?;
        Ok(())
    }

    pub fn shelves_by_status(&self, status: SyncStatus) -> Result<Vec<ShelfRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM offline_books WHERE sync_status = ?1 ORDER BY added_at ASC",
            SHELF_COLUMNS
        ))?;
        let rows = stmt.query_map(params![status.as_str()], shelf_from_row)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn shelves_by_category(&self, category: ReadingCategory) -> Result<Vec<ShelfRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM offline_books WHERE category = ?1 ORDER BY added_at ASC",
            SHELF_COLUMNS
        ))?;
        let rows = stmt.query_map(params![category.as_str()], shelf_from_row)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn all_shelves(&self) -> Result<Vec<ShelfRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM offline_books ORDER BY added_at ASC",
            SHELF_COLUMNS
        ))?;
        let rows = stmt.query_map([], shelf_from_row)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    // ---- sync queue ----

    pub fn insert_queue_item(&mut self, item: &OutboxItem) -> Result<()> {
        let (local_memo_id, local_book_id) = match item.entity_kind {
            EntityKind::Memo => (Some(item.local_ref.to_string()), None),
            EntityKind::Shelf => (None, Some(item.local_ref.to_string())),
        };

        self.conn.execute(
            r#"
            INSERT INTO sync_queue
                (id, kind, entity_kind, local_memo_id, local_book_id, server_ref, payload,
                 idempotency_key, status, retry_count, last_error, original_queue_id,
                 created_at, updated_at, last_retry_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
            params![
                item.id,
                item.kind.as_str(),
                item.entity_kind.as_str(),
                local_memo_id,
                local_book_id,
                item.server_ref,
                serde_json::to_string(&item.payload)?,
                item.idempotency_key.to_string(),
                item.status.as_str(),
                item.retry_count,
                item.last_error,
                item.original_queue_id,
                item.created_at.to_rfc3339(),
                item.updated_at.to_rfc3339(),
                item.last_retry_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub fn get_queue_item(&self, id: &str) -> Result<Option<OutboxItem>> {
        let result = self
            .conn
            .query_row(
                &format!("SELECT {} FROM sync_queue WHERE id = ?1", QUEUE_COLUMNS),
                params![id],
                queue_from_row,
            )
            .optional()?;
        Ok(result)
    }

    /// Replace the stored row with the given item.
    pub fn update_queue_item(&mut self, item: &OutboxItem) -> Result<()> {
        self.conn.execute(
            r#"
            UPDATE sync_queue SET
                kind = ?2, server_ref = ?3, payload = ?4, idempotency_key = ?5,
                status = ?6, retry_count = ?7, last_error = ?8, original_queue_id = ?9,
                updated_at = ?10, last_retry_at = ?11
            WHERE id = ?1
            "#,
            params![
                item.id,
                item.kind.as_str(),
                item.server_ref,
                serde_json::to_string(&item.payload)?,
                item.idempotency_key.to_string(),
                item.status.as_str(),
                item.retry_count,
                item.last_error,
                item.original_queue_id,
                item.updated_at.to_rfc3339(),
                item.last_retry_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub fn delete_queue_item(&mut self, id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM sync_queue WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Items in one status, strict arrival order.
    pub fn queue_items_by_status(&self, status: OutboxStatus) -> Result<Vec<OutboxItem>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM sync_queue WHERE status = ?1 ORDER BY created_at ASC, rowid ASC",
            QUEUE_COLUMNS
        ))?;
        let rows = stmt.query_map(params![status.as_str()], queue_from_row)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// All items governing one entity, oldest first.
    pub fn queue_items_by_local_ref(&self, local_ref: &Uuid) -> Result<Vec<OutboxItem>> {
        let id = local_ref.to_string();
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM sync_queue WHERE local_memo_id = ?1 OR local_book_id = ?1 \
             ORDER BY created_at ASC, rowid ASC",
            QUEUE_COLUMNS
        ))?;
        let rows = stmt.query_map(params![id], queue_from_row)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Compare-and-set on an item's status.
    ///
    /// The sole claim primitive: returns true only if the stored status
    /// equaled `expected` at the moment of the update.
    pub fn try_update_queue_status(
        &mut self,
        id: &str,
        expected: OutboxStatus,
        next: OutboxStatus,
    ) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE sync_queue SET status = ?3, updated_at = ?4 WHERE id = ?1 AND status = ?2",
            params![
                id,
                expected.as_str(),
                next.as_str(),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(changed == 1)
    }

    pub fn count_queue_by_status(&self, status: OutboxStatus) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sync_queue WHERE status = ?1",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}
