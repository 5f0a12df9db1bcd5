//! Record ↔ payload mapping

use chrono::Utc;
use uuid::Uuid;

use pagemark_proto::{
    MemoPayload, MemoResponse, ShelfCreatePayload, ShelfResponse, ShelfUpdatePayload,
};
use pagemark_store::{MemoRecord, ShelfRecord, SyncStatus};

/// Request body replayed for a memo CREATE or UPDATE.
pub fn memo_payload(record: &MemoRecord) -> MemoPayload {
    MemoPayload {
        user_book_id: record.user_book_id,
        page_number: record.page_number,
        content: record.content.clone(),
        tags: record.tags.clone(),
        memo_start_time: record.memo_start_time,
    }
}

/// A fresh cached row for a server memo (write-through path).
pub fn memo_record_from_response(response: &MemoResponse) -> MemoRecord {
    MemoRecord {
        local_id: Uuid::new_v4(),
        server_id: Some(response.id),
        user_book_id: response.user_book_id,
        page_number: response.page_number,
        content: response.content.clone(),
        tags: response.tags.clone(),
        memo_start_time: response.memo_start_time,
        created_at: response.created_at.unwrap_or_else(Utc::now),
        updated_at: response.updated_at.unwrap_or_else(Utc::now),
        sync_status: SyncStatus::Synced,
        sync_queue_id: None,
    }
}

/// Fold a server memo into an existing row, keeping local identity.
pub fn apply_memo_response(record: &mut MemoRecord, response: &MemoResponse) {
    record.server_id.get_or_insert(response.id);
    record.user_book_id = response.user_book_id;
    record.page_number = response.page_number;
    record.content = response.content.clone();
    record.tags = response.tags.clone();
    record.memo_start_time = response.memo_start_time;
    record.updated_at = response.updated_at.unwrap_or_else(Utc::now);
    record.sync_status = SyncStatus::Synced;
    record.sync_queue_id = None;
}

/// Request body replayed for a shelf CREATE.
pub fn shelf_create_payload(record: &ShelfRecord) -> ShelfCreatePayload {
    ShelfCreatePayload {
        book_id: record.book_id,
        isbn: record.isbn.clone(),
        title: record.title.clone(),
        author: record.author.clone(),
        publisher: record.publisher.clone(),
        pub_date: record.pub_date,
        description: record.description.clone(),
        cover_url: record.cover_url.clone(),
        total_pages: record.total_pages,
        main_genre: record.main_genre.clone(),
        category: record.category,
        expectation: record.expectation.clone(),
        purchase_type: record.purchase_type.clone(),
    }
}

/// A fresh cached row for a server shelf entry.
pub fn shelf_record_from_response(response: &ShelfResponse) -> ShelfRecord {
    ShelfRecord {
        local_id: Uuid::new_v4(),
        server_id: Some(response.user_book_id),
        book_id: response.book_id,
        isbn: response.isbn.clone(),
        title: response.title.clone(),
        author: response.author.clone(),
        publisher: response.publisher.clone(),
        pub_date: response.pub_date,
        description: response.description.clone(),
        cover_url: response.cover_url.clone(),
        total_pages: response.total_pages,
        main_genre: response.main_genre.clone(),
        category: response.category,
        expectation: response.expectation.clone(),
        last_read_page: response.last_read_page,
        last_read_at: response.last_read_at,
        reading_finished_date: response.reading_finished_date,
        purchase_type: response.purchase_type.clone(),
        rating: response.rating,
        review: response.review.clone(),
        sync_status: SyncStatus::Synced,
        sync_queue_id: None,
        added_at: Utc::now(),
    }
}

/// Apply a partial update to the mutable reading state. Absent fields
/// stay untouched, mirroring what the server does with the same body.
pub fn apply_shelf_update(record: &mut ShelfRecord, update: &ShelfUpdatePayload) {
    if let Some(category) = update.category {
        record.category = category;
    }
    if let Some(expectation) = &update.expectation {
        record.expectation = Some(expectation.clone());
    }
    if let Some(last_read_page) = update.last_read_page {
        record.last_read_page = Some(last_read_page);
    }
    if let Some(last_read_at) = update.last_read_at {
        record.last_read_at = Some(last_read_at);
    }
    if let Some(finished) = update.reading_finished_date {
        record.reading_finished_date = Some(finished);
    }
    if let Some(purchase_type) = &update.purchase_type {
        record.purchase_type = Some(purchase_type.clone());
    }
    if let Some(rating) = update.rating {
        record.rating = Some(rating);
    }
    if let Some(review) = &update.review {
        record.review = Some(review.clone());
    }
}
