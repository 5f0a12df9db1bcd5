//! End-to-end sync scenarios against the mock API
//!
//! Each test builds the full application over an in-memory store with
//! the probe still believing it is offline, so writes take the
//! store-first path; engine passes are then driven explicitly.

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;

use common::MockApi;
use pagemark_proto::shelf::ShelfUpdatePayload;
use pagemark_proto::ReadingCategory;
use pagemark_service::{App, AppConfig, MemoEdit, NewMemo, NewShelfEntry};
use pagemark_store::{AsyncStore, OutboxStatus, SyncStatus};

fn test_config(mock: &MockApi) -> AppConfig {
    AppConfig {
        base_url: mock.base_url(),
        backoff_base_secs: 0,
        probe_stabilization_ms: 5,
        probe_retry_ms: 50,
        request_timeout_secs: 5,
        ..AppConfig::default()
    }
}

async fn offline_app(mock: &MockApi) -> App {
    let store = AsyncStore::open_in_memory().await.unwrap();
    App::assemble(store, test_config(mock)).unwrap()
}

fn sample_memo(content: &str) -> NewMemo {
    NewMemo {
        user_book_id: 7,
        content: content.to_string(),
        tags: vec!["summary".to_string()],
        page_number: Some(3),
        memo_start_time: Utc::now(),
    }
}

fn sample_book(isbn: &str) -> NewShelfEntry {
    NewShelfEntry {
        book_id: None,
        isbn: isbn.to_string(),
        title: "The Midnight Library".to_string(),
        author: Some("Matt Haig".to_string()),
        publisher: None,
        pub_date: None,
        description: None,
        cover_url: None,
        total_pages: Some(304),
        main_genre: None,
        category: ReadingCategory::ToRead,
        expectation: None,
        purchase_type: None,
    }
}

#[tokio::test]
async fn offline_create_replays_with_idempotency_key() {
    let mock = MockApi::spawn().await;
    let app = offline_app(&mock).await;

    let memo = app.memos.create_memo(sample_memo("hi")).await.unwrap();
    assert_eq!(memo.sync_status, SyncStatus::Pending);
    assert!(memo.server_id.is_none());
    assert!(memo.sync_queue_id.is_some());

    let stats = app.engine.run_pass().await.unwrap();
    assert_eq!(stats.processed, 1);

    let synced = app.store.get_memo(&memo.local_id).await.unwrap().unwrap();
    assert_eq!(synced.server_id, Some(42));
    assert_eq!(synced.sync_status, SyncStatus::Synced);
    assert!(synced.sync_queue_id.is_none());

    assert_eq!(mock.memo_count().await, 1);
    let server_memo = mock.memo(42).await.unwrap();
    assert_eq!(server_memo["content"], "hi");
    assert_eq!(server_memo["userBookId"], 7);
    // The key was sent and recorded.
    assert_eq!(mock.state.lock().await.memo_keys.len(), 1);
}

#[tokio::test]
async fn replayed_create_collapses_on_the_same_key() {
    let mock = MockApi::spawn().await;
    let app = offline_app(&mock).await;

    let memo = app.memos.create_memo(sample_memo("hi")).await.unwrap();
    let queue_id = memo.sync_queue_id.clone().unwrap();
    app.engine.run_pass().await.unwrap();

    // Simulate a crash after the request but before the SUCCESS mark:
    // the item runs again with the same key.
    assert!(app
        .outbox
        .try_update_status(&queue_id, OutboxStatus::Success, OutboxStatus::Pending)
        .await
        .unwrap());
    app.engine.run_pass().await.unwrap();

    assert_eq!(mock.memo_count().await, 1, "duplicate row created");
    let synced = app.store.get_memo(&memo.local_id).await.unwrap().unwrap();
    assert_eq!(synced.server_id, Some(42));
}

#[tokio::test]
async fn delete_during_inflight_create_waits_then_runs() {
    let mock = MockApi::spawn().await;
    mock.set_memo_create_delay(Duration::from_millis(300)).await;
    let app = offline_app(&mock).await;

    let memo = app.memos.create_memo(sample_memo("hi")).await.unwrap();

    let engine = app.engine.clone();
    let pass = tokio::spawn(async move { engine.run_pass().await.unwrap() });

    // Let the engine claim the CREATE and block inside the request.
    tokio::time::sleep(Duration::from_millis(100)).await;
    app.memos.delete_memo(memo.local_id).await.unwrap();

    let waiting = app.outbox.get_waiting().await.unwrap();
    assert_eq!(waiting.len(), 1);
    assert!(waiting[0].original_queue_id.is_some());
    let row = app.store.get_memo(&memo.local_id).await.unwrap().unwrap();
    assert_eq!(row.sync_status, SyncStatus::Waiting);

    pass.await.unwrap();

    // The CREATE landed and cascaded its server id into the delete.
    let waiting = app.outbox.get_waiting().await.unwrap();
    assert_eq!(waiting[0].server_ref, Some(42));

    let stats = app.engine.run_pass().await.unwrap();
    assert_eq!(stats.processed, 1);

    assert!(app.store.get_memo(&memo.local_id).await.unwrap().is_none());
    assert_eq!(mock.memo_count().await, 0);
}

#[tokio::test]
async fn rapid_updates_send_one_put_with_the_last_body() {
    let mock = MockApi::spawn().await;
    let app = offline_app(&mock).await;

    // A memo already known to the server.
    let memo = app.memos.create_memo(sample_memo("original")).await.unwrap();
    app.engine.run_pass().await.unwrap();

    app.memos
        .update_memo(
            memo.local_id,
            MemoEdit {
                content: Some("a".to_string()),
                ..MemoEdit::default()
            },
        )
        .await
        .unwrap();
    app.memos
        .update_memo(
            memo.local_id,
            MemoEdit {
                content: Some("b".to_string()),
                ..MemoEdit::default()
            },
        )
        .await
        .unwrap();

    let pending = app.outbox.get_pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].payload["content"], "b");

    app.engine.run_pass().await.unwrap();

    let puts: Vec<_> = mock
        .requests()
        .await
        .into_iter()
        .filter(|(path, _)| path.starts_with("PUT /memos/"))
        .collect();
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0].1["content"], "b");
    assert_eq!(mock.memo(42).await.unwrap()["content"], "b");
}

#[tokio::test]
async fn transient_failures_back_off_then_recover() {
    let mock = MockApi::spawn().await;
    mock.set_memo_create_failures(2).await;
    let app = offline_app(&mock).await;

    let memo = app.memos.create_memo(sample_memo("hi")).await.unwrap();

    // Two failing passes, then one that lands. Zero backoff base makes
    // the re-arm immediate.
    for _ in 0..5 {
        app.engine.run_pass().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let row = app.store.get_memo(&memo.local_id).await.unwrap().unwrap();
        if row.sync_status == SyncStatus::Synced {
            break;
        }
    }

    let row = app.store.get_memo(&memo.local_id).await.unwrap().unwrap();
    assert_eq!(row.sync_status, SyncStatus::Synced);
    assert_eq!(row.server_id, Some(42));
    assert_eq!(mock.memo_count().await, 1);
}

#[tokio::test]
async fn third_failure_parks_until_manual_rearm() {
    let mock = MockApi::spawn().await;
    mock.set_memo_create_failures(10).await;
    let app = offline_app(&mock).await;

    let memo = app.memos.create_memo(sample_memo("hi")).await.unwrap();
    let queue_id = memo.sync_queue_id.clone().unwrap();

    for _ in 0..3 {
        app.engine.run_pass().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    let item = app.outbox.get(&queue_id).await.unwrap().unwrap();
    assert_eq!(item.status, OutboxStatus::Failed);
    assert_eq!(item.retry_count, 3);

    // No automatic re-arm fires at the cap.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let item = app.outbox.get(&queue_id).await.unwrap().unwrap();
    assert_eq!(item.status, OutboxStatus::Failed);

    // Manual re-arm resets the budget; the server has recovered.
    mock.set_memo_create_failures(0).await;
    assert!(app.outbox.rearm_failed(&queue_id).await.unwrap());
    app.engine.run_pass().await.unwrap();

    let row = app.store.get_memo(&memo.local_id).await.unwrap().unwrap();
    assert_eq!(row.sync_status, SyncStatus::Synced);
}

#[tokio::test]
async fn items_replay_in_arrival_order() {
    let mock = MockApi::spawn().await;
    let app = offline_app(&mock).await;

    for content in ["first", "second", "third"] {
        app.memos.create_memo(sample_memo(content)).await.unwrap();
    }

    app.engine.run_pass().await.unwrap();

    let creates: Vec<String> = mock
        .requests()
        .await
        .into_iter()
        .filter(|(path, _)| path == "POST /memos")
        .map(|(_, body)| body["content"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(creates, vec!["first", "second", "third"]);
}

#[tokio::test]
async fn offline_book_then_update_cascades_the_server_id() {
    let mock = MockApi::spawn().await;
    mock.set_book_create_delay(Duration::from_millis(300)).await;
    let app = offline_app(&mock).await;

    let book = app.shelf.add_book(sample_book("9791162241776")).await.unwrap();

    let engine = app.engine.clone();
    let pass = tokio::spawn(async move { engine.run_pass().await.unwrap() });
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The CREATE is in flight: the reading-state update must wait.
    app.shelf
        .update_book(
            book.local_id,
            ShelfUpdatePayload {
                category: Some(ReadingCategory::Reading),
                last_read_page: Some(12),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(app.outbox.get_waiting().await.unwrap().len(), 1);

    pass.await.unwrap();

    // Cascade patched the waiting update's server ref.
    let waiting = app.outbox.get_waiting().await.unwrap();
    assert_eq!(waiting[0].server_ref, Some(42));

    app.engine.run_pass().await.unwrap();

    let row = app.store.get_shelf(&book.local_id).await.unwrap().unwrap();
    assert_eq!(row.server_id, Some(42));
    assert_eq!(row.category, ReadingCategory::Reading);
    assert_eq!(row.sync_status, SyncStatus::Synced);

    let server_book = mock.book(42).await.unwrap();
    assert_eq!(server_book["category"], "READING");
    assert_eq!(server_book["lastReadPage"], 12);
}

#[tokio::test]
async fn update_while_create_is_still_queued_folds_into_it() {
    let mock = MockApi::spawn().await;
    let app = offline_app(&mock).await;

    let book = app.shelf.add_book(sample_book("9791162241776")).await.unwrap();
    app.shelf
        .update_book(
            book.local_id,
            ShelfUpdatePayload {
                category: Some(ReadingCategory::Reading),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // One CREATE carrying the newest state; nothing waits.
    let pending = app.outbox.get_pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].payload["category"], "READING");

    app.engine.run_pass().await.unwrap();
    assert_eq!(mock.book(42).await.unwrap()["category"], "READING");
}

#[tokio::test]
async fn duplicate_book_conflict_adopts_the_existing_row() {
    let mock = MockApi::spawn().await;
    let existing = mock
        .seed_book(serde_json::json!({
            "isbn": "9791162241776",
            "title": "The Midnight Library",
            "category": "TO_READ",
        }))
        .await;
    let app = offline_app(&mock).await;

    let book = app.shelf.add_book(sample_book("9791162241776")).await.unwrap();
    let stats = app.engine.run_pass().await.unwrap();
    assert_eq!(stats.processed, 1);

    let row = app.store.get_shelf(&book.local_id).await.unwrap().unwrap();
    assert_eq!(row.server_id, Some(existing));
    assert_eq!(row.sync_status, SyncStatus::Synced);
    assert_eq!(mock.book_count().await, 1);
}

#[tokio::test]
async fn old_memo_is_dropped_locally_after_sync() {
    let mock = MockApi::spawn().await;
    let app = offline_app(&mock).await;

    let memo = app
        .memos
        .create_memo(NewMemo {
            memo_start_time: Utc::now() - ChronoDuration::days(10),
            ..sample_memo("from last week")
        })
        .await
        .unwrap();

    let stats = app.engine.run_pass().await.unwrap();
    assert_eq!(stats.processed, 1);

    // The row left the store; the server keeps it.
    assert!(app.store.get_memo(&memo.local_id).await.unwrap().is_none());
    assert_eq!(mock.memo_count().await, 1);
    let fetched = app.api.memos_by_book(7, None).await.unwrap();
    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0].content, "from last week");
}

#[tokio::test]
async fn local_draft_delete_never_reaches_the_server() {
    let mock = MockApi::spawn().await;
    let app = offline_app(&mock).await;

    let memo = app.memos.create_memo(sample_memo("draft")).await.unwrap();
    app.memos.delete_memo(memo.local_id).await.unwrap();

    assert!(app.store.get_memo(&memo.local_id).await.unwrap().is_none());
    assert!(app.outbox.get_pending().await.unwrap().is_empty());

    app.engine.run_pass().await.unwrap();
    assert_eq!(mock.memo_count().await, 0);
    assert!(mock.requests().await.is_empty());
}
