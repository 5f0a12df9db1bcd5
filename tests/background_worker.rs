//! The isolated background worker drains the shared queue

mod common;

use chrono::Utc;
use std::time::Duration;

use common::MockApi;
use pagemark_api::ApiConfig;
use pagemark_service::{App, AppConfig, NewMemo};
use pagemark_store::{AsyncStore, SyncStatus};
use pagemark_sync::{BackgroundSyncWorker, SyncConfig};

#[tokio::test]
async fn worker_replays_items_queued_by_the_foreground() {
    let mock = MockApi::spawn().await;
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().to_path_buf();

    // Foreground app on a file-backed store, offline: the write queues.
    let config = AppConfig {
        base_url: mock.base_url(),
        data_dir: data_dir.clone(),
        backoff_base_secs: 0,
        probe_stabilization_ms: 5,
        probe_retry_ms: 50,
        request_timeout_secs: 5,
        ..AppConfig::default()
    };
    let store = AsyncStore::open(config.db_path()).await.unwrap();
    let app = App::assemble(store, config.clone()).unwrap();

    let memo = app
        .memos
        .create_memo(NewMemo {
            user_book_id: 7,
            content: "queued while offline".to_string(),
            tags: vec![],
            page_number: None,
            memo_start_time: Utc::now(),
        })
        .await
        .unwrap();
    assert_eq!(memo.sync_status, SyncStatus::Pending);

    // The worker registers with its own store handle and credentials.
    let worker = BackgroundSyncWorker::register(
        config.db_path(),
        ApiConfig::default().with_base_url(mock.base_url()),
        SyncConfig {
            backoff_base: Duration::from_millis(10),
            ..SyncConfig::default()
        },
        Duration::from_secs(60),
    )
    .await
    .unwrap();

    let stats = worker.run_once().await.unwrap();
    assert_eq!(stats.processed, 1);

    // The foreground sees the result through the shared database.
    let row = app.store.get_memo(&memo.local_id).await.unwrap().unwrap();
    assert_eq!(row.server_id, Some(42));
    assert_eq!(row.sync_status, SyncStatus::Synced);
    assert_eq!(mock.memo_count().await, 1);
}
