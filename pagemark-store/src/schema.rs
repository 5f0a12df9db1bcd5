/// Database file name
pub const DB_FILE_NAME: &str = "reading-tracker.db";

/// Database schema version
pub const SCHEMA_VERSION: u32 = 2;

/// SQL schema for the offline store (current version)
pub const SCHEMA: &str = r#"
-- Enable WAL mode for better concurrency between the foreground client
-- and the background sync worker
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

-- Memos authored offline or cached from the server
CREATE TABLE IF NOT EXISTS offline_memos (
    local_id TEXT PRIMARY KEY,
    server_id INTEGER,
    user_book_id INTEGER NOT NULL,
    page_number INTEGER,
    content TEXT NOT NULL,
    tags TEXT NOT NULL DEFAULT '[]', -- JSON array of short string codes
    memo_start_time TIMESTAMP NOT NULL,
    created_at TIMESTAMP NOT NULL,
    updated_at TIMESTAMP NOT NULL,
    sync_status TEXT NOT NULL,
    sync_queue_id TEXT
);

CREATE INDEX IF NOT EXISTS idx_offline_memos_sync_status ON offline_memos(sync_status);
CREATE INDEX IF NOT EXISTS idx_offline_memos_user_book_id ON offline_memos(user_book_id);
CREATE INDEX IF NOT EXISTS idx_offline_memos_memo_start_time ON offline_memos(memo_start_time);
CREATE INDEX IF NOT EXISTS idx_offline_memos_server_id ON offline_memos(server_id);

-- Shelf entries: the user's library, retained in full
CREATE TABLE IF NOT EXISTS offline_books (
    local_id TEXT PRIMARY KEY,
    server_id INTEGER, -- the server's userBookId
    book_id INTEGER,
    isbn TEXT NOT NULL,
    title TEXT NOT NULL,
    author TEXT,
    publisher TEXT,
    pub_date TEXT,
    description TEXT,
    cover_url TEXT,
    total_pages INTEGER,
    main_genre TEXT,
    category TEXT NOT NULL,
    expectation TEXT,
    last_read_page INTEGER,
    last_read_at TIMESTAMP,
    reading_finished_date TEXT,
    purchase_type TEXT,
    rating INTEGER,
    review TEXT,
    sync_status TEXT NOT NULL,
    sync_queue_id TEXT,
    added_at TIMESTAMP NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_offline_books_sync_status ON offline_books(sync_status);
CREATE INDEX IF NOT EXISTS idx_offline_books_server_id ON offline_books(server_id);
CREATE INDEX IF NOT EXISTS idx_offline_books_category ON offline_books(category);

-- Outbox: append-ordered queue of pending mutations
CREATE TABLE IF NOT EXISTS sync_queue (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,               -- CREATE | UPDATE | DELETE
    entity_kind TEXT NOT NULL,        -- memo | shelf
    local_memo_id TEXT,
    local_book_id TEXT,
    server_ref INTEGER,
    payload TEXT NOT NULL,            -- JSON request body replayed verbatim
    idempotency_key TEXT NOT NULL,
    status TEXT NOT NULL,             -- PENDING | WAITING | SYNCING | SUCCESS | FAILED
    retry_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    original_queue_id TEXT,
    created_at TIMESTAMP NOT NULL,
    updated_at TIMESTAMP NOT NULL,
    last_retry_at TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_sync_queue_status ON sync_queue(status);
CREATE INDEX IF NOT EXISTS idx_sync_queue_local_memo_id ON sync_queue(local_memo_id);
CREATE INDEX IF NOT EXISTS idx_sync_queue_local_book_id ON sync_queue(local_book_id);
"#;
