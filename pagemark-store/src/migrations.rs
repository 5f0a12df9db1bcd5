//! Schema migrations
//!
//! Version 1 shipped memos and the sync queue only; version 2 added the
//! shelf table and the secondary indexes the sync engine scans. Writes
//! go through the current schema only after migration completes.

use rusqlite::{params, Connection};
use tracing::{info, warn};

use crate::errors::{Result, StoreError};

/// A single schema migration
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub up: &'static [&'static str],
}

impl Migration {
    /// Apply this migration inside one transaction.
    pub fn apply(&self, conn: &mut Connection) -> Result<()> {
        info!("Applying migration {}: {}", self.version, self.description);

        let tx = conn.transaction()?;
        for statement in self.up {
            tx.execute_batch(statement)?;
        }
        tx.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            params![self.version],
        )?;
        tx.commit()?;

        info!("Migration {} applied", self.version);
        Ok(())
    }
}

/// All migrations past the initial schema, in order.
pub const MIGRATIONS: &[Migration] = &[Migration {
    version: 2,
    description: "Add offline_books table and sync-scan indexes",
    up: &[
        r#"
        CREATE TABLE IF NOT EXISTS offline_books (
            local_id TEXT PRIMARY KEY,
            server_id INTEGER,
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
        "#,
        r#"
        ALTER TABLE sync_queue ADD COLUMN local_book_id TEXT;
        CREATE INDEX IF NOT EXISTS idx_sync_queue_local_book_id ON sync_queue(local_book_id);
        CREATE INDEX IF NOT EXISTS idx_offline_memos_server_id ON offline_memos(server_id);
        "#,
    ],
}];

/// Current schema version recorded in the database, 0 when fresh.
pub fn current_version(conn: &Connection) -> Result<u32> {
    let table_exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'schema_version'",
        [],
        |row| row.get(0),
    )?;
    if !table_exists {
        return Ok(0);
    }

    let version = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get::<_, Option<u32>>(0)
        })?
        .unwrap_or(0);
    Ok(version)
}

/// Bring an existing database forward to `target` version.
pub fn run_migrations(conn: &mut Connection, from: u32, target: u32) -> Result<()> {
    if from == target {
        return Ok(());
    }
    if from > target {
        return Err(StoreError::SchemaVersionMismatch {
            expected: target,
            actual: from,
        });
    }

    info!("Migrating store from version {} to {}", from, target);

    for version in (from + 1)..=target {
        let migration = MIGRATIONS
            .iter()
            .find(|m| m.version == version)
            .ok_or_else(|| StoreError::Migration(format!("missing migration {}", version)))?;
        migration.apply(conn)?;
    }

    let now_at = current_version(conn)?;
    if now_at != target {
        warn!("Store ended at version {} after migration", now_at);
        return Err(StoreError::Migration(format!(
            "expected version {} after migration, found {}",
            target, now_at
        )));
    }

    Ok(())
}
