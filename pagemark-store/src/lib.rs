//! Durable local store for pagemark
//!
//! A transactional SQLite store with two entity tables (memos, shelf
//! entries) and the sync queue, plus the secondary indexes the sync
//! engine scans. Provides both a synchronous [`Store`] and the shared
//! async handle [`AsyncStore`] used by the rest of the workspace.

pub mod async_store;
pub mod database;
pub mod errors;
pub mod migrations;
pub mod models;
pub mod schema;

pub use async_store::AsyncStore;
pub use database::Store;
pub use errors::{Result, StoreError};
pub use models::{
    EntityKind, MemoRecord, OpKind, OutboxItem, OutboxStatus, ShelfRecord, SyncStatus,
};
pub use schema::{DB_FILE_NAME, SCHEMA_VERSION};
