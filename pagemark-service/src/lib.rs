//! Public service facade for pagemark
//!
//! The API that UI code consumes: memo and shelf services implementing
//! the network-aware hybrid policy (server-first when online, store-first
//! when offline, deferred while a sync cycle runs), plus the composition
//! root that wires the whole engine together at startup.

pub mod config;
pub mod context;
pub mod errors;
pub mod mapping;
pub mod memos;
pub mod policy;
pub mod shelf;

pub use config::AppConfig;
pub use context::App;
pub use errors::{Result, ServiceError};
pub use memos::{BookMemos, MemoEdit, MemoService, NewMemo, TagMemos, TodayFlow};
pub use policy::{read_route, write_route, ReadRoute, WriteRoute};
pub use shelf::{NewShelfEntry, ShelfService};
