//! HTTP client for the remote reading-journal API
//!
//! One thin, typed boundary: memo and shelf CRUD, the today-flow and
//! by-book reads, and the two health probes the network monitor drives.
//! Errors are classified into the taxonomy the sync engine and facade
//! branch on.

pub mod client;
pub mod config;
pub mod errors;
mod memos;
mod shelf;

pub use client::{ApiClient, IDEMPOTENCY_KEY_HEADER};
pub use config::ApiConfig;
pub use errors::{ApiError, Result};
