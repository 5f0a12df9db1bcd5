//! Durable write-behind sync engine for pagemark
//!
//! This crate provides the sync core:
//! - Outbox queue with coalescing, CAS claims, and retry backoff
//! - Sync cycle coordination and completion signalling
//! - The request gate deferring user operations during a cycle
//! - The replay engine with server-id cascade and hybrid retention
//! - The isolated background worker

pub mod config;
pub mod coordinator;
pub mod engine;
pub mod errors;
pub mod gate;
pub mod outbox;
pub mod worker;

pub use config::SyncConfig;
pub use coordinator::{SyncCoordinator, SyncSnapshot};
pub use engine::{PassStats, SyncEngine};
pub use errors::{Result, SyncError};
pub use gate::RequestGate;
pub use outbox::{EnqueueOutcome, OutboxQueue};
pub use worker::BackgroundSyncWorker;
