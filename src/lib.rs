//! Pagemark workspace root
//!
//! This crate serves as the root of the pagemark workspace and contains
//! integration tests that exercise the sync engine end to end against a
//! mock of the remote API.

// Re-export major components for integration testing
pub use pagemark_api as api;
pub use pagemark_net as net;
pub use pagemark_proto as proto;
pub use pagemark_service as service;
pub use pagemark_store as store;
pub use pagemark_sync as sync;
