//! Shared vocabulary for the pagemark workspace
//!
//! This crate holds the types every other crate speaks: the JSON payloads
//! exchanged with the remote reading-journal API, the tagged entity
//! references used at component boundaries, and the typed event bus that
//! carries network and sync lifecycle notifications.

pub mod events;
pub mod memo;
pub mod shelf;

pub use events::{Event, EventBus};
pub use memo::{
    BookMemoGroup, MemoPayload, MemoResponse, TagMemoGroup, TodayFlowQuery, TodayFlowResponse,
};
pub use shelf::{
    ReadingCategory, ShelfCreatePayload, ShelfResponse, ShelfUpdatePayload, StartReadingPayload,
};

use uuid::Uuid;

/// Reference to an entity by exactly one of its two identities.
///
/// Local ids are client-assigned UUIDs that exist from the moment of
/// creation; server ids are assigned by the remote API on first successful
/// CREATE. Components accept an `EntityRef` instead of guessing which kind
/// of id a caller holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityRef {
    Local(Uuid),
    Server(i64),
}

impl EntityRef {
    pub fn local(&self) -> Option<Uuid> {
        match self {
            EntityRef::Local(id) => Some(*id),
            EntityRef::Server(_) => None,
        }
    }

    pub fn server(&self) -> Option<i64> {
        match self {
            EntityRef::Local(_) => None,
            EntityRef::Server(id) => Some(*id),
        }
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityRef::Local(id) => write!(f, "local:{}", id),
            EntityRef::Server(id) => write!(f, "server:{}", id),
        }
    }
}
