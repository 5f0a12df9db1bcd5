//! Hybrid routing policy
//!
//! One table decides where every operation goes, so the foreground and
//! background paths cannot drift apart:
//!
//! | operation | online | syncing | route |
//! |---|---|---|---|
//! | write | no | — | store-first (enqueue) |
//! | write | yes | yes | defer through the gate |
//! | write | yes | no | server-first, store fallback |
//! | read | no | — | store only |
//! | read | yes | — | server-first, store fallback |

/// Route for a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteRoute {
    /// Call the server now, reconcile the store on success.
    ServerFirst,
    /// Park the operation in the request gate until the cycle completes.
    Defer,
    /// Write locally and enqueue for later replay.
    StoreFirst,
}

/// Route for a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadRoute {
    ServerFirst,
    StoreOnly,
}

pub fn write_route(online: bool, syncing: bool) -> WriteRoute {
    if !online {
        WriteRoute::StoreFirst
    } else if syncing {
        WriteRoute::Defer
    } else {
        WriteRoute::ServerFirst
    }
}

pub fn read_route(online: bool) -> ReadRoute {
    if online {
        ReadRoute::ServerFirst
    } else {
        ReadRoute::StoreOnly
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_table() {
        assert_eq!(write_route(false, false), WriteRoute::StoreFirst);
        assert_eq!(write_route(false, true), WriteRoute::StoreFirst);
        assert_eq!(write_route(true, true), WriteRoute::Defer);
        assert_eq!(write_route(true, false), WriteRoute::ServerFirst);
    }

    #[test]
    fn read_table() {
        assert_eq!(read_route(true), ReadRoute::ServerFirst);
        assert_eq!(read_route(false), ReadRoute::StoreOnly);
    }
}
