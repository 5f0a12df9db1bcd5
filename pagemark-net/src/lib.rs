//! Network reachability detection for pagemark
//!
//! Seeded by connectivity edges, verified against the API's health
//! endpoints, published on the shared event bus.

pub mod probe;

pub use probe::{ConnectivityState, NetworkProbe, ProbeConfig};
