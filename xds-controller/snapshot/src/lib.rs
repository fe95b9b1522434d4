//! Per-client xDS snapshots.
//!
//! A client's snapshot combines resources shared by every client of a gateway (listeners, routes
//! and plugin-required clusters) with resources translated for that client alone (clusters and
//! endpoints). Every collection is versioned by XOR-folding the content hashes of its items, so
//! versions are independent of order and change only when content does.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod cache;
mod per_client;
mod resources;
mod snapshot;

#[cfg(test)]
mod tests;

pub use self::{
    cache::{InMemorySnapshotCache, SnapshotCache},
    per_client::{ClustersWithErrors, PerClientResources, UccWithCluster},
    resources::{Resources, XorSet},
    snapshot::{assemble, GatewayXds, Snapshot, XdsSnapWrapper},
};
