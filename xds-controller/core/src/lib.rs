//! Gateway xDS controller core types.
//!
//! The controller compiles Gateway API resources into Envoy xDS resources. By the time objects reach
//! this crate they have already been resolved by the reconciliation layer into an intermediate
//! representation (IR): routes know which listeners they attach to, backend references are either
//! resolved backends or errors, and policies are attached to the objects they target.
//!
//! ```text
//! [ Gateway ] -> [ Listener ] <- [ xRoute ] -> [ Backend ]
//!                     ^              ^              ^
//!                     +---------- [ Policy ] -------+
//! ```
//!
//! This crate defines that IR, the plugin contract used to extend translation with policies, and
//! the stable hashing used to version the resulting snapshots.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod backend;
pub mod client;
pub mod endpoints;
mod error;
pub mod gateway;
mod group_kind;
pub mod hash;
pub mod http_route;
pub mod plugin;
pub mod policy;
mod settings;
pub mod tcp_route;

pub use self::{
    client::UniquelyConnectedClient,
    error::Error,
    group_kind::{GroupKind, ObjectSource, ParentRef, GATEWAY_API_GROUP, GATEWAY_API_X_GROUP},
    settings::{DnsLookupFamily, TranslatorSettings},
};

pub const GATEWAY_CONTROLLER_NAME: &str = "xds.gateway.dev/gateway-controller";
