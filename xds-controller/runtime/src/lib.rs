//! Runs the gateway xDS controller: keeps per-client snapshots current as inputs change and writes
//! translation reports onto Kubernetes status.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use gateway_xds_controller_core as core;
pub use gateway_xds_controller_reports as reports;
pub use gateway_xds_controller_snapshot as snapshot;
pub use gateway_xds_controller_translator as translator;

mod args;
mod lease;
pub mod metrics;
pub mod proxy_syncer;
pub mod status;

pub use self::args::Args;
