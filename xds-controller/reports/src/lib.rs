//! Accumulates translation findings and renders them as Kubernetes status.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod build;
pub mod conditions;
mod report_map;
pub mod status;

#[cfg(test)]
mod tests;

pub use self::{
    build::{
        build_gw_status, build_listener_set_status, build_policy_status, build_route_status,
        MAX_POLICY_ANCESTORS,
    },
    report_map::{
        ConditionReport, Conditions, GatewayReport, ListenerReport, ListenerSetReport,
        PolicyReport, ReportMap, RouteReport,
    },
};
