//! Translates gateway IR into Envoy xDS resources.
//!
//! [`GatewayTranslator`] produces the listeners and routes shared by every client of a gateway.
//! [`BackendTranslator`] produces clusters, once per connected client. Both record their findings
//! in a [`ReportMap`](gateway_xds_controller_reports::ReportMap) rather than failing.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod backend;
pub mod envoy_validator;
mod gateway;
pub mod hostname;
pub mod listener;
mod policies;
mod routes;
mod sort;
mod validate;

#[cfg(test)]
mod test_util;

pub use self::{
    backend::{blackhole, BackendError, BackendTranslator, TranslatedBackend, HTTP_PROTOCOL_OPTIONS_KEY},
    envoy_validator::{EnvoyValidator, StrictOutcome},
    gateway::{GatewayTranslator, TranslationResult},
    sort::compare_rule_matches,
    validate::{validate_route, ValidationError},
};
