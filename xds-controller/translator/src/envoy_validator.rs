//! Validates routes with a real Envoy binary.
//!
//! Each route is embedded in a minimal static bootstrap, with a stand-in cluster for every
//! cluster it references, and checked with `envoy --mode validate`. Envoy's error text does not
//! say whether the matcher or the rest of the route is at fault, so the matcher is checked on its
//! own first.

use crate::validate::ValidationError;
use anyhow::{Context, Result};
use envoy_types::pb::{
    envoy::{
        config::{
            cluster::v3::{cluster, Cluster},
            core::v3::{address, socket_address::PortSpecifier, Address, SocketAddress},
            listener::v3::{filter, Filter, FilterChain, Listener},
            route::v3::{
                route, route_action::ClusterSpecifier, DirectResponseAction, Route,
                RouteConfiguration, VirtualHost,
            },
        },
        extensions::filters::{
            http::router::v3::Router,
            network::http_connection_manager::v3::{
                http_connection_manager::RouteSpecifier, http_filter, HttpConnectionManager,
                HttpFilter,
            },
        },
    },
    google::protobuf::Duration,
};
use gateway_xds_controller_core::plugin::to_any;
use prost::Message;
use std::{
    collections::BTreeSet,
    io::Write,
    path::{Path, PathBuf},
    process::Command,
};

pub const HCM_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager";
pub const ROUTER_TYPE_URL: &str = "type.googleapis.com/envoy.extensions.filters.http.router.v3.Router";
pub const HCM_FILTER_NAME: &str = "envoy.filters.network.http_connection_manager";
pub const ROUTER_FILTER_NAME: &str = "envoy.filters.http.router";

#[derive(Clone, Debug)]
pub struct EnvoyValidator {
    binary: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StrictOutcome {
    Valid,
    /// The match itself is unusable. The route is dropped without a report.
    InvalidMatcher(String),
    InvalidRoute(ValidationError),
}

/// The subset of `envoy.config.bootstrap.v3.Bootstrap` needed for validation.
#[derive(Clone, PartialEq, Message)]
struct ValidationBootstrap {
    #[prost(message, optional, tag = "1")]
    static_resources: Option<StaticResources>,
}

#[derive(Clone, PartialEq, Message)]
struct StaticResources {
    #[prost(message, repeated, tag = "1")]
    listeners: Vec<Listener>,
    #[prost(message, repeated, tag = "2")]
    clusters: Vec<Cluster>,
}

// === impl EnvoyValidator ===

impl EnvoyValidator {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn check(&self, route: &Route) -> Result<StrictOutcome> {
        let matcher_only = Route {
            name: route.name.clone(),
            r#match: route.r#match.clone(),
            action: Some(route::Action::DirectResponse(DirectResponseAction {
                status: 200,
                ..Default::default()
            })),
            ..Default::default()
        };
        if let Err(error) = self.run(&matcher_only)? {
            return Ok(StrictOutcome::InvalidMatcher(error));
        }
        match self.run(route)? {
            Ok(()) => Ok(StrictOutcome::Valid),
            Err(error) => Ok(StrictOutcome::InvalidRoute(ValidationError::Envoy(error))),
        }
    }

    /// Runs Envoy over a bootstrap holding `route`. The outer error means Envoy could not be run
    /// at all; the inner one is Envoy's rejection.
    fn run(&self, route: &Route) -> Result<Result<(), String>> {
        let bootstrap = bootstrap(route);
        let mut file = tempfile::Builder::new()
            .prefix("route-validation-")
            .suffix(".pb")
            .tempfile()
            .context("failed to create bootstrap file")?;
        file.write_all(&bootstrap.encode_to_vec())
            .context("failed to write bootstrap file")?;
        file.flush()?;
        self.exec(file.path())
    }

    fn exec(&self, config: &Path) -> Result<Result<(), String>> {
        let output = Command::new(&self.binary)
            .arg("--mode")
            .arg("validate")
            .arg("--log-level")
            .arg("critical")
            .arg("-c")
            .arg(config)
            .output()
            .with_context(|| format!("failed to run {}", self.binary.display()))?;
        if output.status.success() {
            return Ok(Ok(()));
        }
        let mut text = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if text.is_empty() {
            text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        }
        Ok(Err(text))
    }
}

fn bootstrap(route: &Route) -> ValidationBootstrap {
    let route_config = RouteConfiguration {
        name: "validation".to_string(),
        virtual_hosts: vec![VirtualHost {
            name: "validation".to_string(),
            domains: vec!["*".to_string()],
            routes: vec![route.clone()],
            ..Default::default()
        }],
        ..Default::default()
    };
    let hcm = HttpConnectionManager {
        stat_prefix: "validation".to_string(),
        route_specifier: Some(RouteSpecifier::RouteConfig(route_config)),
        http_filters: vec![HttpFilter {
            name: ROUTER_FILTER_NAME.to_string(),
            config_type: Some(http_filter::ConfigType::TypedConfig(to_any(
                ROUTER_TYPE_URL,
                &Router::default(),
            ))),
            ..Default::default()
        }],
        ..Default::default()
    };
    let listener = Listener {
        name: "validation".to_string(),
        address: Some(Address {
            address: Some(address::Address::SocketAddress(SocketAddress {
                address: "127.0.0.1".to_string(),
                port_specifier: Some(PortSpecifier::PortValue(0)),
                ..Default::default()
            })),
        }),
        filter_chains: vec![FilterChain {
            filters: vec![Filter {
                name: HCM_FILTER_NAME.to_string(),
                config_type: Some(filter::ConfigType::TypedConfig(to_any(HCM_TYPE_URL, &hcm))),
            }],
            ..Default::default()
        }],
        ..Default::default()
    };
    let clusters = referenced_clusters(route)
        .into_iter()
        .map(|name| Cluster {
            name,
            cluster_discovery_type: Some(cluster::ClusterDiscoveryType::Type(
                cluster::DiscoveryType::Static as i32,
            )),
            connect_timeout: Some(Duration {
                seconds: 1,
                nanos: 0,
            }),
            ..Default::default()
        })
        .collect();

    ValidationBootstrap {
        static_resources: Some(StaticResources {
            listeners: vec![listener],
            clusters,
        }),
    }
}

fn referenced_clusters(route: &Route) -> BTreeSet<String> {
    let Some(route::Action::Route(action)) = &route.action else {
        return BTreeSet::new();
    };
    match &action.cluster_specifier {
        Some(ClusterSpecifier::Cluster(name)) => [name.clone()].into_iter().collect(),
        Some(ClusterSpecifier::WeightedClusters(wc)) => {
            wc.clusters.iter().map(|c| c.name.clone()).collect()
        }
        _ => BTreeSet::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use envoy_types::pb::envoy::config::route::v3::{
        weighted_cluster::ClusterWeight, RouteAction, WeightedCluster,
    };

    #[test]
    fn bootstrap_carries_stand_in_clusters() {
        let route = Route {
            name: "r".to_string(),
            action: Some(route::Action::Route(RouteAction {
                cluster_specifier: Some(ClusterSpecifier::WeightedClusters(WeightedCluster {
                    clusters: vec![
                        ClusterWeight {
                            name: "b".to_string(),
                            ..Default::default()
                        },
                        ClusterWeight {
                            name: "a".to_string(),
                            ..Default::default()
                        },
                    ],
                    ..Default::default()
                })),
                ..Default::default()
            })),
            ..Default::default()
        };

        let bootstrap = bootstrap(&route);
        let resources = bootstrap.static_resources.expect("static resources");
        let names = resources
            .clusters
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(resources.listeners.len(), 1);
    }

    #[test]
    fn missing_binary_is_an_infrastructure_error() {
        let validator = EnvoyValidator::new("/nonexistent/envoy");
        assert!(validator.check(&Route::default()).is_err());
    }
}
