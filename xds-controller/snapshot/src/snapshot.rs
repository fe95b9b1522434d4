use crate::{PerClientResources, Resources, XorSet};
use envoy_types::pb::envoy::config::{
    cluster::v3::Cluster, endpoint::v3::ClusterLoadAssignment, listener::v3::Listener,
    route::v3::RouteConfiguration,
};
use gateway_xds_controller_core::{
    hash::{hash_cluster, hash_listener, hash_route_configuration},
    ObjectSource, UniquelyConnectedClient,
};
use gateway_xds_controller_translator::{BackendError, TranslationResult};
use std::collections::BTreeMap;

/// Resources shared by every client of a gateway.
#[derive(Clone, Debug, PartialEq)]
pub struct GatewayXds {
    pub gateway: ObjectSource,
    pub listeners: XorSet<Listener>,
    pub routes: XorSet<RouteConfiguration>,
    pub extra_clusters: XorSet<Cluster>,
}

/// The four resource slots served to a client.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    pub clusters: Resources<Cluster>,
    pub endpoints: Resources<ClusterLoadAssignment>,
    pub routes: Resources<RouteConfiguration>,
    pub listeners: Resources<Listener>,
}

/// A client's snapshot along with the backends that were left out of it.
#[derive(Clone, Debug, PartialEq)]
pub struct XdsSnapWrapper {
    pub proxy_key: String,
    pub snapshot: Snapshot,
    pub errored_clusters: BTreeMap<String, BackendError>,
}

// === impl GatewayXds ===

impl GatewayXds {
    pub fn new(gateway: ObjectSource, result: TranslationResult) -> Self {
        let TranslationResult {
            listeners,
            routes,
            extra_clusters,
        } = result;
        Self {
            gateway,
            listeners: listeners
                .into_iter()
                .map(|l| (l.name.clone(), hash_listener(&l), l))
                .collect(),
            routes: routes
                .into_iter()
                .map(|r| (r.name.clone(), hash_route_configuration(&r), r))
                .collect(),
            extra_clusters: extra_clusters
                .into_iter()
                .map(|c| (c.name.clone(), hash_cluster(&c), c))
                .collect(),
        }
    }
}

// === impl Snapshot ===

impl Snapshot {
    /// The version of each slot, in cluster, endpoint, route, listener order.
    pub fn versions(&self) -> [&str; 4] {
        [
            self.clusters.version.as_str(),
            self.endpoints.version.as_str(),
            self.routes.version.as_str(),
            self.listeners.version.as_str(),
        ]
    }
}

/// Combines a gateway's shared resources with those translated for `client`.
///
/// Returns `None` until both halves are available, so that a client never receives listeners
/// that reference clusters it has not been sent.
pub fn assemble(
    client: &UniquelyConnectedClient,
    gateway: Option<&GatewayXds>,
    per_client: Option<&PerClientResources>,
) -> Option<XdsSnapWrapper> {
    let (Some(gateway), Some(per_client)) = (gateway, per_client) else {
        tracing::debug!(
            client = client.resource_name(),
            gateway = gateway.is_some(),
            per_client = per_client.is_some(),
            "Deferring snapshot"
        );
        return None;
    };

    let mut clusters = per_client.clusters.clusters.to_resources();
    for (name, cluster) in gateway.extra_clusters.iter() {
        if clusters.items.contains_key(name) {
            tracing::debug!(client = client.resource_name(), cluster = name, "Backend cluster shadows plugin cluster");
            continue;
        }
        clusters.items.insert(name.to_string(), cluster.clone());
    }
    clusters.version =
        (per_client.clusters.version() ^ gateway.extra_clusters.version()).to_string();

    let snapshot = Snapshot {
        clusters,
        endpoints: per_client.endpoints.to_resources(),
        routes: gateway.routes.to_resources(),
        listeners: gateway.listeners.to_resources(),
    };

    let errored_clusters = per_client
        .clusters
        .errored
        .iter()
        .map(|(name, e)| (name.to_string(), e.clone()))
        .collect::<BTreeMap<_, _>>();
    if !errored_clusters.is_empty() {
        tracing::info!(
            client = client.resource_name(),
            errored = ?errored_clusters.keys().collect::<Vec<_>>(),
            "Snapshot omits clusters that failed to translate"
        );
    }

    Some(XdsSnapWrapper {
        proxy_key: client.resource_name().to_string(),
        snapshot,
        errored_clusters,
    })
}
