use super::*;
use anyhow::Result;
use envoy_types::pb::envoy::config::{
    cluster::v3::{cluster, Cluster},
    listener::v3::Listener,
    route::v3::RouteConfiguration,
};
use gateway_xds_controller_core::{
    backend::BackendObjectIr,
    endpoints::{EndpointIr, EndpointsIr, Locality},
    plugin::{BackendPlugin, PluginRegistry},
    Error, GroupKind, ObjectSource, TranslatorSettings, UniquelyConnectedClient,
};
use gateway_xds_controller_translator::{BackendTranslator, TranslationResult};
use maplit::btreemap;
use pretty_assertions::assert_eq;
use std::sync::Arc;

struct Eds;

impl BackendPlugin for Eds {
    fn init_backend(&self, _: &BackendObjectIr, out: &mut Cluster) -> Result<Option<EndpointsIr>> {
        out.cluster_discovery_type = Some(cluster::ClusterDiscoveryType::Type(
            cluster::DiscoveryType::Eds as i32,
        ));
        Ok(None)
    }
}

fn client() -> UniquelyConnectedClient {
    UniquelyConnectedClient::new(
        ObjectSource::gateway("infra", "gw"),
        "infra",
        btreemap! { "app".to_string() => "gw".to_string() },
        Locality::default(),
    )
}

fn translator() -> BackendTranslator {
    let plugins = PluginRegistry::default().with_backend_plugin(GroupKind::SERVICE, Arc::new(Eds));
    BackendTranslator::new(plugins, TranslatorSettings::default())
}

fn service(name: &str, addrs: &[&str]) -> BackendObjectIr {
    let mut backend = BackendObjectIr::new(ObjectSource::new(GroupKind::SERVICE, "ns", name), 8080);
    let mut eps = EndpointsIr::new(backend.cluster_name());
    for addr in addrs {
        eps.add(
            Locality::default(),
            EndpointIr {
                address: addr.to_string(),
                port: 8080,
                weight: None,
            },
        );
    }
    backend.endpoints = Some(Arc::new(eps));
    backend
}

fn ucc(backend: &BackendObjectIr) -> UccWithCluster {
    UccWithCluster::new(client(), translator().translate(&client(), backend))
}

fn gateway_xds() -> GatewayXds {
    GatewayXds::new(
        ObjectSource::gateway("infra", "gw"),
        TranslationResult {
            listeners: vec![Listener {
                name: "listener~80".to_string(),
                ..Default::default()
            }],
            routes: vec![RouteConfiguration {
                name: "listener~80".to_string(),
                ..Default::default()
            }],
            extra_clusters: vec![Cluster {
                name: "ext_authz".to_string(),
                ..Default::default()
            }],
        },
    )
}

#[test]
fn xor_set_version_is_order_independent() {
    let forward = [("a", 1), ("b", 2), ("c", 4)]
        .into_iter()
        .map(|(n, h)| (n.to_string(), h, ()))
        .collect::<XorSet<()>>();
    let reverse = [("c", 4), ("b", 2), ("a", 1)]
        .into_iter()
        .map(|(n, h)| (n.to_string(), h, ()))
        .collect::<XorSet<()>>();
    assert_eq!(forward.version(), 7);
    assert_eq!(forward, reverse);
}

#[test]
fn xor_set_replacement_unhashes_prior_item() {
    let mut set = XorSet::default();
    set.insert("a", 0b0011, "first");
    assert_eq!(set.insert("a", 0b0101, "second"), Some("first"));
    assert_eq!(set.version(), 0b0101);
    assert_eq!(set.get("a"), Some(&"second"));
}

#[test]
fn adding_then_removing_a_backend_restores_versions() {
    let a = service("a", &["10.0.0.1"]);
    let b = service("b", &["10.0.0.2", "10.0.0.3"]);

    let mut resources = PerClientResources::new(client());
    resources.insert(ucc(&a));
    let clusters = resources.clusters.version();
    let endpoints = resources.endpoints.version();
    assert_ne!(clusters, 0);

    resources.insert(ucc(&b));
    assert_ne!(resources.clusters.version(), clusters);
    assert_ne!(resources.endpoints.version(), endpoints);

    resources.remove(&b.cluster_name());
    assert_eq!(resources.clusters.version(), clusters);
    assert_eq!(resources.endpoints.version(), endpoints);
}

#[test]
fn endpoint_changes_only_touch_endpoint_version() {
    let translator = translator();
    let before = PerClientResources::translate(&translator, &client(), [&service("a", &["10.0.0.1"])]);
    let after = PerClientResources::translate(&translator, &client(), [&service("a", &["10.0.0.9"])]);
    assert_eq!(before.clusters.version(), after.clusters.version());
    assert_ne!(before.endpoints.version(), after.endpoints.version());
}

#[test]
fn errored_backends_are_isolated() {
    let good = service("good", &["10.0.0.1"]);
    let mut bad = service("bad", &["10.0.0.2"]);
    bad.errors = vec![Error::RefNotPermitted(bad.source.clone())];

    let per_client = PerClientResources::translate(&translator(), &client(), [&good, &bad]);
    assert!(per_client.clusters.errored.contains(&bad.cluster_name()));

    let snap = assemble(&client(), Some(&gateway_xds()), Some(&per_client))
        .expect("snapshot must be produced");
    assert_eq!(snap.proxy_key, client().resource_name());
    assert!(snap.snapshot.clusters.get(&good.cluster_name()).is_some());
    assert!(snap.snapshot.clusters.get(&bad.cluster_name()).is_none());
    assert!(snap.snapshot.endpoints.get(&good.cluster_name()).is_some());
    assert_eq!(
        snap.errored_clusters.keys().cloned().collect::<Vec<_>>(),
        vec![bad.cluster_name()]
    );
}

#[test]
fn error_flaps_do_not_change_versions() {
    let mut bad = service("bad", &[]);
    bad.errors = vec![Error::RefNotPermitted(bad.source.clone())];
    let first = PerClientResources::translate(&translator(), &client(), [&bad]);

    bad.errors = vec![Error::BackendNotFound(bad.source.clone())];
    let second = PerClientResources::translate(&translator(), &client(), [&bad]);

    assert_ne!(first.clusters.errored, second.clusters.errored);
    assert_eq!(first.clusters.version(), second.clusters.version());
    assert_eq!(first.clusters.error_version(), second.clusters.error_version());
}

#[test]
fn recovered_backend_leaves_errored_set() {
    let mut backend = service("web", &["10.0.0.1"]);
    backend.errors = vec![Error::BackendNotFound(backend.source.clone())];
    let mut resources = PerClientResources::new(client());
    resources.insert(ucc(&backend));
    assert_eq!(resources.clusters.clusters.len(), 0);

    backend.errors.clear();
    resources.insert(ucc(&backend));
    assert_eq!(resources.clusters.errored.len(), 0);
    assert_eq!(resources.clusters.error_version(), 0);
    assert!(resources.clusters.clusters.contains(&backend.cluster_name()));
}

#[test]
fn assembly_waits_for_both_halves() {
    let per_client = PerClientResources::new(client());
    assert_eq!(assemble(&client(), None, Some(&per_client)), None);
    assert_eq!(assemble(&client(), Some(&gateway_xds()), None), None);
    assert_eq!(assemble(&client(), None, None), None);
}

#[test]
fn snapshot_merges_shared_and_per_client_clusters() {
    let per_client = PerClientResources::translate(&translator(), &client(), [&service("a", &["10.0.0.1"])]);
    let gateway = gateway_xds();
    let snap = assemble(&client(), Some(&gateway), Some(&per_client)).expect("snapshot");

    assert_eq!(
        snap.snapshot.clusters.names().cloned().collect::<Vec<_>>(),
        vec!["ext_authz".to_string(), "kube_ns_a_8080".to_string()]
    );
    assert_eq!(
        snap.snapshot.clusters.version,
        (per_client.clusters.version() ^ gateway.extra_clusters.version()).to_string()
    );
    assert_eq!(snap.snapshot.listeners.version, gateway.listeners.version().to_string());
    assert_eq!(snap.snapshot.routes.len(), 1);
}

#[test]
fn identical_inputs_yield_identical_snapshots() {
    let backends = [service("a", &["10.0.0.1"]), service("b", &["10.0.0.2"])];
    let first = PerClientResources::translate(&translator(), &client(), &backends);
    let second = PerClientResources::translate(&translator(), &client(), backends.iter().rev());

    let a = assemble(&client(), Some(&gateway_xds()), Some(&first)).expect("snapshot");
    let b = assemble(&client(), Some(&gateway_xds()), Some(&second)).expect("snapshot");
    assert_eq!(a.snapshot.versions(), b.snapshot.versions());
    assert_eq!(a, b);
}

#[test]
fn cache_skips_unchanged_versions() {
    let cache = InMemorySnapshotCache::default();
    let per_client = PerClientResources::translate(&translator(), &client(), [&service("a", &["10.0.0.1"])]);
    let snap = assemble(&client(), Some(&gateway_xds()), Some(&per_client)).expect("snapshot");

    cache.set_snapshot(&snap.proxy_key, snap.snapshot.clone());
    cache.set_snapshot(&snap.proxy_key, snap.snapshot.clone());
    assert_eq!(cache.keys(), vec![snap.proxy_key.clone()]);
    assert_eq!(cache.get(&snap.proxy_key), Some(snap.snapshot));

    cache.clear_snapshot(&snap.proxy_key);
    assert!(cache.is_empty());
}
