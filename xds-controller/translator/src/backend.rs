//! Per-client backend translation.
//!
//! Backends are translated once per connected client, since per-client policy plugins may mutate
//! the cluster. A backend that cannot be translated still yields a usable cluster: a static
//! cluster with no endpoints, returned together with the error.

use envoy_types::pb::{
    envoy::{
        config::{
            cluster::v3::{cluster, Cluster},
            core::v3::Http2ProtocolOptions,
            endpoint::v3::ClusterLoadAssignment,
        },
        extensions::upstreams::http::v3::{
            http_protocol_options::{
                explicit_http_config::ProtocolConfig, ExplicitHttpConfig, UpstreamProtocolOptions,
            },
            HttpProtocolOptions,
        },
    },
    google::protobuf::Duration,
};
use gateway_xds_controller_core::{
    backend::BackendObjectIr,
    endpoints::EndpointsIr,
    plugin::{to_any, BackendContext, PluginRegistry},
    GroupKind, TranslatorSettings, UniquelyConnectedClient,
};

pub const HTTP_PROTOCOL_OPTIONS_KEY: &str = "envoy.extensions.upstreams.http.v3.HttpProtocolOptions";
const HTTP_PROTOCOL_OPTIONS_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.upstreams.http.v3.HttpProtocolOptions";

const CONNECT_TIMEOUT: Duration = Duration {
    seconds: 5,
    nanos: 0,
};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("no plugin registered for backend kind {0}")]
    NoPlugin(GroupKind),

    #[error("{}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Resolution(Vec<gateway_xds_controller_core::Error>),

    #[error("failed to initialize backend: {0}")]
    Init(String),

    #[error("backend policy {plugin} failed: {message}")]
    Policy { plugin: String, message: String },
}

#[derive(Clone, Debug)]
pub struct BackendTranslator {
    plugins: PluginRegistry,
    settings: TranslatorSettings,
}

/// The result of translating one backend for one client.
#[derive(Clone, Debug, PartialEq)]
pub struct TranslatedBackend {
    pub cluster: Cluster,

    /// The assignment to serve over EDS, for clusters that do not inline their endpoints.
    pub load_assignment: Option<ClusterLoadAssignment>,

    /// Set when `cluster` is a blackhole standing in for the backend.
    pub error: Option<BackendError>,
}

// === impl BackendTranslator ===

impl BackendTranslator {
    pub fn new(plugins: PluginRegistry, settings: TranslatorSettings) -> Self {
        Self { plugins, settings }
    }

    pub fn translate(
        &self,
        client: &UniquelyConnectedClient,
        backend: &BackendObjectIr,
    ) -> TranslatedBackend {
        let name = backend.cluster_name();
        match self.try_translate(client, backend) {
            Ok((cluster, load_assignment)) => TranslatedBackend {
                cluster,
                load_assignment,
                error: None,
            },
            Err(error) => {
                tracing::info!(client = client.resource_name(), backend = %backend.source, %error, "Using blackhole cluster");
                TranslatedBackend {
                    cluster: blackhole(name),
                    load_assignment: None,
                    error: Some(error),
                }
            }
        }
    }

    fn try_translate(
        &self,
        client: &UniquelyConnectedClient,
        backend: &BackendObjectIr,
    ) -> Result<(Cluster, Option<ClusterLoadAssignment>), BackendError> {
        if !backend.errors.is_empty() {
            return Err(BackendError::Resolution(backend.errors.clone()));
        }
        let plugin = self
            .plugins
            .backend_plugin(backend.group_kind())
            .ok_or_else(|| BackendError::NoPlugin(backend.group_kind().clone()))?;

        let mut cluster = Cluster {
            name: backend.cluster_name(),
            connect_timeout: Some(CONNECT_TIMEOUT),
            ..Default::default()
        };
        if backend.app_protocol.is_http2() {
            cluster.typed_extension_protocol_options.insert(
                HTTP_PROTOCOL_OPTIONS_KEY.to_string(),
                to_any(HTTP_PROTOCOL_OPTIONS_TYPE_URL, &http2_options()),
            );
        }

        let endpoints = plugin
            .init_backend(backend, &mut cluster)
            .map_err(|e| BackendError::Init(e.to_string()))?;

        if matches!(
            discovery_type(&cluster),
            Some(cluster::DiscoveryType::StrictDns | cluster::DiscoveryType::LogicalDns)
        ) {
            cluster.dns_lookup_family = self.settings.dns_lookup_family.to_envoy() as i32;
        }

        let ctx = BackendContext { client, backend };
        for (gk, plugin) in self.plugins.policy_plugins() {
            plugin
                .per_client_process_backend(&ctx, &mut cluster)
                .map_err(|e| BackendError::Policy {
                    plugin: plugin.name().to_string(),
                    message: e.to_string(),
                })?;
            if let Some(policy) = self.plugins.merge(gk, backend.attached_policies.get(gk)) {
                plugin
                    .apply_for_backend(&ctx, &policy, &mut cluster)
                    .map_err(|e| BackendError::Policy {
                        plugin: plugin.name().to_string(),
                        message: e.to_string(),
                    })?;
            }
        }

        let mut endpoints = endpoints
            .or_else(|| backend.endpoints.as_deref().cloned())
            .unwrap_or_else(|| EndpointsIr::new(&cluster.name));
        endpoints.cluster_name = cluster.name.clone();
        for (_, plugin) in self.plugins.policy_plugins() {
            plugin.per_client_process_endpoints(client, &mut endpoints);
        }

        let mut load_assignment = None;
        match discovery_type(&cluster) {
            Some(
                cluster::DiscoveryType::Static
                | cluster::DiscoveryType::StrictDns
                | cluster::DiscoveryType::LogicalDns,
            ) => {
                if cluster.load_assignment.is_none() {
                    cluster.load_assignment = Some(endpoints.prioritize(Some(client.locality())));
                }
            }
            Some(cluster::DiscoveryType::Eds) => {
                load_assignment = Some(endpoints.prioritize(Some(client.locality())));
            }
            _ => {}
        }

        Ok((cluster, load_assignment))
    }
}

/// Envoy treats a cluster without a discovery type as static. Custom cluster types have none.
fn discovery_type(cluster: &Cluster) -> Option<cluster::DiscoveryType> {
    match cluster.cluster_discovery_type {
        Some(cluster::ClusterDiscoveryType::Type(t)) => cluster::DiscoveryType::try_from(t).ok(),
        Some(cluster::ClusterDiscoveryType::ClusterType(_)) => None,
        None => Some(cluster::DiscoveryType::Static),
    }
}

fn http2_options() -> HttpProtocolOptions {
    HttpProtocolOptions {
        upstream_protocol_options: Some(UpstreamProtocolOptions::ExplicitHttpConfig(
            ExplicitHttpConfig {
                protocol_config: Some(ProtocolConfig::Http2ProtocolOptions(
                    Http2ProtocolOptions::default(),
                )),
            },
        )),
        ..Default::default()
    }
}

/// A valid static cluster that routes nowhere.
pub fn blackhole(name: String) -> Cluster {
    Cluster {
        load_assignment: Some(ClusterLoadAssignment {
            cluster_name: name.clone(),
            ..Default::default()
        }),
        name,
        cluster_discovery_type: Some(cluster::ClusterDiscoveryType::Type(
            cluster::DiscoveryType::Static as i32,
        )),
        connect_timeout: Some(CONNECT_TIMEOUT),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{bail, Result};
    use envoy_types::pb::envoy::config::cluster::v3::cluster::DnsLookupFamily;
    use gateway_xds_controller_core::{
        backend::AppProtocol,
        endpoints::{EndpointIr, Locality},
        plugin::{BackendPlugin, PolicyPlugin},
        policy::{PolicyAtt, PolicyIr, PolicyRef},
        DnsLookupFamily as Family, Error, ObjectSource,
    };
    use std::{any::Any, collections::BTreeMap, sync::Arc};

    struct Dns;

    impl BackendPlugin for Dns {
        fn init_backend(&self, backend: &BackendObjectIr, out: &mut Cluster) -> Result<Option<EndpointsIr>> {
            out.cluster_discovery_type = Some(cluster::ClusterDiscoveryType::Type(
                cluster::DiscoveryType::StrictDns as i32,
            ));
            let mut eps = EndpointsIr::new("ignored");
            eps.add(
                Locality::default(),
                EndpointIr {
                    address: backend.hostname.clone().unwrap_or_default(),
                    port: backend.port,
                    weight: None,
                },
            );
            Ok(Some(eps))
        }
    }

    struct Eds;

    impl BackendPlugin for Eds {
        fn init_backend(&self, _: &BackendObjectIr, out: &mut Cluster) -> Result<Option<EndpointsIr>> {
            out.cluster_discovery_type = Some(cluster::ClusterDiscoveryType::Type(
                cluster::DiscoveryType::Eds as i32,
            ));
            Ok(None)
        }
    }

    /// Leaves the discovery type to Envoy's default.
    struct Plain;

    impl BackendPlugin for Plain {
        fn init_backend(&self, _: &BackendObjectIr, _: &mut Cluster) -> Result<Option<EndpointsIr>> {
            Ok(None)
        }
    }

    #[derive(Debug, PartialEq)]
    struct Timeout(i64);

    impl PolicyIr for Timeout {
        fn as_any(&self) -> &dyn Any {
            self
        }

        fn equals(&self, other: &dyn PolicyIr) -> bool {
            other.as_any().downcast_ref::<Self>() == Some(self)
        }
    }

    struct TimeoutPlugin;

    impl PolicyPlugin for TimeoutPlugin {
        fn name(&self) -> &str {
            "timeout"
        }

        fn apply_for_backend(&self, _: &BackendContext<'_>, policy: &PolicyAtt, out: &mut Cluster) -> Result<()> {
            let Some(Timeout(secs)) = policy.ir_as::<Timeout>() else {
                bail!("unexpected policy");
            };
            if *secs <= 0 {
                bail!("timeout must be positive");
            }
            out.connect_timeout = Some(Duration {
                seconds: *secs,
                nanos: 0,
            });
            Ok(())
        }
    }

    fn timeout_gk() -> GroupKind {
        GroupKind::new("policy.example.com", "Timeout")
    }

    fn client() -> UniquelyConnectedClient {
        UniquelyConnectedClient::new(
            ObjectSource::gateway("infra", "gw"),
            "infra",
            BTreeMap::new(),
            Locality::default(),
        )
    }

    fn service(name: &str) -> BackendObjectIr {
        let mut backend = BackendObjectIr::new(ObjectSource::new(GroupKind::SERVICE, "ns", name), 8080);
        backend.hostname = Some(format!("{name}.ns.svc.cluster.local"));
        backend
    }

    fn translator(settings: TranslatorSettings) -> BackendTranslator {
        let plugins = PluginRegistry::default()
            .with_backend_plugin(GroupKind::SERVICE, Arc::new(Dns))
            .with_backend_plugin(GroupKind::new("example.com", "Eds"), Arc::new(Eds))
            .with_backend_plugin(GroupKind::new("example.com", "Plain"), Arc::new(Plain))
            .with_policy_plugin(timeout_gk(), Arc::new(TimeoutPlugin));
        BackendTranslator::new(plugins, settings)
    }

    #[test]
    fn dns_cluster_gets_defaults() {
        let mut backend = service("web");
        backend.app_protocol = AppProtocol::Grpc;
        let out = translator(TranslatorSettings::default()).translate(&client(), &backend);

        assert_eq!(out.error, None);
        let cluster = out.cluster;
        assert_eq!(cluster.name, "kube_ns_web_8080");
        assert_eq!(cluster.connect_timeout, Some(CONNECT_TIMEOUT));
        assert_eq!(cluster.dns_lookup_family, DnsLookupFamily::V4Preferred as i32);
        assert!(cluster
            .typed_extension_protocol_options
            .contains_key(HTTP_PROTOCOL_OPTIONS_KEY));
        let cla = cluster.load_assignment.expect("inline endpoints");
        assert_eq!(cla.cluster_name, "kube_ns_web_8080");
        assert_eq!(cla.endpoints.len(), 1);
    }

    #[test]
    fn dns_family_follows_settings() {
        let settings = TranslatorSettings {
            dns_lookup_family: Family::V6Only,
            ..TranslatorSettings::default()
        };
        let out = translator(settings).translate(&client(), &service("web"));
        assert_eq!(out.cluster.dns_lookup_family, DnsLookupFamily::V6Only as i32);
    }

    #[test]
    fn eds_cluster_serves_endpoints_separately() {
        let mut backend = BackendObjectIr::new(
            ObjectSource::new(GroupKind::new("example.com", "Eds"), "ns", "ext"),
            80,
        );
        let mut eps = EndpointsIr::new("x");
        eps.add(
            Locality::default(),
            EndpointIr {
                address: "10.0.0.1".to_string(),
                port: 80,
                weight: None,
            },
        );
        backend.endpoints = Some(Arc::new(eps));

        let out = translator(TranslatorSettings::default()).translate(&client(), &backend);
        assert_eq!(out.error, None);
        assert!(out.cluster.load_assignment.is_none());
        assert_eq!(out.cluster.dns_lookup_family, 0);
        let cla = out.load_assignment.expect("eds endpoints");
        assert_eq!(cla.cluster_name, "eds_ns_ext_80");
    }

    #[test]
    fn unset_discovery_type_inlines_endpoints() {
        let mut backend = BackendObjectIr::new(
            ObjectSource::new(GroupKind::new("example.com", "Plain"), "ns", "ext"),
            80,
        );
        let mut eps = EndpointsIr::new("x");
        eps.add(
            Locality::default(),
            EndpointIr {
                address: "10.0.0.2".to_string(),
                port: 80,
                weight: None,
            },
        );
        backend.endpoints = Some(Arc::new(eps));

        let out = translator(TranslatorSettings::default()).translate(&client(), &backend);
        assert_eq!(out.error, None);
        assert_eq!(out.cluster.cluster_discovery_type, None);
        assert_eq!(out.load_assignment, None);
        let cla = out.cluster.load_assignment.expect("inline endpoints");
        assert_eq!(cla.cluster_name, "plain_ns_ext_80");
        assert_eq!(cla.endpoints.len(), 1);
    }

    #[test]
    fn missing_plugin_yields_blackhole() {
        let backend = BackendObjectIr::new(
            ObjectSource::new(GroupKind::new("example.com", "Unknown"), "ns", "x"),
            80,
        );
        let out = translator(TranslatorSettings::default()).translate(&client(), &backend);
        assert_eq!(
            out.error,
            Some(BackendError::NoPlugin(GroupKind::new("example.com", "Unknown")))
        );
        assert_eq!(out.cluster, blackhole("unknown_ns_x_80".to_string()));
        assert_eq!(
            out.cluster.load_assignment.unwrap().endpoints.len(),
            0,
            "blackhole clusters have no endpoints"
        );
    }

    #[test]
    fn resolution_errors_yield_blackhole() {
        let mut backend = service("web");
        backend.errors = vec![Error::RefNotPermitted(backend.source.clone())];
        let out = translator(TranslatorSettings::default()).translate(&client(), &backend);
        assert!(matches!(out.error, Some(BackendError::Resolution(_))));
        assert_eq!(out.cluster.name, "kube_ns_web_8080");
    }

    #[test]
    fn attached_policy_applies_or_blackholes() {
        let policy = |secs| {
            PolicyAtt::new(
                PolicyRef::new(timeout_gk(), "ns", "t"),
                1,
                Arc::new(Timeout(secs)),
            )
        };

        let mut backend = service("web");
        backend.attached_policies.push(policy(9));
        let out = translator(TranslatorSettings::default()).translate(&client(), &backend);
        assert_eq!(out.cluster.connect_timeout.map(|d| d.seconds), Some(9));

        let mut backend = service("web");
        backend.attached_policies.push(policy(-1));
        let out = translator(TranslatorSettings::default()).translate(&client(), &backend);
        assert_eq!(
            out.error,
            Some(BackendError::Policy {
                plugin: "timeout".to_string(),
                message: "timeout must be positive".to_string(),
            })
        );
        assert_eq!(out.cluster, blackhole("kube_ns_web_8080".to_string()));
    }
}
