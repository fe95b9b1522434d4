use crate::{
    envoy_validator::{EnvoyValidator, HCM_FILTER_NAME, HCM_TYPE_URL, ROUTER_FILTER_NAME, ROUTER_TYPE_URL},
    listener::{chain_name, merge_listeners, validate_listeners, HttpFilterChain, MergedListener, TcpFilterChain, VirtualHostIr},
    policies::PolicyReporter,
    routes::{Passes, RouteTranslator},
};
use envoy_types::pb::{
    envoy::{
        config::{
            cluster::v3::Cluster,
            core::v3::{
                config_source::ConfigSourceSpecifier, data_source, transport_socket,
                AggregatedConfigSource, ApiVersion, ConfigSource, DataSource, TransportSocket,
            },
            listener::v3::{
                filter, listener_filter, Filter, FilterChain, FilterChainMatch, Listener,
                ListenerFilter,
            },
            route::v3::{RouteConfiguration, VirtualHost},
        },
        extensions::{
            filters::{
                http::router::v3::Router,
                listener::tls_inspector::v3::TlsInspector,
                network::{
                    http_connection_manager::v3::{
                        http_connection_manager::RouteSpecifier, http_filter, HttpConnectionManager,
                        HttpFilter, Rds,
                    },
                    tcp_proxy::v3::{
                        tcp_proxy::{self, weighted_cluster::ClusterWeight},
                        TcpProxy,
                    },
                },
            },
            transport_sockets::tls::v3::{
                CommonTlsContext, DownstreamTlsContext, TlsCertificate as EnvoyTlsCertificate,
            },
        },
    },
};
use gateway_xds_controller_core::{
    endpoints::socket_address,
    gateway::{GatewayIr, Listener as ListenerIr, Protocol, RoutesByListener, TlsCertificate},
    plugin::{
        to_any, FilterChainCommon, HcmContext, ListenerContext, PluginRegistry, ProxyTranslationPass,
        RouteConfigContext, StagedHttpFilter, StagedNetworkFilter, TranslationPassContext,
        VirtualHostContext,
    },
    policy::{AttachedPolicies, PolicyAtt},
    ParentRef, TranslatorSettings,
};
use gateway_xds_controller_reports::{
    conditions::{self, reason},
    ConditionReport, ReportMap,
};

const TLS_INSPECTOR_NAME: &str = "envoy.filters.listener.tls_inspector";
const TLS_INSPECTOR_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.listener.tls_inspector.v3.TlsInspector";
const TLS_TRANSPORT_SOCKET_NAME: &str = "envoy.transport_sockets.tls";
const DOWNSTREAM_TLS_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.DownstreamTlsContext";
const TCP_PROXY_NAME: &str = "envoy.filters.network.tcp_proxy";
const TCP_PROXY_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.network.tcp_proxy.v3.TcpProxy";

/// Translates a gateway's IR into the listeners and routes shared by all of its clients.
#[derive(Clone, Debug)]
pub struct GatewayTranslator {
    plugins: PluginRegistry,
    settings: TranslatorSettings,
    validator: Option<EnvoyValidator>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TranslationResult {
    pub listeners: Vec<Listener>,
    pub routes: Vec<RouteConfiguration>,

    /// Clusters required by plugins, sorted by name.
    pub extra_clusters: Vec<Cluster>,
}

/// Shared state for translating one gateway.
struct Translation<'t> {
    gateway: &'t GatewayIr,
    plugins: &'t PluginRegistry,
    validator: Option<&'t EnvoyValidator>,
    bind_address: &'t str,
    passes: Passes,
    policies: PolicyReporter,
    network_filters: Vec<StagedNetworkFilter>,
}

// === impl GatewayTranslator ===

impl GatewayTranslator {
    pub fn new(plugins: PluginRegistry, settings: TranslatorSettings) -> Self {
        let validator = settings
            .envoy_validation_binary
            .as_ref()
            .map(EnvoyValidator::new);
        Self {
            plugins,
            settings,
            validator,
        }
    }

    /// Translates `gateway`, recording findings in `reports`.
    ///
    /// This is a pure function of its inputs: translating the same IR twice yields identical
    /// output and identical reports.
    pub fn translate(
        &self,
        gateway: &GatewayIr,
        routes: &RoutesByListener,
        reports: &mut ReportMap,
    ) -> TranslationResult {
        let _span = tracing::info_span!("translate", gateway = %gateway.source).entered();

        reports.gateway(&gateway.source, gateway.generation);
        for l in &gateway.listeners {
            reports.listener(&l.parent, l.parent_generation, &l.name);
        }

        let validated = validate_listeners(gateway, reports);
        let merged = merge_listeners(gateway, &validated, routes, reports);

        let mut t = Translation {
            gateway,
            plugins: &self.plugins,
            validator: self.validator.as_ref(),
            bind_address: &self.settings.bind_address,
            passes: self
                .plugins
                .new_translation_passes(&TranslationPassContext { gateway }),
            policies: PolicyReporter::default(),
            network_filters: vec![],
        };

        let gateway_ref = ParentRef::new(&gateway.source);
        t.policies.observe(gateway.attached_policies.all(), &gateway_ref);
        for l in &gateway.listeners {
            t.policies.observe(l.attached_policies.all(), &l.parent_ref());
        }

        t.network_filters = t.collect_network_filters();

        let mut out = TranslationResult::default();
        for ml in &merged {
            let (listener, route_configs) = t.listener(ml, reports);
            if listener.filter_chains.is_empty() {
                tracing::debug!(listener = %listener.name, "Skipping listener without filter chains");
                continue;
            }
            out.listeners.push(listener);
            out.routes.extend(route_configs);
        }

        for (_, pass) in t.passes.iter_mut() {
            out.extra_clusters.extend(pass.resources_to_add());
        }
        out.extra_clusters.sort_by(|a, b| a.name.cmp(&b.name));
        out.extra_clusters.dedup_by(|a, b| a.name == b.name);

        t.policies.report(reports);

        if out.listeners.is_empty() {
            reports
                .gateway(&gateway.source, gateway.generation)
                .conditions
                .set(
                    ConditionReport::new(conditions::PROGRAMMED, false, reason::INVALID)
                        .with_message("gateway has no valid listeners"),
                );
        }

        tracing::debug!(
            listeners = out.listeners.len(),
            routes = out.routes.len(),
            "Translated gateway"
        );
        out
    }
}

// === impl Translation ===

impl Translation<'_> {
    fn collect_network_filters(&mut self) -> Vec<StagedNetworkFilter> {
        let mut filters = vec![];
        for (gk, pass) in self.passes.iter_mut() {
            match pass.network_filters() {
                Ok(fs) => filters.extend(fs),
                Err(error) => {
                    tracing::warn!(plugin = %gk, %error, "Failed to build network filters")
                }
            }
        }
        filters.sort_by_key(|f| f.stage);
        filters
    }

    fn http_filters(&mut self, fc: &FilterChainCommon) -> Vec<HttpFilter> {
        let mut filters = Vec::<StagedHttpFilter>::new();
        for (gk, pass) in self.passes.iter_mut() {
            match pass.http_filters(fc) {
                Ok(fs) => filters.extend(fs),
                Err(error) => {
                    tracing::warn!(plugin = %gk, chain = %fc.name, %error, "Failed to build HTTP filters")
                }
            }
        }
        filters.sort_by_key(|f| f.stage);
        let mut out = filters.into_iter().map(|f| f.filter).collect::<Vec<_>>();
        out.push(HttpFilter {
            name: ROUTER_FILTER_NAME.to_string(),
            config_type: Some(http_filter::ConfigType::TypedConfig(to_any(
                ROUTER_TYPE_URL,
                &Router::default(),
            ))),
            ..Default::default()
        });
        out
    }

    /// The effective policies for a listener: its own, then the gateway's.
    fn listener_scope(&self, policies: &AttachedPolicies) -> AttachedPolicies {
        let mut scope = policies.clone();
        scope.append(&self.gateway.attached_policies);
        scope
    }

    fn listener(&mut self, ml: &MergedListener, reports: &mut ReportMap) -> (Listener, Vec<RouteConfiguration>) {
        let mut filter_chains = vec![];
        let mut route_configs = vec![];

        if let Some(chain) = &ml.http {
            let (fc, rc) = self.http_chain(ml, chain, reports);
            filter_chains.push(fc);
            route_configs.push(rc);
        }
        for chain in &ml.https {
            let (fc, rc) = self.http_chain(ml, chain, reports);
            filter_chains.push(fc);
            route_configs.push(rc);
        }
        for chain in &ml.tcp {
            if let Some(fc) = self.tcp_chain(chain, reports) {
                filter_chains.push(fc);
            }
        }

        let needs_tls_inspector = filter_chains.iter().any(|fc| {
            fc.transport_socket.is_some()
                || fc
                    .filter_chain_match
                    .as_ref()
                    .is_some_and(|m| !m.server_names.is_empty())
        });

        let mut listener = Listener {
            name: ml.name.clone(),
            address: Some(socket_address(self.bind_address, ml.port)),
            filter_chains,
            listener_filters: if needs_tls_inspector {
                vec![ListenerFilter {
                    name: TLS_INSPECTOR_NAME.to_string(),
                    config_type: Some(listener_filter::ConfigType::TypedConfig(to_any(
                        TLS_INSPECTOR_TYPE_URL,
                        &TlsInspector::default(),
                    ))),
                    ..Default::default()
                }]
            } else {
                vec![]
            },
            ..Default::default()
        };

        // Every listener merged onto the port contributes its own policies.
        for parent in &ml.parents {
            let scope = self.listener_scope(&parent.attached_policies);
            self.apply_scoped(&scope, parent, |pass, policy| {
                pass.apply_listener_plugin(
                    &ListenerContext {
                        listener: parent,
                        policy,
                    },
                    &mut listener,
                )
            });
        }

        (listener, route_configs)
    }

    /// Runs `f` for every pass whose kind has an effective policy in `scope`, reporting failures
    /// against `listener`.
    fn apply_scoped(
        &mut self,
        scope: &AttachedPolicies,
        listener: &ListenerIr,
        mut f: impl FnMut(&mut dyn ProxyTranslationPass, &PolicyAtt) -> anyhow::Result<()>,
    ) {
        let ancestor = listener.parent_ref();
        for (gk, pass) in self.passes.iter_mut() {
            let Some(policy) = self.plugins.merge(gk, scope.get(gk)) else {
                continue;
            };
            if let Err(error) = f(pass.as_mut(), &policy) {
                tracing::warn!(listener = %listener.name, plugin = %gk, %error, "Listener policy failed");
                self.policies.error(&policy, &ancestor, &error);
            }
        }
    }

    fn http_chain(
        &mut self,
        ml: &MergedListener,
        chain: &HttpFilterChain,
        reports: &mut ReportMap,
    ) -> (FilterChain, RouteConfiguration) {
        let mut hcm = HttpConnectionManager {
            stat_prefix: chain.name.clone(),
            route_specifier: Some(RouteSpecifier::Rds(Rds {
                route_config_name: chain.name.clone(),
                config_source: Some(ads()),
            })),
            http_filters: self.http_filters(&FilterChainCommon {
                name: chain.name.clone(),
                port: ml.port,
            }),
            ..Default::default()
        };

        let parent = chain_parent(ml, chain);
        if let Some(parent) = parent {
            let scope = self.listener_scope(&chain.attached_policies);
            let gateway = self.gateway;
            self.apply_scoped(&scope, parent, |pass, policy| {
                pass.apply_hcm(
                    &HcmContext {
                        gateway,
                        port: ml.port,
                        policy,
                    },
                    &mut hcm,
                )
            });
        }

        let mut virtual_hosts = Vec::with_capacity(chain.virtual_hosts.len());
        {
            let mut routes = RouteTranslator::new(
                self.plugins,
                self.validator,
                &mut self.passes,
                &mut self.policies,
                reports,
            );
            for vh in &chain.virtual_hosts {
                virtual_hosts.push(VirtualHost {
                    name: vh.name.clone(),
                    domains: vec![vh.hostname.clone()],
                    routes: routes.translate(&vh.rules),
                    ..Default::default()
                });
            }
            routes.finish();
        }

        for (vh, out) in chain.virtual_hosts.iter().zip(&mut virtual_hosts) {
            self.apply_vhost(vh, parent, out);
        }

        let mut route_config = RouteConfiguration {
            name: chain.name.clone(),
            virtual_hosts,
            ..Default::default()
        };
        let gateway = self.gateway;
        for (gk, pass) in self.passes.iter_mut() {
            if let Err(error) = pass.apply_route_config_plugin(
                &RouteConfigContext {
                    gateway,
                    port: ml.port,
                },
                &mut route_config,
            ) {
                tracing::warn!(route_config = %route_config.name, plugin = %gk, %error, "Route configuration plugin failed");
            }
        }

        let mut filters = self.network_filters.iter().map(|f| f.filter.clone()).collect::<Vec<_>>();
        filters.push(Filter {
            name: HCM_FILTER_NAME.to_string(),
            config_type: Some(filter::ConfigType::TypedConfig(to_any(HCM_TYPE_URL, &hcm))),
        });

        let fc = FilterChain {
            name: chain.name.clone(),
            filter_chain_match: (!chain.server_names.is_empty()).then(|| FilterChainMatch {
                server_names: chain.server_names.clone(),
                ..Default::default()
            }),
            transport_socket: chain.tls.as_ref().map(tls_transport_socket),
            filters,
            ..Default::default()
        };
        (fc, route_config)
    }

    fn apply_vhost(&mut self, vh: &VirtualHostIr, parent: Option<&ListenerIr>, out: &mut VirtualHost) {
        let Some(parent) = parent else {
            return;
        };
        let scope = self.listener_scope(&vh.attached_policies);
        let hostname = vh.hostname.as_str();
        self.apply_scoped(&scope, parent, |pass, policy| {
            pass.apply_vhost_plugin(&VirtualHostContext { hostname, policy }, &mut *out)
        });
    }

    fn tcp_chain(&mut self, chain: &TcpFilterChain, reports: &mut ReportMap) -> Option<FilterChain> {
        let route = &chain.route;
        self.policies
            .observe(route.attached_policies.all(), &chain.parent_ref);

        let mut clusters = vec![];
        for b in &route.backends {
            self.policies
                .observe(b.attached_policies.all(), &chain.parent_ref);
            match &b.backend {
                Ok(backend) if b.weight > 0 => clusters.push(ClusterWeight {
                    name: backend.cluster_name(),
                    weight: b.weight,
                    ..Default::default()
                }),
                Ok(_) => {}
                Err(error) => {
                    reports
                        .route_parent(&route.source, route.generation, &chain.parent_ref)
                        .set(
                            ConditionReport::new(conditions::RESOLVED_REFS, false, error.reason())
                                .with_message(error.to_string()),
                        );
                }
            }
        }

        let cluster_specifier = match clusters.len() {
            0 => {
                tracing::info!(route = %route.source, chain = %chain.name, "Dropping filter chain without backends");
                let parent = reports.route_parent(&route.source, route.generation, &chain.parent_ref);
                if parent
                    .get(conditions::RESOLVED_REFS)
                    .map_or(true, |c| c.status)
                {
                    parent.set(
                        ConditionReport::new(conditions::RESOLVED_REFS, false, reason::BACKEND_NOT_FOUND)
                            .with_message("route has no usable backends"),
                    );
                }
                return None;
            }
            1 => tcp_proxy::ClusterSpecifier::Cluster(clusters.remove(0).name),
            _ => tcp_proxy::ClusterSpecifier::WeightedClusters(tcp_proxy::WeightedCluster {
                clusters,
                ..Default::default()
            }),
        };

        let proxy = TcpProxy {
            stat_prefix: chain.name.clone(),
            cluster_specifier: Some(cluster_specifier),
            ..Default::default()
        };
        let mut filters = self.network_filters.iter().map(|f| f.filter.clone()).collect::<Vec<_>>();
        filters.push(Filter {
            name: TCP_PROXY_NAME.to_string(),
            config_type: Some(filter::ConfigType::TypedConfig(to_any(TCP_PROXY_TYPE_URL, &proxy))),
        });

        Some(FilterChain {
            name: chain.name.clone(),
            filter_chain_match: (!chain.server_names.is_empty()).then(|| FilterChainMatch {
                server_names: chain.server_names.clone(),
                ..Default::default()
            }),
            transport_socket: chain.tls.as_ref().map(tls_transport_socket),
            filters,
            ..Default::default()
        })
    }
}

/// The listener an HTTP chain was built from: the HTTPS listener it serves, or the first plain
/// HTTP listener on the port.
fn chain_parent<'m>(ml: &'m MergedListener, chain: &HttpFilterChain) -> Option<&'m ListenerIr> {
    if chain.tls.is_some() {
        ml.parents
            .iter()
            .find(|l| chain_name(l) == chain.name)
    } else {
        ml.parents
            .iter()
            .find(|l| l.protocol == Protocol::Http)
    }
}

fn ads() -> ConfigSource {
    ConfigSource {
        config_source_specifier: Some(ConfigSourceSpecifier::Ads(AggregatedConfigSource::default())),
        resource_api_version: ApiVersion::V3 as i32,
        ..Default::default()
    }
}

fn tls_transport_socket(cert: &TlsCertificate) -> TransportSocket {
    let inline = |bytes: &[u8]| DataSource {
        specifier: Some(data_source::Specifier::InlineBytes(bytes.to_vec())),
        ..Default::default()
    };
    let ctx = DownstreamTlsContext {
        common_tls_context: Some(CommonTlsContext {
            tls_certificates: vec![EnvoyTlsCertificate {
                certificate_chain: Some(inline(&cert.certificate_chain)),
                private_key: Some(inline(&cert.private_key)),
                ..Default::default()
            }],
            ..Default::default()
        }),
        ..Default::default()
    };
    TransportSocket {
        name: TLS_TRANSPORT_SOCKET_NAME.to_string(),
        config_type: Some(transport_socket::ConfigType::TypedConfig(to_any(
            DOWNSTREAM_TLS_TYPE_URL,
            &ctx,
        ))),
    }
}
