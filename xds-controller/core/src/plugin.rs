//! The contract between the translator and policy/backend plugins.
//!
//! Plugins are keyed by the group-kind of the policy or backend they handle. A kind with no
//! registered plugin is skipped, never an error. Every hook has a no-op default so that plugins
//! only implement the scopes they care about.

use crate::{
    backend::BackendObjectIr,
    endpoints::EndpointsIr,
    gateway::{GatewayIr, Listener as ListenerIr},
    http_route::{HttpRouteIr, HttpRouteRule},
    policy::PolicyAtt,
    GroupKind, UniquelyConnectedClient,
};
use ahash::AHashMap as HashMap;
use anyhow::Result;
use envoy_types::pb::{
    envoy::{
        config::{
            cluster::v3::Cluster,
            listener::v3::{Filter as NetworkFilter, Listener},
            route::v3::{Route, RouteConfiguration, VirtualHost},
        },
        extensions::filters::network::http_connection_manager::v3::{
            HttpConnectionManager, HttpFilter,
        },
    },
    google::protobuf::Any,
};
use prost::Message;
use std::{collections::BTreeMap, fmt, sync::Arc};

/// Per-filter configuration collected from plugins for a virtual host, route or weighted cluster.
///
/// Kept ordered so that the resulting protobufs are built identically on every pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TypedFilterConfigMap(BTreeMap<String, Any>);

/// Coarse ordering of HTTP and network filters within a chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WellKnownFilterStage {
    Fault,
    Cors,
    Waf,
    AuthN,
    AuthZ,
    RateLimit,
    Accepted,
    OutAuth,
    Route,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RelativeOrder {
    Before,
    During,
    After,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FilterStage {
    pub well_known: WellKnownFilterStage,
    pub relative: RelativeOrder,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StagedHttpFilter {
    pub stage: FilterStage,
    pub filter: HttpFilter,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StagedNetworkFilter {
    pub stage: FilterStage,
    pub filter: NetworkFilter,
}

/// Identifies the gateway a translation pass runs for.
#[derive(Clone, Copy, Debug)]
pub struct TranslationPassContext<'a> {
    pub gateway: &'a GatewayIr,
}

#[derive(Debug)]
pub struct ListenerContext<'a> {
    pub listener: &'a ListenerIr,
    pub policy: &'a PolicyAtt,
}

#[derive(Debug)]
pub struct HcmContext<'a> {
    pub gateway: &'a GatewayIr,
    pub port: u16,
    pub policy: &'a PolicyAtt,
}

#[derive(Debug)]
pub struct VirtualHostContext<'a> {
    pub hostname: &'a str,
    pub policy: &'a PolicyAtt,
}

#[derive(Debug)]
pub struct RouteContext<'a> {
    pub route: &'a HttpRouteIr,
    pub rule: &'a HttpRouteRule,
    pub policy: &'a PolicyAtt,
    pub typed_filter_config: &'a mut TypedFilterConfigMap,
}

#[derive(Debug)]
pub struct RouteBackendContext<'a> {
    pub route: &'a HttpRouteIr,
    pub backend: &'a BackendObjectIr,
    pub policy: &'a PolicyAtt,
    pub typed_filter_config: &'a mut TypedFilterConfigMap,
}

#[derive(Debug)]
pub struct RouteConfigContext<'a> {
    pub gateway: &'a GatewayIr,
    pub port: u16,
}

/// Identifies the filter chain HTTP filters are requested for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterChainCommon {
    pub name: String,
    pub port: u16,
}

#[derive(Debug)]
pub struct BackendContext<'a> {
    pub client: &'a UniquelyConnectedClient,
    pub backend: &'a BackendObjectIr,
}

/// Hooks run while translating one gateway. A fresh pass is created for every translation, so a
/// pass may accumulate state (e.g. which HTTP filters the routes it saw require) across hooks.
pub trait ProxyTranslationPass: Send {
    fn apply_listener_plugin(&mut self, _ctx: &ListenerContext<'_>, _out: &mut Listener) -> Result<()> {
        Ok(())
    }

    fn apply_hcm(&mut self, _ctx: &HcmContext<'_>, _out: &mut HttpConnectionManager) -> Result<()> {
        Ok(())
    }

    fn apply_vhost_plugin(
        &mut self,
        _ctx: &VirtualHostContext<'_>,
        _out: &mut VirtualHost,
    ) -> Result<()> {
        Ok(())
    }

    fn apply_for_route(&mut self, _ctx: &mut RouteContext<'_>, _out: &mut Route) -> Result<()> {
        Ok(())
    }

    fn apply_for_route_backend(&mut self, _ctx: &mut RouteBackendContext<'_>) -> Result<()> {
        Ok(())
    }

    fn apply_route_config_plugin(
        &mut self,
        _ctx: &RouteConfigContext<'_>,
        _out: &mut RouteConfiguration,
    ) -> Result<()> {
        Ok(())
    }

    fn network_filters(&mut self) -> Result<Vec<StagedNetworkFilter>> {
        Ok(vec![])
    }

    fn http_filters(&mut self, _fc: &FilterChainCommon) -> Result<Vec<StagedHttpFilter>> {
        Ok(vec![])
    }

    /// Clusters the plugin needs in every snapshot, e.g. an external auth service.
    fn resources_to_add(&mut self) -> Vec<Cluster> {
        vec![]
    }
}

/// A plugin handling one policy kind.
pub trait PolicyPlugin: Send + Sync {
    fn name(&self) -> &str;

    /// `None` when the plugin contributes nothing to listeners and routes.
    fn new_translation_pass(
        &self,
        _ctx: &TranslationPassContext<'_>,
    ) -> Option<Box<dyn ProxyTranslationPass>> {
        None
    }

    /// Combines all policies of this kind attached at one scope, highest priority first, into the
    /// effective policy. The default keeps the highest priority policy.
    fn merge_policies(&self, policies: &[PolicyAtt]) -> Option<PolicyAtt> {
        policies.first().cloned()
    }

    fn apply_for_backend(
        &self,
        _ctx: &BackendContext<'_>,
        _policy: &PolicyAtt,
        _out: &mut Cluster,
    ) -> Result<()> {
        Ok(())
    }

    /// Runs for every backend of every client, whether or not the policy is attached.
    fn per_client_process_backend(&self, _ctx: &BackendContext<'_>, _out: &mut Cluster) -> Result<()> {
        Ok(())
    }

    fn per_client_process_endpoints(
        &self,
        _client: &UniquelyConnectedClient,
        _endpoints: &mut EndpointsIr,
    ) {
    }
}

/// A plugin for one backend kind.
pub trait BackendPlugin: Send + Sync {
    /// Sets the cluster's discovery type and any kind-specific settings. Returns the endpoints to
    /// inline into the cluster, if any.
    fn init_backend(&self, backend: &BackendObjectIr, out: &mut Cluster) -> Result<Option<EndpointsIr>>;
}

/// Registered plugins. Policy plugins run in registration order.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    policies: Vec<(GroupKind, Arc<dyn PolicyPlugin>)>,
    backends: HashMap<GroupKind, Arc<dyn BackendPlugin>>,
}

// === impl TypedFilterConfigMap ===

impl TypedFilterConfigMap {
    pub fn insert(&mut self, filter_name: impl ToString, type_url: &str, config: &impl Message) {
        self.0
            .insert(filter_name.to_string(), to_any(type_url, config));
    }

    pub fn insert_any(&mut self, filter_name: impl ToString, config: Any) {
        self.0.insert(filter_name.to_string(), config);
    }

    pub fn get(&self, filter_name: &str) -> Option<&Any> {
        self.0.get(filter_name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_proto(&self) -> std::collections::HashMap<String, Any> {
        self.0.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

pub fn to_any(type_url: &str, msg: &impl Message) -> Any {
    Any {
        type_url: type_url.to_string(),
        value: msg.encode_to_vec(),
    }
}

// === impl FilterStage ===

impl FilterStage {
    pub const fn before(well_known: WellKnownFilterStage) -> Self {
        Self {
            well_known,
            relative: RelativeOrder::Before,
        }
    }

    pub const fn during(well_known: WellKnownFilterStage) -> Self {
        Self {
            well_known,
            relative: RelativeOrder::During,
        }
    }

    pub const fn after(well_known: WellKnownFilterStage) -> Self {
        Self {
            well_known,
            relative: RelativeOrder::After,
        }
    }
}

// === impl PluginRegistry ===

impl PluginRegistry {
    pub fn with_policy_plugin(mut self, gk: GroupKind, plugin: Arc<dyn PolicyPlugin>) -> Self {
        self.policies.push((gk, plugin));
        self
    }

    pub fn with_backend_plugin(mut self, gk: GroupKind, plugin: Arc<dyn BackendPlugin>) -> Self {
        self.backends.insert(gk, plugin);
        self
    }

    pub fn policy_plugin(&self, gk: &GroupKind) -> Option<&Arc<dyn PolicyPlugin>> {
        self.policies
            .iter()
            .find_map(|(k, p)| (k == gk).then_some(p))
    }

    pub fn policy_plugins(&self) -> impl Iterator<Item = (&GroupKind, &Arc<dyn PolicyPlugin>)> {
        self.policies.iter().map(|(gk, p)| (gk, p))
    }

    pub fn backend_plugin(&self, gk: &GroupKind) -> Option<&Arc<dyn BackendPlugin>> {
        self.backends.get(gk)
    }

    /// Creates the translation passes for one gateway, in registration order.
    pub fn new_translation_passes(
        &self,
        ctx: &TranslationPassContext<'_>,
    ) -> Vec<(GroupKind, Box<dyn ProxyTranslationPass>)> {
        self.policies
            .iter()
            .filter_map(|(gk, p)| Some((gk.clone(), p.new_translation_pass(ctx)?)))
            .collect()
    }

    /// Reduces the valid policies of one kind to the effective policy for a scope.
    pub fn merge(&self, gk: &GroupKind, policies: &[PolicyAtt]) -> Option<PolicyAtt> {
        let valid = policies
            .iter()
            .filter(|p| p.ir.is_some())
            .cloned()
            .collect::<Vec<_>>();
        if valid.is_empty() {
            return None;
        }
        match self.policy_plugin(gk) {
            Some(plugin) => plugin.merge_policies(&valid),
            None => valid.into_iter().next(),
        }
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field(
                "policies",
                &self.policies.iter().map(|(gk, p)| (gk, p.name())).collect::<Vec<_>>(),
            )
            .field("backends", &self.backends.keys().collect::<Vec<_>>())
            .finish()
    }
}
