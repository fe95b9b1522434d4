//! Keeps every connected client's snapshot current with the gateway, backend and client inputs.
//!
//! The syncer owns all of its state and is driven by [`Event`]s. Events are applied in batches:
//! everything queued when the syncer wakes is applied before any snapshot is assembled, so a burst
//! of updates produces one snapshot per affected client.

use crate::metrics::ProxySyncerMetrics;
use ahash::AHashMap as HashMap;
use gateway_xds_controller_core::{
    backend::BackendObjectIr,
    gateway::{GatewayIr, RoutesByListener},
    ObjectSource, UniquelyConnectedClient,
};
use gateway_xds_controller_reports::{conditions, ReportMap};
use gateway_xds_controller_snapshot::{
    assemble, GatewayXds, PerClientResources, SnapshotCache, UccWithCluster,
};
use gateway_xds_controller_translator::{BackendTranslator, GatewayTranslator};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};
use tokio::{
    sync::{mpsc, watch},
    time,
};

/// A change to the syncer's inputs.
#[derive(Clone, Debug)]
pub enum Event {
    /// A gateway and the routes attached to each of its listeners.
    GatewayApplied {
        gateway: Arc<GatewayIr>,
        routes: Arc<RoutesByListener>,
    },
    GatewayDeleted(ObjectSource),
    BackendApplied(Arc<BackendObjectIr>),
    /// A backend, by cluster name.
    BackendDeleted(String),
    ClientConnected(UniquelyConnectedClient),
    ClientDisconnected(UniquelyConnectedClient),
}

pub struct ProxySyncer<C> {
    gateway_translator: GatewayTranslator,
    backend_translator: BackendTranslator,
    cache: C,
    metrics: ProxySyncerMetrics,
    reports_tx: watch::Sender<Arc<ReportMap>>,

    gateways: HashMap<ObjectSource, GatewayState>,
    backends: BTreeMap<String, Arc<BackendObjectIr>>,
    clients: BTreeMap<String, ClientState>,
}

struct GatewayState {
    xds: GatewayXds,
    reports: ReportMap,
}

struct ClientState {
    connections: usize,
    resources: PerClientResources,
}

/// What a batch of events invalidated.
#[derive(Debug, Default)]
struct Dirty {
    reports: bool,
    clients: BTreeSet<String>,
}

// === impl ProxySyncer ===

impl<C: SnapshotCache> ProxySyncer<C> {
    pub fn new(
        gateway_translator: GatewayTranslator,
        backend_translator: BackendTranslator,
        cache: C,
        metrics: ProxySyncerMetrics,
        reports_tx: watch::Sender<Arc<ReportMap>>,
    ) -> Self {
        Self {
            gateway_translator,
            backend_translator,
            cache,
            metrics,
            reports_tx,
            gateways: HashMap::default(),
            backends: BTreeMap::new(),
            clients: BTreeMap::new(),
        }
    }

    /// Processes events until every sender has been dropped.
    pub async fn run(mut self, mut events: mpsc::Receiver<Event>) {
        while let Some(event) = events.recv().await {
            let mut dirty = Dirty::default();
            self.apply(event, &mut dirty);
            while let Ok(event) = events.try_recv() {
                self.apply(event, &mut dirty);
            }
            self.sync(dirty);
        }
        tracing::debug!("Event channel closed");
    }

    fn apply(&mut self, event: Event, dirty: &mut Dirty) {
        match event {
            Event::GatewayApplied { gateway, routes } => {
                let source = gateway.source.clone();
                let start = time::Instant::now();
                let mut reports = ReportMap::default();
                let result = self
                    .gateway_translator
                    .translate(&gateway, &routes, &mut reports);
                self.metrics.translated(
                    &source.namespace,
                    &source.name,
                    start,
                    invalid_routes(&reports),
                );
                tracing::debug!(
                    gateway = %source,
                    listeners = result.listeners.len(),
                    routes = result.routes.len(),
                    "Translated gateway"
                );
                let xds = GatewayXds::new(source.clone(), result);
                self.gateways.insert(source.clone(), GatewayState { xds, reports });
                dirty.reports = true;
                dirty.clients.extend(self.clients_of(&source));
            }

            Event::GatewayDeleted(source) => {
                if self.gateways.remove(&source).is_none() {
                    return;
                }
                self.metrics.gateway_removed(&source.namespace, &source.name);
                dirty.reports = true;
                for key in self.clients_of(&source) {
                    tracing::debug!(client = %key, gateway = %source, "Gateway removed");
                    self.cache.clear_snapshot(&key);
                    dirty.clients.remove(&key);
                }
            }

            Event::BackendApplied(backend) => {
                let name = backend.cluster_name();
                for (key, state) in &mut self.clients {
                    let translated = self
                        .backend_translator
                        .translate(&state.resources.client, &backend);
                    state
                        .resources
                        .insert(UccWithCluster::new(state.resources.client.clone(), translated));
                    dirty.clients.insert(key.clone());
                }
                self.backends.insert(name, backend);
            }

            Event::BackendDeleted(name) => {
                if self.backends.remove(&name).is_none() {
                    return;
                }
                for (key, state) in &mut self.clients {
                    state.resources.remove(&name);
                    dirty.clients.insert(key.clone());
                }
            }

            Event::ClientConnected(client) => {
                let key = client.resource_name().to_string();
                if let Some(state) = self.clients.get_mut(&key) {
                    state.connections += 1;
                    return;
                }
                tracing::info!(client = %key, gateway = %client.gateway(), "Client connected");
                let resources = PerClientResources::translate(
                    &self.backend_translator,
                    &client,
                    self.backends.values().map(|b| &**b),
                );
                self.clients.insert(
                    key.clone(),
                    ClientState {
                        connections: 1,
                        resources,
                    },
                );
                dirty.clients.insert(key);
            }

            Event::ClientDisconnected(client) => {
                let key = client.resource_name();
                let Some(state) = self.clients.get_mut(key) else {
                    tracing::debug!(client = %key, "Disconnect from unknown client");
                    return;
                };
                state.connections = state.connections.saturating_sub(1);
                if state.connections == 0 {
                    tracing::info!(client = %key, "Client disconnected");
                    self.clients.remove(key);
                    self.cache.clear_snapshot(key);
                    self.metrics.client_removed(key);
                    dirty.clients.remove(key);
                }
            }
        }
    }

    fn sync(&self, dirty: Dirty) {
        for key in &dirty.clients {
            let Some(state) = self.clients.get(key) else {
                continue;
            };
            let client = &state.resources.client;
            let gateway = self.gateways.get(client.gateway()).map(|s| &s.xds);
            match assemble(client, gateway, Some(&state.resources)) {
                Some(wrapper) => {
                    self.metrics
                        .synced(&wrapper.proxy_key, wrapper.errored_clusters.len());
                    self.cache.set_snapshot(&wrapper.proxy_key, wrapper.snapshot);
                }
                None => self.metrics.deferred(),
            }
        }

        if dirty.reports {
            let mut merged = ReportMap::default();
            for state in self.gateways.values() {
                merged.merge(state.reports.clone());
            }
            self.reports_tx.send_replace(Arc::new(merged));
        }
    }

    fn clients_of(&self, gateway: &ObjectSource) -> Vec<String> {
        self.clients
            .iter()
            .filter(|(_, s)| s.resources.client.gateway() == gateway)
            .map(|(k, _)| k.clone())
            .collect()
    }
}

fn invalid_routes(reports: &ReportMap) -> usize {
    reports
        .routes
        .values()
        .filter(|r| {
            r.parents.values().any(|conds| {
                conds
                    .get(conditions::ACCEPTED)
                    .is_some_and(|c| !c.status)
                    || conds
                        .get(conditions::PARTIALLY_INVALID)
                        .is_some_and(|c| c.status)
            })
        })
        .count()
}
