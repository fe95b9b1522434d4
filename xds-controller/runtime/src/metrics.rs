use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge, histogram::Histogram},
    registry::{Registry, Unit},
};
use tokio::time;

#[derive(Clone, Debug)]
pub struct ProxySyncerMetrics {
    translations: Family<GatewayLabels, Counter>,
    translation_duration: Histogram,
    invalid_routes: Family<GatewayLabels, Gauge>,
    errored_clusters: Family<ClientLabels, Gauge>,
    snapshot_syncs: Family<ClientLabels, Counter>,
    snapshot_deferrals: Counter,
}

#[derive(Clone, Debug)]
pub struct StatusMetrics {
    patches: Family<PatchLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct GatewayLabels {
    namespace: String,
    gateway: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ClientLabels {
    client: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct PatchLabels {
    kind: String,
    result: &'static str,
}

// === impl ProxySyncerMetrics ===

impl ProxySyncerMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let translations = Family::default();
        reg.register(
            "translations",
            "Count of gateway translations",
            translations.clone(),
        );

        let translation_duration = Histogram::new([0.001, 0.01, 0.1, 1.0, 10.0]);
        reg.register_with_unit(
            "translation_duration",
            "Histogram of time spent translating a gateway",
            Unit::Seconds,
            translation_duration.clone(),
        );

        let invalid_routes = Family::default();
        reg.register(
            "invalid_routes",
            "Gauge of routes with at least one rejected or partially invalid parent",
            invalid_routes.clone(),
        );

        let errored_clusters = Family::default();
        reg.register(
            "errored_clusters",
            "Gauge of backends that failed to translate for a client",
            errored_clusters.clone(),
        );

        let snapshot_syncs = Family::default();
        reg.register(
            "snapshot_syncs",
            "Count of snapshots set for a client",
            snapshot_syncs.clone(),
        );

        let snapshot_deferrals = Counter::default();
        reg.register(
            "snapshot_deferrals",
            "Count of snapshots deferred because an input was missing",
            snapshot_deferrals.clone(),
        );

        Self {
            translations,
            translation_duration,
            invalid_routes,
            errored_clusters,
            snapshot_syncs,
            snapshot_deferrals,
        }
    }

    pub(crate) fn translated(
        &self,
        namespace: &str,
        gateway: &str,
        start: time::Instant,
        invalid_routes: usize,
    ) {
        let labels = GatewayLabels {
            namespace: namespace.to_string(),
            gateway: gateway.to_string(),
        };
        self.translations.get_or_create(&labels).inc();
        self.translation_duration
            .observe(start.elapsed().as_secs_f64());
        self.invalid_routes
            .get_or_create(&labels)
            .set(invalid_routes as i64);
    }

    pub(crate) fn gateway_removed(&self, namespace: &str, gateway: &str) {
        self.invalid_routes.remove(&GatewayLabels {
            namespace: namespace.to_string(),
            gateway: gateway.to_string(),
        });
    }

    pub(crate) fn synced(&self, client: &str, errored_clusters: usize) {
        let labels = ClientLabels {
            client: client.to_string(),
        };
        self.snapshot_syncs.get_or_create(&labels).inc();
        self.errored_clusters
            .get_or_create(&labels)
            .set(errored_clusters as i64);
    }

    pub(crate) fn deferred(&self) {
        self.snapshot_deferrals.inc();
    }

    pub(crate) fn client_removed(&self, client: &str) {
        let labels = ClientLabels {
            client: client.to_string(),
        };
        self.errored_clusters.remove(&labels);
        self.snapshot_syncs.remove(&labels);
    }
}

#[cfg(test)]
impl Default for ProxySyncerMetrics {
    fn default() -> Self {
        Self::register(&mut Registry::default())
    }
}

// === impl StatusMetrics ===

impl StatusMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let patches = Family::default();
        reg.register(
            "patches",
            "Count of status patches by object kind and result",
            patches.clone(),
        );
        Self { patches }
    }

    pub(crate) fn patched(&self, kind: &str, result: &'static str) {
        self.patches
            .get_or_create(&PatchLabels {
                kind: kind.to_string(),
                result,
            })
            .inc();
    }
}
