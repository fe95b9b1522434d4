//! Resources translated separately for each connected client.

use crate::XorSet;
use envoy_types::pb::envoy::config::{
    cluster::v3::Cluster, endpoint::v3::ClusterLoadAssignment,
};
use gateway_xds_controller_core::{
    backend::BackendObjectIr,
    hash::{hash_cluster, hash_load_assignment, hash_value},
    UniquelyConnectedClient,
};
use gateway_xds_controller_translator::{BackendError, BackendTranslator, TranslatedBackend};

/// One backend's cluster as translated for one client.
#[derive(Clone, Debug, PartialEq)]
pub struct UccWithCluster {
    pub client: UniquelyConnectedClient,
    pub name: String,
    pub cluster: Cluster,

    /// The content hash of `cluster`, or of `name` alone when translation failed.
    pub cluster_hash: u64,
    pub load_assignment: Option<ClusterLoadAssignment>,
    pub error: Option<BackendError>,
}

/// A client's clusters, with failed translations tracked apart from the servable ones.
///
/// Failed clusters contribute only their name to `errored`'s version, so that a backend flapping
/// between two different errors does not produce a new snapshot.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClustersWithErrors {
    pub clusters: XorSet<Cluster>,
    pub errored: XorSet<BackendError>,
}

/// Everything translated for a single client.
#[derive(Clone, Debug, PartialEq)]
pub struct PerClientResources {
    pub client: UniquelyConnectedClient,
    pub clusters: ClustersWithErrors,
    pub endpoints: XorSet<ClusterLoadAssignment>,
}

// === impl UccWithCluster ===

impl UccWithCluster {
    pub fn new(client: UniquelyConnectedClient, translated: TranslatedBackend) -> Self {
        let TranslatedBackend {
            cluster,
            load_assignment,
            error,
        } = translated;
        let name = cluster.name.clone();
        let cluster_hash = match error {
            None => hash_cluster(&cluster),
            Some(_) => hash_value(&name),
        };
        Self {
            client,
            name,
            cluster,
            cluster_hash,
            load_assignment,
            error,
        }
    }
}

// === impl ClustersWithErrors ===

impl ClustersWithErrors {
    pub fn insert(&mut self, ucc: UccWithCluster) {
        // A cluster moves between the two sets as its translation fails or recovers.
        match ucc.error {
            None => {
                self.errored.remove(&ucc.name);
                self.clusters.insert(ucc.name, ucc.cluster_hash, ucc.cluster);
            }
            Some(error) => {
                self.clusters.remove(&ucc.name);
                self.errored.insert(ucc.name, ucc.cluster_hash, error);
            }
        }
    }

    pub fn remove(&mut self, name: &str) {
        self.clusters.remove(name);
        self.errored.remove(name);
    }

    pub fn version(&self) -> u64 {
        self.clusters.version()
    }

    pub fn error_version(&self) -> u64 {
        self.errored.version()
    }
}

impl FromIterator<UccWithCluster> for ClustersWithErrors {
    fn from_iter<I: IntoIterator<Item = UccWithCluster>>(iter: I) -> Self {
        let mut clusters = Self::default();
        for ucc in iter {
            clusters.insert(ucc);
        }
        clusters
    }
}

// === impl PerClientResources ===

impl PerClientResources {
    pub fn new(client: UniquelyConnectedClient) -> Self {
        Self {
            client,
            clusters: ClustersWithErrors::default(),
            endpoints: XorSet::default(),
        }
    }

    /// Translates every backend for `client`.
    pub fn translate<'b>(
        translator: &BackendTranslator,
        client: &UniquelyConnectedClient,
        backends: impl IntoIterator<Item = &'b BackendObjectIr>,
    ) -> Self {
        let mut resources = Self::new(client.clone());
        for backend in backends {
            let translated = translator.translate(client, backend);
            resources.insert(UccWithCluster::new(client.clone(), translated));
        }
        tracing::debug!(
            client = client.resource_name(),
            clusters = resources.clusters.clusters.len(),
            errored = resources.clusters.errored.len(),
            endpoints = resources.endpoints.len(),
            "Translated backends"
        );
        resources
    }

    pub fn insert(&mut self, mut ucc: UccWithCluster) {
        debug_assert_eq!(ucc.client, self.client);
        match ucc.load_assignment.take() {
            Some(cla) => {
                let hash = hash_load_assignment(&cla);
                self.endpoints.insert(ucc.name.clone(), hash, cla);
            }
            None => {
                self.endpoints.remove(&ucc.name);
            }
        }
        self.clusters.insert(ucc);
    }

    pub fn remove(&mut self, cluster_name: &str) {
        self.clusters.remove(cluster_name);
        self.endpoints.remove(cluster_name);
    }
}
