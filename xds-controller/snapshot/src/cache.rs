use crate::Snapshot;
use ahash::AHashMap as HashMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// Where assembled snapshots are published for the xDS server to serve.
pub trait SnapshotCache: Send + Sync {
    /// Replaces the snapshot served to `proxy_key`.
    fn set_snapshot(&self, proxy_key: &str, snapshot: Snapshot);

    /// Stops serving `proxy_key`.
    fn clear_snapshot(&self, proxy_key: &str);
}

#[derive(Clone, Debug, Default)]
pub struct InMemorySnapshotCache(Arc<RwLock<HashMap<String, Snapshot>>>);

// === impl InMemorySnapshotCache ===

impl InMemorySnapshotCache {
    pub fn get(&self, proxy_key: &str) -> Option<Snapshot> {
        self.0.read().get(proxy_key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys = self.0.read().keys().cloned().collect::<Vec<_>>();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }
}

impl SnapshotCache for InMemorySnapshotCache {
    fn set_snapshot(&self, proxy_key: &str, snapshot: Snapshot) {
        let mut snapshots = self.0.write();
        if snapshots.get(proxy_key).map(Snapshot::versions) == Some(snapshot.versions()) {
            tracing::trace!(proxy_key, "Snapshot unchanged");
            return;
        }
        tracing::debug!(proxy_key, versions = ?snapshot.versions(), "Setting snapshot");
        snapshots.insert(proxy_key.to_string(), snapshot);
    }

    fn clear_snapshot(&self, proxy_key: &str) {
        if self.0.write().remove(proxy_key).is_some() {
            tracing::debug!(proxy_key, "Cleared snapshot");
        }
    }
}
