use crate::{endpoints::Locality, hash, ObjectSource};
use std::collections::BTreeMap;

/// One downstream proxy identity that holds an xDS session.
///
/// Proxies with the same gateway, namespace, labels and locality receive identical configuration
/// and share a client.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UniquelyConnectedClient {
    gateway: ObjectSource,
    namespace: String,
    labels: BTreeMap<String, String>,
    locality: Locality,
    resource_name: String,
}

impl UniquelyConnectedClient {
    pub fn new(
        gateway: ObjectSource,
        namespace: impl ToString,
        labels: BTreeMap<String, String>,
        locality: Locality,
    ) -> Self {
        let namespace = namespace.to_string();
        let resource_name = format!(
            "{}~{}~{}~{:x}",
            gateway.namespace,
            gateway.name,
            namespace,
            hash::hash_value(&(&labels, &locality))
        );
        Self {
            gateway,
            namespace,
            labels,
            locality,
            resource_name,
        }
    }

    /// The snapshot cache key for this client.
    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    pub fn gateway(&self) -> &ObjectSource {
        &self.gateway
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    pub fn locality(&self) -> &Locality {
        &self.locality
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    #[test]
    fn resource_name_depends_on_labels() {
        let gw = ObjectSource::gateway("infra", "gw");
        let a = UniquelyConnectedClient::new(
            gw.clone(),
            "infra",
            btreemap! { "app".to_string() => "gw".to_string() },
            Locality::default(),
        );
        let b = UniquelyConnectedClient::new(
            gw.clone(),
            "infra",
            btreemap! { "app".to_string() => "gw".to_string() },
            Locality::default(),
        );
        let c = UniquelyConnectedClient::new(gw, "infra", BTreeMap::new(), Locality::default());
        assert_eq!(a.resource_name(), b.resource_name());
        assert_ne!(a.resource_name(), c.resource_name());
        assert!(a.resource_name().starts_with("infra~gw~infra~"));
    }
}
