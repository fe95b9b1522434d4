use crate::hash;
use envoy_types::pb::{
    envoy::config::{
        core::v3::{
            address, socket_address::PortSpecifier, Address, Locality as EnvoyLocality,
            SocketAddress,
        },
        endpoint::v3::{
            lb_endpoint::HostIdentifier, ClusterLoadAssignment, Endpoint, LbEndpoint,
            LocalityLbEndpoints,
        },
    },
    google::protobuf::UInt32Value,
};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Locality {
    pub region: String,
    pub zone: String,
    pub subzone: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointIr {
    pub address: String,
    pub port: u16,
    pub weight: Option<u32>,
}

/// A backend's endpoints, grouped by locality. Endpoints are kept sorted so that equal sets hash
/// equally regardless of discovery order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct EndpointsIr {
    pub cluster_name: String,
    pub by_locality: BTreeMap<Locality, Vec<EndpointIr>>,
}

// === impl EndpointsIr ===

impl EndpointsIr {
    pub fn new(cluster_name: impl ToString) -> Self {
        Self {
            cluster_name: cluster_name.to_string(),
            by_locality: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, locality: Locality, endpoint: EndpointIr) {
        let endpoints = self.by_locality.entry(locality).or_default();
        if let Err(idx) = endpoints.binary_search(&endpoint) {
            endpoints.insert(idx, endpoint);
        }
    }

    pub fn len(&self) -> usize {
        self.by_locality.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn content_hash(&self) -> u64 {
        hash::hash_value(self)
    }

    /// Builds a load assignment, prioritizing localities closest to the client.
    ///
    /// Priorities are dense: the closest populated locality tier is always priority 0.
    pub fn prioritize(&self, client: Option<&Locality>) -> ClusterLoadAssignment {
        let tiers = self
            .by_locality
            .keys()
            .map(|l| distance(client, l))
            .collect::<BTreeSet<_>>();
        let rank = |l: &Locality| {
            let d = distance(client, l);
            tiers.iter().position(|t| *t == d).unwrap_or_default() as u32
        };

        let endpoints = self
            .by_locality
            .iter()
            .filter(|(_, eps)| !eps.is_empty())
            .map(|(locality, eps)| LocalityLbEndpoints {
                locality: Some(EnvoyLocality {
                    region: locality.region.clone(),
                    zone: locality.zone.clone(),
                    sub_zone: locality.subzone.clone(),
                }),
                lb_endpoints: eps.iter().map(lb_endpoint).collect(),
                priority: rank(locality),
                ..Default::default()
            })
            .collect();

        ClusterLoadAssignment {
            cluster_name: self.cluster_name.clone(),
            endpoints,
            ..Default::default()
        }
    }
}

fn distance(client: Option<&Locality>, endpoint: &Locality) -> u8 {
    let Some(client) = client else {
        return 0;
    };
    if client.region != endpoint.region {
        3
    } else if client.zone != endpoint.zone {
        2
    } else if client.subzone != endpoint.subzone {
        1
    } else {
        0
    }
}

fn lb_endpoint(ep: &EndpointIr) -> LbEndpoint {
    LbEndpoint {
        host_identifier: Some(HostIdentifier::Endpoint(Endpoint {
            address: Some(socket_address(&ep.address, ep.port)),
            ..Default::default()
        })),
        load_balancing_weight: ep.weight.map(|value| UInt32Value { value }),
        ..Default::default()
    }
}

pub fn socket_address(addr: &str, port: u16) -> Address {
    Address {
        address: Some(address::Address::SocketAddress(SocketAddress {
            address: addr.to_string(),
            port_specifier: Some(PortSpecifier::PortValue(port.into())),
            ..Default::default()
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locality(region: &str, zone: &str) -> Locality {
        Locality {
            region: region.to_string(),
            zone: zone.to_string(),
            subzone: String::new(),
        }
    }

    fn ep(addr: &str) -> EndpointIr {
        EndpointIr {
            address: addr.to_string(),
            port: 8080,
            weight: None,
        }
    }

    #[test]
    fn insertion_order_does_not_change_hash() {
        let mut a = EndpointsIr::new("c");
        a.add(locality("r1", "z1"), ep("10.0.0.1"));
        a.add(locality("r1", "z1"), ep("10.0.0.2"));
        let mut b = EndpointsIr::new("c");
        b.add(locality("r1", "z1"), ep("10.0.0.2"));
        b.add(locality("r1", "z1"), ep("10.0.0.1"));
        b.add(locality("r1", "z1"), ep("10.0.0.1"));
        assert_eq!(a.content_hash(), b.content_hash());
        assert_eq!(b.len(), 2);
    }

    #[test]
    fn prioritizes_client_zone() {
        let mut eps = EndpointsIr::new("c");
        eps.add(locality("r1", "z1"), ep("10.0.0.1"));
        eps.add(locality("r1", "z2"), ep("10.0.0.2"));
        eps.add(locality("r2", "z9"), ep("10.0.0.3"));

        let cla = eps.prioritize(Some(&locality("r1", "z2")));
        let priorities = cla
            .endpoints
            .iter()
            .map(|l| (l.locality.as_ref().unwrap().zone.clone(), l.priority))
            .collect::<Vec<_>>();
        assert_eq!(
            priorities,
            vec![
                ("z1".to_string(), 1),
                ("z2".to_string(), 0),
                ("z9".to_string(), 2),
            ]
        );

        let flat = eps.prioritize(None);
        assert!(flat.endpoints.iter().all(|l| l.priority == 0));
    }
}
