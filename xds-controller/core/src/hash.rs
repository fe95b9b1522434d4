//! Stable content hashing for snapshot versioning.
//!
//! Snapshot versions must change if and only if content changes, across retranslations and across
//! process restarts. Hashes are seeded with fixed keys, and protobuf map fields (which prost
//! encodes in `HashMap` iteration order) are hashed separately in key order.

use ahash::{AHasher, RandomState};
use envoy_types::pb::{
    envoy::config::{
        cluster::v3::Cluster,
        core::v3::Metadata,
        endpoint::v3::ClusterLoadAssignment,
        listener::v3::Listener,
        route::v3::{route, route_action::ClusterSpecifier, RouteConfiguration},
    },
    google::protobuf::Any,
};
use prost::Message;
use std::{
    collections::HashMap,
    hash::{BuildHasher, Hash, Hasher},
    mem,
};

const SEEDS: [u64; 4] = [
    0x6a09_e667_f3bc_c908,
    0xbb67_ae85_84ca_a73b,
    0x3c6e_f372_fe94_f82b,
    0xa54f_f53a_5f1d_36f1,
];

fn state() -> RandomState {
    RandomState::with_seeds(SEEDS[0], SEEDS[1], SEEDS[2], SEEDS[3])
}

pub fn hash_value<T: Hash + ?Sized>(value: &T) -> u64 {
    state().hash_one(value)
}

/// Hashes a message that has no map fields.
pub fn hash_message<M: Message>(msg: &M) -> u64 {
    hash_value(msg.encode_to_vec().as_slice())
}

pub fn hash_cluster(cluster: &Cluster) -> u64 {
    let mut cluster = cluster.clone();
    let mut h = Canonical::new();
    h.any_map(&mem::take(&mut cluster.typed_extension_protocol_options));
    h.metadata(cluster.metadata.take());
    if let Some(cla) = cluster.load_assignment.take() {
        h.write(hash_load_assignment(&cla));
    }
    h.message(&cluster);
    h.finish()
}

pub fn hash_load_assignment(cla: &ClusterLoadAssignment) -> u64 {
    let mut cla = cla.clone();
    let mut h = Canonical::new();
    for locality in &mut cla.endpoints {
        h.metadata(locality.metadata.take());
        for ep in &mut locality.lb_endpoints {
            h.metadata(ep.metadata.take());
        }
    }
    h.message(&cla);
    h.finish()
}

pub fn hash_route_configuration(rc: &RouteConfiguration) -> u64 {
    let mut rc = rc.clone();
    let mut h = Canonical::new();
    for vhost in &mut rc.virtual_hosts {
        h.any_map(&mem::take(&mut vhost.typed_per_filter_config));
        for r in &mut vhost.routes {
            h.any_map(&mem::take(&mut r.typed_per_filter_config));
            h.metadata(r.metadata.take());
            if let Some(route::Action::Route(action)) = &mut r.action {
                if let Some(ClusterSpecifier::WeightedClusters(wc)) = &mut action.cluster_specifier {
                    for cw in &mut wc.clusters {
                        h.any_map(&mem::take(&mut cw.typed_per_filter_config));
                    }
                }
            }
        }
    }
    h.message(&rc);
    h.finish()
}

pub fn hash_listener(listener: &Listener) -> u64 {
    let mut listener = listener.clone();
    let mut h = Canonical::new();
    h.metadata(listener.metadata.take());
    for fc in &mut listener.filter_chains {
        h.metadata(fc.metadata.take());
    }
    h.message(&listener);
    h.finish()
}

struct Canonical(AHasher);

impl Canonical {
    fn new() -> Self {
        Self(state().build_hasher())
    }

    fn write(&mut self, v: u64) {
        self.0.write_u64(v);
    }

    fn message<M: Message>(&mut self, msg: &M) {
        msg.encode_to_vec().hash(&mut self.0);
    }

    fn any_map(&mut self, map: &HashMap<String, Any>) {
        let mut entries = map.iter().collect::<Vec<_>>();
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));
        entries.len().hash(&mut self.0);
        for (k, v) in entries {
            k.hash(&mut self.0);
            v.type_url.hash(&mut self.0);
            v.value.hash(&mut self.0);
        }
    }

    fn metadata(&mut self, md: Option<Metadata>) {
        let Some(md) = md else {
            0u8.hash(&mut self.0);
            return;
        };
        1u8.hash(&mut self.0);
        let mut entries = md.filter_metadata.iter().collect::<Vec<_>>();
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));
        for (k, v) in entries {
            k.hash(&mut self.0);
            self.message(v);
        }
        self.any_map(&md.typed_filter_metadata);
    }

    fn finish(self) -> u64 {
        self.0.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use envoy_types::pb::envoy::config::route::v3::{Route, VirtualHost};

    fn any(type_url: &str, value: &[u8]) -> Any {
        Any {
            type_url: type_url.to_string(),
            value: value.to_vec(),
        }
    }

    #[test]
    fn map_insertion_order_is_irrelevant() {
        let mut a = Cluster {
            name: "c".to_string(),
            ..Default::default()
        };
        let mut b = a.clone();
        for (k, v) in [("x", b"1"), ("y", b"2"), ("z", b"3")] {
            a.typed_extension_protocol_options
                .insert(k.to_string(), any(k, v));
        }
        for (k, v) in [("z", b"3"), ("x", b"1"), ("y", b"2")] {
            b.typed_extension_protocol_options
                .insert(k.to_string(), any(k, v));
        }
        assert_eq!(hash_cluster(&a), hash_cluster(&b));

        b.typed_extension_protocol_options
            .insert("y".to_string(), any("y", b"changed"));
        assert_ne!(hash_cluster(&a), hash_cluster(&b));
    }

    #[test]
    fn route_config_hash_tracks_per_filter_config() {
        let route = Route {
            name: "r".to_string(),
            ..Default::default()
        };
        let rc = RouteConfiguration {
            name: "listener~80".to_string(),
            virtual_hosts: vec![VirtualHost {
                name: "vh".to_string(),
                domains: vec!["*".to_string()],
                routes: vec![route],
                ..Default::default()
            }],
            ..Default::default()
        };
        let mut with_config = rc.clone();
        with_config.virtual_hosts[0].routes[0]
            .typed_per_filter_config
            .insert("f".to_string(), any("t", b"v"));

        assert_eq!(
            hash_route_configuration(&rc),
            hash_route_configuration(&rc.clone())
        );
        assert_ne!(
            hash_route_configuration(&rc),
            hash_route_configuration(&with_config)
        );
    }
}
