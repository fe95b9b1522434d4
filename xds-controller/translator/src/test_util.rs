use gateway_xds_controller_core::{
    backend::{BackendObjectIr, BackendRefIr},
    gateway::{GatewayIr, Listener, ListenerRoutes, Protocol, RouteAttachment, RoutesByListener},
    http_route::{HttpRouteIr, HttpRouteMatch, HttpRouteRule, PathMatch},
    policy::AttachedPolicies,
    tcp_route::TcpRouteIr,
    GroupKind, ObjectSource, ParentRef,
};
use std::sync::Arc;

pub fn http_route(ns: &str, name: &str, rules: Vec<HttpRouteRule>) -> HttpRouteIr {
    HttpRouteIr {
        source: ObjectSource::new(GroupKind::HTTP_ROUTE, ns, name),
        generation: 1,
        creation_timestamp: None,
        hostnames: vec![],
        rules,
        attached_policies: AttachedPolicies::default(),
        delegation_parents: vec![],
    }
}

pub fn rule(matches: Vec<HttpRouteMatch>) -> HttpRouteRule {
    HttpRouteRule {
        matches,
        ..HttpRouteRule::default()
    }
}

pub fn prefix(p: &str) -> HttpRouteMatch {
    HttpRouteMatch {
        path: Some(PathMatch::Prefix(p.to_string())),
        ..HttpRouteMatch::default()
    }
}

pub fn service(ns: &str, name: &str, port: u16) -> Arc<BackendObjectIr> {
    Arc::new(BackendObjectIr::new(
        ObjectSource::new(GroupKind::SERVICE, ns, name),
        port,
    ))
}

pub fn backend_ref(ns: &str, name: &str, port: u16) -> BackendRefIr {
    BackendRefIr::new(service(ns, name, port))
}

pub fn tcp_route(ns: &str, name: &str, backends: Vec<BackendRefIr>) -> TcpRouteIr {
    TcpRouteIr {
        source: ObjectSource::new(GroupKind::TCP_ROUTE, ns, name),
        generation: 1,
        creation_timestamp: None,
        hostnames: vec![],
        backends,
        attached_policies: AttachedPolicies::default(),
    }
}

pub fn gateway(listeners: Vec<Listener>) -> GatewayIr {
    GatewayIr {
        source: ObjectSource::gateway("infra", "gw"),
        generation: 1,
        listeners,
        attached_policies: AttachedPolicies::default(),
    }
}

pub fn listener(name: &str, protocol: Protocol, port: u16) -> Listener {
    let mut l = Listener::new(ObjectSource::gateway("infra", "gw"), name, protocol, port);
    l.parent_generation = 1;
    l
}

/// The parent reference a route uses to select `listener`.
pub fn section_ref(listener: &str) -> ParentRef {
    ParentRef::gateway("infra", "gw").with_section_name(listener)
}

pub fn attach_http(routes: &mut RoutesByListener, listener: &Listener, route: &Arc<HttpRouteIr>) {
    routes
        .entry(listener.parent_ref())
        .or_insert_with(ListenerRoutes::default)
        .http
        .push(RouteAttachment {
            route: route.clone(),
            parent_ref: section_ref(&listener.name),
        });
}

pub fn attach_tcp(routes: &mut RoutesByListener, listener: &Listener, route: &Arc<TcpRouteIr>) {
    routes
        .entry(listener.parent_ref())
        .or_insert_with(ListenerRoutes::default)
        .tcp
        .push(RouteAttachment {
            route: route.clone(),
            parent_ref: section_ref(&listener.name),
        });
}
