//! Listener validation and merging.
//!
//! Listeners are validated once per translation: unsupported protocols and route kinds are
//! rejected, then listeners sharing a port are checked for protocol and hostname conflicts.
//! Survivors on the same port are merged into a single Envoy listener:
//!
//! - HTTP listeners share one filter chain whose virtual hosts are keyed by hostname;
//! - each HTTPS listener gets its own filter chain, selected by SNI;
//! - each TCP or TLS listener gets one filter chain bound to exactly one route.
//!
//! Rejected listeners are still fully reported; they are just absent from the output.

use crate::{hostname, sort::compare_rule_matches};
use gateway_xds_controller_core::{
    gateway::{GatewayIr, Listener, ListenerRoutes, ListenerTls, Protocol, RoutesByListener, TlsCertificate},
    http_route::HttpRouteRuleMatchIr,
    policy::AttachedPolicies,
    tcp_route::TcpRouteIr,
    GroupKind, ObjectSource, ParentRef,
};
use gateway_xds_controller_reports::{
    conditions::{self, reason},
    ConditionReport, ReportMap,
};
use std::{
    collections::{btree_map::Entry, BTreeMap},
    sync::Arc,
};

/// All listeners of a gateway bound to one port.
#[derive(Clone, Debug, PartialEq)]
pub struct MergedListener {
    pub name: String,
    pub port: u16,

    /// The listeners merged here, in declaration order.
    pub parents: Vec<Listener>,

    pub http: Option<HttpFilterChain>,
    pub https: Vec<HttpFilterChain>,
    pub tcp: Vec<TcpFilterChain>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HttpFilterChain {
    pub name: String,
    pub server_names: Vec<String>,
    pub tls: Option<TlsCertificate>,

    /// Listener-scope policies of the first parent.
    pub attached_policies: AttachedPolicies,
    pub virtual_hosts: Vec<VirtualHostIr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VirtualHostIr {
    pub name: String,
    pub hostname: String,

    /// Policies of the parent listener whose hostname matches this virtual host most closely.
    pub attached_policies: AttachedPolicies,

    /// Ordered by matching priority.
    pub rules: Vec<VirtualHostRule>,
}

/// A rule match together with the parent references it was attached through.
#[derive(Clone, Debug)]
pub struct VirtualHostRule {
    pub rule: HttpRouteRuleMatchIr,
    pub parent_refs: Vec<ParentRef>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TcpFilterChain {
    pub name: String,
    pub listener: ParentRef,
    pub server_names: Vec<String>,
    pub tls: Option<TlsCertificate>,
    pub attached_policies: AttachedPolicies,
    pub route: Arc<TcpRouteIr>,
    pub parent_ref: ParentRef,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum ProtocolGroup {
    Http,
    Tls,
    Tcp,
}

/// Per route parent reference, whether any listener accepted it.
#[derive(Default)]
struct Attachments {
    states: BTreeMap<(ObjectSource, ParentRef), (i64, Option<ConditionReport>)>,
}

// === impl VirtualHostRule ===

impl PartialEq for VirtualHostRule {
    fn eq(&self, other: &Self) -> bool {
        self.rule.route == other.rule.route
            && self.rule.rule_index == other.rule.rule_index
            && self.rule.match_index == other.rule.match_index
            && self.parent_refs == other.parent_refs
    }
}

// === impl ProtocolGroup ===

impl ProtocolGroup {
    fn of(protocol: &Protocol) -> Option<Self> {
        match protocol {
            Protocol::Http => Some(Self::Http),
            Protocol::Https | Protocol::Tls => Some(Self::Tls),
            Protocol::Tcp => Some(Self::Tcp),
            Protocol::Unsupported(_) => None,
        }
    }
}

/// Validates a gateway's listeners, reporting on every one of them, and returns the accepted
/// listeners in declaration order.
pub fn validate_listeners<'g>(gateway: &'g GatewayIr, reports: &mut ReportMap) -> Vec<&'g Listener> {
    let mut candidates = Vec::with_capacity(gateway.listeners.len());
    for listener in &gateway.listeners {
        let report = reports.listener(&listener.parent, listener.parent_generation, &listener.name);
        report.port = Some(listener.port);

        let supported = listener.protocol.supported_kinds();
        if supported.is_empty() {
            tracing::info!(%listener.parent, listener = %listener.name, protocol = %listener.protocol, "Unsupported listener protocol");
            report.conditions.set(
                ConditionReport::new(conditions::ACCEPTED, false, reason::UNSUPPORTED_PROTOCOL)
                    .with_message(format!("protocol {} is not supported", listener.protocol)),
            );
            report.conditions.set(not_programmed());
            continue;
        }

        if listener.allowed_kinds.is_empty() {
            report.supported_kinds = supported.to_vec();
        } else {
            report.supported_kinds = listener
                .allowed_kinds
                .iter()
                .filter(|gk| supported.contains(gk))
                .cloned()
                .collect();
            let invalid = listener
                .allowed_kinds
                .iter()
                .filter(|gk| !supported.contains(gk))
                .map(ToString::to_string)
                .collect::<Vec<_>>();
            if !invalid.is_empty() {
                let message = format!(
                    "route kinds {} are not supported on {} listeners",
                    invalid.join(", "),
                    listener.protocol
                );
                report.conditions.set(
                    ConditionReport::new(conditions::RESOLVED_REFS, false, reason::INVALID_ROUTE_KINDS)
                        .with_message(&message),
                );
                report.conditions.set(
                    ConditionReport::new(conditions::ACCEPTED, false, reason::INVALID_ROUTE_KINDS)
                        .with_message(message),
                );
                report.conditions.set(not_programmed());
                continue;
            }
        }

        candidates.push(listener);
    }

    let mut by_port = BTreeMap::<u16, Vec<usize>>::new();
    for (i, l) in candidates.iter().enumerate() {
        by_port.entry(l.port).or_default().push(i);
    }

    let mut conflicted = vec![None; candidates.len()];
    for idxs in by_port.values() {
        let first = ProtocolGroup::of(&candidates[idxs[0]].protocol);
        if idxs
            .iter()
            .any(|&i| ProtocolGroup::of(&candidates[i].protocol) != first)
        {
            for &i in idxs {
                conflicted[i] = Some(reason::PROTOCOL_CONFLICT);
            }
            continue;
        }
        for (n, &i) in idxs.iter().enumerate() {
            for &j in &idxs[n + 1..] {
                if candidates[i].hostname() == candidates[j].hostname() {
                    conflicted[i] = Some(reason::HOSTNAME_CONFLICT);
                    conflicted[j] = Some(reason::HOSTNAME_CONFLICT);
                }
            }
        }
    }

    let mut accepted = vec![];
    for (listener, conflict) in candidates.into_iter().zip(conflicted) {
        match conflict {
            None => accepted.push(listener),
            Some(reason) => {
                tracing::info!(%listener.parent, listener = %listener.name, port = listener.port, reason, "Listener conflicts");
                let report =
                    reports.listener(&listener.parent, listener.parent_generation, &listener.name);
                report.conditions.set(
                    ConditionReport::new(conditions::CONFLICTED, true, reason).with_message(
                        format!("listener conflicts with another listener on port {}", listener.port),
                    ),
                );
                report.conditions.set(not_programmed());
            }
        }
    }

    if accepted.len() < gateway.listeners.len() {
        reports
            .gateway(&gateway.source, gateway.generation)
            .conditions
            .set(
                ConditionReport::new(conditions::ACCEPTED, true, reason::LISTENERS_NOT_VALID)
                    .with_message("one or more listeners are invalid"),
            );
    }

    accepted
}

/// Merges validated listeners into one Envoy listener per port.
pub fn merge_listeners(
    gateway: &GatewayIr,
    validated: &[&Listener],
    routes: &RoutesByListener,
    reports: &mut ReportMap,
) -> Vec<MergedListener> {
    let mut attachments = Attachments::default();
    let empty = ListenerRoutes::default();

    // Routes attached to rejected listeners are never accepted through them.
    for listener in &gateway.listeners {
        if validated.iter().any(|v| std::ptr::eq(*v, listener)) {
            continue;
        }
        let attached = routes.get(&listener.parent_ref()).unwrap_or(&empty);
        let rejection = ConditionReport::new(conditions::ACCEPTED, false, reason::NOT_ALLOWED_BY_LISTENERS)
            .with_message(format!("listener {} is invalid", listener.name));
        for a in &attached.http {
            attachments.reject(&a.route.source, a.route.generation, &a.parent_ref, rejection.clone());
        }
        for a in &attached.tcp {
            attachments.reject(&a.route.source, a.route.generation, &a.parent_ref, rejection.clone());
        }
    }

    let mut by_port = BTreeMap::<u16, Vec<&Listener>>::new();
    for l in validated {
        by_port.entry(l.port).or_default().push(l);
    }

    let mut merged = vec![];
    for (port, listeners) in by_port {
        let mut out = MergedListener {
            name: listener_name(port),
            port,
            parents: listeners.iter().map(|l| (*l).clone()).collect(),
            http: None,
            https: vec![],
            tcp: vec![],
        };

        let http = listeners
            .iter()
            .copied()
            .filter(|l| l.protocol == Protocol::Http)
            .collect::<Vec<_>>();
        if !http.is_empty() {
            out.http = Some(http_chain(
                out.name.clone(),
                &http,
                None,
                vec![],
                routes,
                reports,
                &mut attachments,
            ));
        }

        for l in listeners.iter().copied() {
            match l.protocol {
                Protocol::Https => {
                    let Some(cert) = resolve_tls(l, reports) else {
                        continue;
                    };
                    let server_names = l.hostname().map(|h| vec![h.to_string()]).unwrap_or_default();
                    out.https.push(http_chain(
                        chain_name(l),
                        &[l],
                        Some(cert),
                        server_names,
                        routes,
                        reports,
                        &mut attachments,
                    ));
                }
                Protocol::Tcp | Protocol::Tls => {
                    if let Some(chain) = tcp_chain(l, routes, reports, &mut attachments) {
                        out.tcp.push(chain);
                    }
                }
                _ => {}
            }
        }

        merged.push(out);
    }

    attachments.finish(reports);
    merged
}

pub fn listener_name(port: u16) -> String {
    format!("listener~{port}")
}

pub(crate) fn chain_name(l: &Listener) -> String {
    format!("{}~{}~{}", l.parent.namespace, l.parent.name, l.name)
}

fn not_programmed() -> ConditionReport {
    ConditionReport::new(conditions::PROGRAMMED, false, reason::INVALID)
}

/// Resolves the certificate of a terminating listener, reporting and returning `None` when it
/// cannot be used.
fn resolve_tls(l: &Listener, reports: &mut ReportMap) -> Option<TlsCertificate> {
    let error = match &l.tls {
        Some(ListenerTls::Terminate(Ok(cert))) => return Some(cert.clone()),
        Some(ListenerTls::Terminate(Err(error))) => (error.reason(), error.to_string()),
        Some(ListenerTls::Passthrough) | None => (
            reason::INVALID_CERTIFICATE_REF,
            format!("{} listener requires a certificate", l.protocol),
        ),
    };
    tracing::info!(%l.parent, listener = %l.name, error = %error.1, "Dropping filter chain");
    let report = reports.listener(&l.parent, l.parent_generation, &l.name);
    report.conditions.set(
        ConditionReport::new(conditions::RESOLVED_REFS, false, error.0).with_message(error.1),
    );
    report.conditions.set(not_programmed());
    None
}

fn kind_allowed(reports: &mut ReportMap, l: &Listener, kind: &GroupKind) -> bool {
    reports
        .listener(&l.parent, l.parent_generation, &l.name)
        .supported_kinds
        .contains(kind)
}

fn http_chain(
    name: String,
    parents: &[&Listener],
    tls: Option<TlsCertificate>,
    server_names: Vec<String>,
    routes: &RoutesByListener,
    reports: &mut ReportMap,
    attachments: &mut Attachments,
) -> HttpFilterChain {
    // Virtual host name -> (specificity, policy source index, rules keyed by identity).
    let mut vhosts = BTreeMap::<String, ((u8, usize), usize, Vec<VirtualHostRule>)>::new();

    for (idx, l) in parents.iter().enumerate() {
        let Some(attached) = routes.get(&l.parent_ref()) else {
            continue;
        };
        let mut count = 0;
        for a in &attached.http {
            if !kind_allowed(reports, l, &a.route.source.group_kind) {
                attachments.reject(
                    &a.route.source,
                    a.route.generation,
                    &a.parent_ref,
                    ConditionReport::new(conditions::ACCEPTED, false, reason::NOT_ALLOWED_BY_LISTENERS)
                        .with_message(format!(
                            "listener {} does not allow {}",
                            l.name, a.route.source.group_kind
                        )),
                );
                continue;
            }
            let hostnames = hostname::intersect(l.hostname(), &a.route.hostnames);
            if hostnames.is_empty() {
                attachments.reject(
                    &a.route.source,
                    a.route.generation,
                    &a.parent_ref,
                    ConditionReport::new(
                        conditions::ACCEPTED,
                        false,
                        reason::NO_MATCHING_LISTENER_HOSTNAME,
                    )
                    .with_message(format!("no hostname matches listener {}", l.name)),
                );
                continue;
            }
            attachments.accept(&a.route.source, a.route.generation, &a.parent_ref);
            count += 1;

            for host in hostnames {
                let spec = hostname::specificity(l.hostname(), &host);
                let entry = match vhosts.entry(host) {
                    Entry::Vacant(e) => e.insert((spec, idx, vec![])),
                    Entry::Occupied(e) => {
                        let v = e.into_mut();
                        // Ties go to the first declared listener.
                        if spec > v.0 {
                            v.0 = spec;
                            v.1 = idx;
                        }
                        v
                    }
                };
                for m in a.route.rule_matches() {
                    match entry.2.iter_mut().find(|r| {
                        Arc::ptr_eq(&r.rule.route, &m.route)
                            && r.rule.rule_index == m.rule_index
                            && r.rule.match_index == m.match_index
                    }) {
                        Some(existing) => {
                            if !existing.parent_refs.contains(&a.parent_ref) {
                                existing.parent_refs.push(a.parent_ref.clone());
                            }
                        }
                        None => entry.2.push(VirtualHostRule {
                            rule: m,
                            parent_refs: vec![a.parent_ref.clone()],
                        }),
                    }
                }
            }
        }
        reports
            .listener(&l.parent, l.parent_generation, &l.name)
            .attached_routes += count;
    }

    let virtual_hosts = vhosts
        .into_iter()
        .map(|(host, (_, idx, mut rules))| {
            rules.sort_by(|a, b| compare_rule_matches(&a.rule, &b.rule));
            VirtualHostIr {
                name: format!("{name}~{host}"),
                hostname: host,
                attached_policies: parents[idx].attached_policies.clone(),
                rules,
            }
        })
        .collect();

    HttpFilterChain {
        name,
        server_names,
        tls,
        attached_policies: parents[0].attached_policies.clone(),
        virtual_hosts,
    }
}

/// Binds a TCP or TLS listener to the earliest created qualifying route.
fn tcp_chain(
    l: &Listener,
    routes: &RoutesByListener,
    reports: &mut ReportMap,
    attachments: &mut Attachments,
) -> Option<TcpFilterChain> {
    let tls = match (&l.protocol, &l.tls) {
        (Protocol::Tls, Some(ListenerTls::Terminate(_))) => Some(resolve_tls(l, reports)?),
        _ => None,
    };

    let attached = routes.get(&l.parent_ref())?;
    let mut candidates = vec![];
    for a in &attached.http {
        attachments.reject(
            &a.route.source,
            a.route.generation,
            &a.parent_ref,
            ConditionReport::new(conditions::ACCEPTED, false, reason::NOT_ALLOWED_BY_LISTENERS)
                .with_message(format!("listener {} does not allow {}", l.name, a.route.source.group_kind)),
        );
    }
    for a in &attached.tcp {
        if !kind_allowed(reports, l, &a.route.source.group_kind) {
            attachments.reject(
                &a.route.source,
                a.route.generation,
                &a.parent_ref,
                ConditionReport::new(conditions::ACCEPTED, false, reason::NOT_ALLOWED_BY_LISTENERS)
                    .with_message(format!("listener {} does not allow {}", l.name, a.route.source.group_kind)),
            );
            continue;
        }
        let server_names = match l.protocol {
            Protocol::Tls => {
                let names = hostname::intersect(l.hostname(), &a.route.hostnames);
                if names.is_empty() {
                    attachments.reject(
                        &a.route.source,
                        a.route.generation,
                        &a.parent_ref,
                        ConditionReport::new(
                            conditions::ACCEPTED,
                            false,
                            reason::NO_MATCHING_LISTENER_HOSTNAME,
                        )
                        .with_message(format!("no hostname matches listener {}", l.name)),
                    );
                    continue;
                }
                names.into_iter().filter(|n| n != hostname::ANY).collect()
            }
            _ => vec![],
        };
        candidates.push((a, server_names));
    }

    candidates.sort_by(|(a, _), (b, _)| {
        let by_ts = match (&a.route.creation_timestamp, &b.route.creation_timestamp) {
            (Some(a), Some(b)) => a.cmp(b),
            (None, None) => std::cmp::Ordering::Equal,
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
        };
        by_ts
            .then_with(|| a.route.source.namespace.cmp(&b.route.source.namespace))
            .then_with(|| a.route.source.name.cmp(&b.route.source.name))
    });

    let mut candidates = candidates.into_iter();
    let (selected, server_names) = candidates.next()?;
    attachments.accept(&selected.route.source, selected.route.generation, &selected.parent_ref);
    reports
        .listener(&l.parent, l.parent_generation, &l.name)
        .attached_routes += 1;

    for (a, _) in candidates {
        if a.route.source == selected.route.source {
            continue;
        }
        tracing::info!(listener = %l.name, route = %a.route.source, selected = %selected.route.source, "Route not bound: listener already has a route");
        attachments.reject(
            &a.route.source,
            a.route.generation,
            &a.parent_ref,
            ConditionReport::new(conditions::ACCEPTED, false, reason::UNSUPPORTED_VALUE).with_message(
                format!(
                    "listener {} is already bound to {} {}",
                    l.name, selected.route.source.group_kind, selected.route.source
                ),
            ),
        );
    }

    Some(TcpFilterChain {
        name: chain_name(l),
        listener: l.parent_ref(),
        server_names,
        tls,
        attached_policies: l.attached_policies.clone(),
        route: selected.route.clone(),
        parent_ref: selected.parent_ref.clone(),
    })
}

// === impl Attachments ===

impl Attachments {
    fn accept(&mut self, route: &ObjectSource, generation: i64, parent: &ParentRef) {
        self.states
            .insert((route.clone(), parent.clone()), (generation, None));
    }

    fn reject(&mut self, route: &ObjectSource, generation: i64, parent: &ParentRef, cond: ConditionReport) {
        self.states
            .entry((route.clone(), parent.clone()))
            .or_insert((generation, Some(cond)));
    }

    fn finish(self, reports: &mut ReportMap) {
        for ((route, parent), (generation, rejection)) in self.states {
            let conditions = reports.route_parent(&route, generation, &parent);
            if let Some(cond) = rejection {
                conditions.set(cond);
            }
        }
    }
}
