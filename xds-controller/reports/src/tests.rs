use crate::{
    conditions::{self, reason},
    status::{ParentReference, PolicyAncestorStatus, PolicyStatus, RouteParentStatus, RouteStatus},
    *,
};
use chrono::{DateTime, TimeZone, Utc};
use gateway_xds_controller_core::{GroupKind, ObjectSource, ParentRef};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use pretty_assertions::assert_eq;

const CONTROLLER: &str = "xds.gateway.dev/gateway-controller";
const OTHER_CONTROLLER: &str = "example.com/other-controller";

fn t0() -> DateTime<Utc> {
    DateTime::<Utc>::MIN_UTC
}

fn t1() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn policy_id() -> ObjectSource {
    ObjectSource::new(
        GroupKind::new("policy.example.com", "TrafficPolicy"),
        "ns",
        "policy",
    )
}

fn route_id() -> ObjectSource {
    ObjectSource::new(GroupKind::HTTP_ROUTE, "ns", "route")
}

fn accepted(reports: &mut ReportMap, ancestor: &ParentRef, generation: i64) {
    reports
        .policy_ancestor(&policy_id(), generation, ancestor)
        .set(ConditionReport::new(conditions::ACCEPTED, true, reason::VALID));
}

fn rejected(reports: &mut ReportMap, ancestor: &ParentRef, generation: i64) {
    reports
        .policy_ancestor(&policy_id(), generation, ancestor)
        .set(
            ConditionReport::new(conditions::ACCEPTED, false, reason::INVALID)
                .with_message("bad policy"),
        );
}

fn condition(type_: &str, status: &str, reason: &str, generation: i64, at: DateTime<Utc>) -> Condition {
    Condition {
        type_: type_.to_string(),
        status: status.to_string(),
        reason: reason.to_string(),
        message: String::new(),
        observed_generation: Some(generation),
        last_transition_time: Time(at),
    }
}

#[test]
fn policy_status_round_trip() {
    let gw_a = ParentRef::gateway("ns", "a");
    let gw_b = ParentRef::gateway("ns", "b");

    let mut reports = ReportMap::default();
    accepted(&mut reports, &gw_a, 3);
    accepted(&mut reports, &gw_b, 3);
    let status = build_policy_status(&reports, &policy_id(), None, CONTROLLER, t0())
        .expect("policy must have status");
    assert_eq!(status.ancestors.len(), 2);
    for ancestor in &status.ancestors {
        assert_eq!(
            ancestor.conditions,
            vec![condition(conditions::ACCEPTED, "True", reason::VALID, 3, t0())]
        );
    }

    let foreign = PolicyAncestorStatus {
        ancestor_ref: ParentReference {
            group: Some("example.com".to_string()),
            kind: Some("Mesh".to_string()),
            name: "mesh".to_string(),
            ..Default::default()
        },
        controller_name: OTHER_CONTROLLER.to_string(),
        conditions: vec![condition(conditions::ACCEPTED, "True", "Whatever", 1, t0())],
    };
    let mut prior = status.clone();
    prior.ancestors.push(foreign.clone());

    let mut reports = ReportMap::default();
    accepted(&mut reports, &gw_a, 3);
    rejected(&mut reports, &gw_b, 3);
    let status = build_policy_status(&reports, &policy_id(), Some(&prior), CONTROLLER, t1())
        .expect("policy must have status");

    assert_eq!(status.ancestors.len(), 3);
    assert!(status.ancestors.contains(&foreign));
    let find = |name: &str| {
        status
            .ancestors
            .iter()
            .find(|a| a.ancestor_ref.name == name && a.controller_name == CONTROLLER)
            .expect("ancestor must be present")
    };
    assert_eq!(
        find("a").conditions,
        vec![condition(conditions::ACCEPTED, "True", reason::VALID, 3, t0())],
        "unchanged conditions keep their transition time"
    );
    assert_eq!(
        find("b").conditions,
        vec![Condition {
            message: "bad policy".to_string(),
            ..condition(conditions::ACCEPTED, "False", reason::INVALID, 3, t1())
        }]
    );
}

#[test]
fn policy_ancestors_are_capped_with_summary() {
    let mut reports = ReportMap::default();
    for i in 0..20 {
        let gw = ParentRef::gateway("ns", format!("gw-{i:02}"));
        if i % 2 == 0 {
            accepted(&mut reports, &gw, 1);
        } else {
            rejected(&mut reports, &gw, 1);
        }
    }

    let status = build_policy_status(&reports, &policy_id(), None, CONTROLLER, t0())
        .expect("policy must have status");
    assert_eq!(status.ancestors.len(), MAX_POLICY_ANCESTORS + 1);
    assert_eq!(status.ancestors[0].ancestor_ref.name, "gw-00");
    assert_eq!(status.ancestors[14].ancestor_ref.name, "gw-14");

    let summary = &status.ancestors[MAX_POLICY_ANCESTORS];
    assert_eq!(summary.ancestor_ref.name, "StatusSummary");
    assert_eq!(summary.ancestor_ref.group.as_deref(), Some("xds.gateway.dev"));
    assert_eq!(
        summary.conditions[0].message,
        "5 more ancestors: 2 accepted, 3 rejected"
    );
}

#[test]
fn summarized_policy_status_is_stable_across_renders() {
    let mut reports = ReportMap::default();
    for i in 0..20 {
        accepted(&mut reports, &ParentRef::gateway("ns", format!("gw-{i:02}")), 1);
    }

    let first = build_policy_status(&reports, &policy_id(), None, CONTROLLER, t0())
        .expect("policy must have status");
    let second = build_policy_status(&reports, &policy_id(), Some(&first), CONTROLLER, t1())
        .expect("policy must have status");
    assert_eq!(first, second);

    rejected(&mut reports, &ParentRef::gateway("ns", "gw-19"), 1);
    let third = build_policy_status(&reports, &policy_id(), Some(&second), CONTROLLER, t1())
        .expect("policy must have status");
    let summary = &third.ancestors[MAX_POLICY_ANCESTORS].conditions[0];
    assert_eq!(summary.message, "5 more ancestors: 4 accepted, 1 rejected");
    assert_eq!(summary.last_transition_time, Time(t1()));
}

#[test]
fn route_status_fills_defaults_and_preserves_foreign_parents() {
    let gw = ParentRef::gateway("infra", "gw").with_section_name("http");
    let mut reports = ReportMap::default();
    reports.route(&route_id(), 7);
    reports.route_parent(&route_id(), 7, &gw);

    let foreign = RouteParentStatus {
        parent_ref: ParentReference {
            group: Some("gateway.networking.k8s.io".to_string()),
            kind: Some("Gateway".to_string()),
            namespace: Some("other".to_string()),
            name: "gw".to_string(),
            ..Default::default()
        },
        controller_name: OTHER_CONTROLLER.to_string(),
        conditions: vec![],
    };
    let existing = RouteStatus {
        parents: vec![foreign.clone()],
    };

    let status = build_route_status(&reports, &route_id(), Some(&existing), CONTROLLER, t1())
        .expect("route must have status");
    assert_eq!(
        status.parents,
        vec![
            foreign,
            RouteParentStatus {
                parent_ref: ParentReference::from(&gw),
                controller_name: CONTROLLER.to_string(),
                conditions: vec![
                    condition(conditions::ACCEPTED, "True", reason::ACCEPTED, 7, t1()),
                    condition(conditions::RESOLVED_REFS, "True", reason::RESOLVED_REFS, 7, t1()),
                ],
            },
        ]
    );
}

#[test]
fn route_status_keeps_extra_conditions_after_defaults() {
    let gw = ParentRef::gateway("infra", "gw");
    let mut reports = ReportMap::default();
    reports.route_parent(&route_id(), 1, &gw).set(
        ConditionReport::new(conditions::PARTIALLY_INVALID, true, reason::UNSUPPORTED_VALUE)
            .with_message(conditions::dropped_rule_message(0, "invalid path")),
    );

    let status = build_route_status(&reports, &route_id(), None, CONTROLLER, t0())
        .expect("route must have status");
    let types = status.parents[0]
        .conditions
        .iter()
        .map(|c| c.type_.as_str())
        .collect::<Vec<_>>();
    assert_eq!(types, vec!["Accepted", "ResolvedRefs", "PartiallyInvalid"]);
    assert_eq!(
        status.parents[0].conditions[2].message,
        "Dropped Rule (0): invalid path"
    );
}

#[test]
fn conditions_upsert_by_type() {
    let mut conds = Conditions::new(4);
    conds.set(ConditionReport::new(conditions::ACCEPTED, false, "First"));
    conds.set(ConditionReport::new(conditions::ACCEPTED, false, "Second"));
    assert_eq!(conds.iter().count(), 1);
    let accepted = conds.get(conditions::ACCEPTED).expect("must be set");
    assert_eq!(accepted.reason, "Second");
    assert_eq!(accepted.observed_generation, 4);
}

#[test]
fn merge_unions_route_parents_across_gateways() {
    let gw_a = ParentRef::gateway("ns", "a");
    let gw_b = ParentRef::gateway("ns", "b");

    let mut a = ReportMap::default();
    a.route_parent(&route_id(), 1, &gw_a);
    a.gateway(&gw_a.object(), 1);

    let mut b = ReportMap::default();
    b.route_parent(&route_id(), 1, &gw_b).set(ConditionReport::new(
        conditions::ACCEPTED,
        false,
        reason::NOT_ALLOWED_BY_LISTENERS,
    ));
    b.gateway(&gw_b.object(), 1);

    a.merge(b);
    let parents = a.routes[&route_id()].parents.keys().collect::<Vec<_>>();
    assert_eq!(parents, vec![&gw_a, &gw_b]);
    assert_eq!(a.gateways.len(), 2);
}

#[test]
fn gateway_listener_defaults() {
    let gw = ObjectSource::gateway("infra", "gw");
    let mut reports = ReportMap::default();
    let listener = reports.listener(&gw, 2, "http");
    listener.supported_kinds = vec![GroupKind::HTTP_ROUTE];
    listener.attached_routes = 3;
    listener.port = Some(80);

    let status = build_gw_status(&reports, &gw, None, t0()).expect("gateway must have status");
    assert_eq!(status.conditions.len(), 2);
    let listener = &status.listeners[0];
    assert_eq!(listener.name, "http");
    assert_eq!(listener.port, None);
    assert_eq!(listener.attached_routes, 3);
    assert_eq!(
        listener
            .conditions
            .iter()
            .map(|c| (c.type_.as_str(), c.status.as_str()))
            .collect::<Vec<_>>(),
        vec![
            ("Accepted", "True"),
            ("Conflicted", "False"),
            ("ResolvedRefs", "True"),
            ("Programmed", "True"),
        ]
    );
}

#[test]
fn listener_set_listeners_report_their_port() {
    let ls = ObjectSource::new(GroupKind::LISTENER_SET, "team", "extra");
    let mut reports = ReportMap::default();
    reports.listener(&ls, 1, "https").port = Some(443);
    assert!(reports.gateways.is_empty());

    let status = build_listener_set_status(&reports, &ls, None, t0())
        .expect("listener set must have status");
    assert_eq!(status.listeners[0].port, Some(443));
}

#[test]
fn unreported_objects_have_no_status() {
    let reports = ReportMap::default();
    assert!(build_policy_status(&reports, &policy_id(), None, CONTROLLER, t0()).is_none());
    assert!(build_route_status(&reports, &route_id(), None, CONTROLLER, t0()).is_none());
    assert!(PolicyStatus::default().ancestors.is_empty());
}
