//! Renders a [`ReportMap`] into ready-to-patch status for individual objects.
//!
//! Each builder returns `None` when the report map holds nothing for the object, in which case
//! the object's status must be left alone.

use crate::{
    conditions::{self, reason},
    report_map::{ConditionReport, Conditions, GatewayReport, ListenerReport, ReportMap},
    status::{
        GatewayStatus, ListenerSetStatus, ListenerStatus, ParentReference, PolicyAncestorStatus,
        PolicyStatus, RouteGroupKind, RouteParentStatus, RouteStatus,
    },
};
use chrono::{offset::Utc, DateTime};
use gateway_xds_controller_core::{ObjectSource, ParentRef};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};

/// The most ancestors a policy status lists before the rest are summarized.
pub const MAX_POLICY_ANCESTORS: usize = 15;

pub const STATUS_SUMMARY: &str = "StatusSummary";
pub const STATUS_SUMMARIZED: &str = "StatusSummarized";

const GATEWAY_DEFAULTS: &[(&str, bool, &str)] = &[
    (conditions::ACCEPTED, true, reason::ACCEPTED),
    (conditions::PROGRAMMED, true, reason::PROGRAMMED),
];

const LISTENER_DEFAULTS: &[(&str, bool, &str)] = &[
    (conditions::ACCEPTED, true, reason::ACCEPTED),
    (conditions::CONFLICTED, false, reason::NO_CONFLICTS),
    (conditions::RESOLVED_REFS, true, reason::RESOLVED_REFS),
    (conditions::PROGRAMMED, true, reason::PROGRAMMED),
];

const ROUTE_PARENT_DEFAULTS: &[(&str, bool, &str)] = &[
    (conditions::ACCEPTED, true, reason::ACCEPTED),
    (conditions::RESOLVED_REFS, true, reason::RESOLVED_REFS),
];

const POLICY_ANCESTOR_DEFAULTS: &[(&str, bool, &str)] =
    &[(conditions::ACCEPTED, true, reason::VALID)];

pub fn build_gw_status(
    reports: &ReportMap,
    gateway: &ObjectSource,
    existing: Option<&GatewayStatus>,
    now: DateTime<Utc>,
) -> Option<GatewayStatus> {
    let report = reports.gateways.get(gateway)?;
    let now = Time(now);
    let existing = existing.cloned().unwrap_or_default();
    let (conditions, listeners) = render_gateway_like(
        report,
        &existing.conditions,
        &existing.listeners,
        false,
        &now,
    );
    Some(GatewayStatus {
        addresses: existing.addresses,
        conditions,
        listeners,
    })
}

pub fn build_listener_set_status(
    reports: &ReportMap,
    listener_set: &ObjectSource,
    existing: Option<&ListenerSetStatus>,
    now: DateTime<Utc>,
) -> Option<ListenerSetStatus> {
    let report = reports.listener_sets.get(listener_set)?;
    let now = Time(now);
    let existing = existing.cloned().unwrap_or_default();
    let (conditions, listeners) = render_gateway_like(
        report,
        &existing.conditions,
        &existing.listeners,
        true,
        &now,
    );
    Some(ListenerSetStatus {
        conditions,
        listeners,
    })
}

/// Renders a route's parent statuses. Entries written by other controllers are kept as they are.
pub fn build_route_status(
    reports: &ReportMap,
    route: &ObjectSource,
    existing: Option<&RouteStatus>,
    controller_name: &str,
    now: DateTime<Utc>,
) -> Option<RouteStatus> {
    let report = reports.routes.get(route)?;
    let now = Time(now);
    let existing = existing.map(|s| s.parents.as_slice()).unwrap_or_default();

    let mut parents = existing
        .iter()
        .filter(|p| p.controller_name != controller_name)
        .cloned()
        .collect::<Vec<_>>();
    parents.extend(report.parents.iter().map(|(parent, conds)| {
        let parent_ref = ParentReference::from(parent);
        let prior = existing
            .iter()
            .find(|p| p.controller_name == controller_name && p.parent_ref == parent_ref)
            .map(|p| p.conditions.as_slice())
            .unwrap_or_default();
        RouteParentStatus {
            conditions: render_conditions(conds.with_defaults(ROUTE_PARENT_DEFAULTS), prior, &now),
            parent_ref,
            controller_name: controller_name.to_string(),
        }
    }));
    parents.sort_by(|a, b| {
        a.parent_ref
            .sort_key()
            .cmp(&b.parent_ref.sort_key())
            .then_with(|| a.controller_name.cmp(&b.controller_name))
    });

    Some(RouteStatus { parents })
}

/// Renders a policy's ancestor statuses.
///
/// Entries written by other controllers are kept as they are. When this controller's ancestors
/// would take the list past [`MAX_POLICY_ANCESTORS`], the remainder is replaced by one summary
/// entry.
pub fn build_policy_status(
    reports: &ReportMap,
    policy: &ObjectSource,
    existing: Option<&PolicyStatus>,
    controller_name: &str,
    now: DateTime<Utc>,
) -> Option<PolicyStatus> {
    let report = reports.policies.get(policy)?;
    let now = Time(now);
    let existing = existing.map(|s| s.ancestors.as_slice()).unwrap_or_default();

    let mut foreign = existing
        .iter()
        .filter(|a| a.controller_name != controller_name)
        .cloned()
        .collect::<Vec<_>>();
    foreign.sort_by(|a, b| a.ancestor_ref.sort_key().cmp(&b.ancestor_ref.sort_key()));

    let mut ours = report
        .ancestors
        .iter()
        .map(|(ancestor, conds)| render_ancestor(ancestor, conds, existing, controller_name, &now))
        .collect::<Vec<_>>();
    ours.sort_by(|a, b| a.ancestor_ref.sort_key().cmp(&b.ancestor_ref.sort_key()));

    let room = MAX_POLICY_ANCESTORS.saturating_sub(foreign.len());
    let omitted = if ours.len() > room {
        ours.split_off(room)
    } else {
        vec![]
    };

    let mut ancestors = foreign;
    ancestors.append(&mut ours);
    if !omitted.is_empty() {
        tracing::debug!(%policy, omitted = omitted.len(), "Summarizing policy ancestors");
        ancestors.push(summary_entry(
            &omitted,
            existing,
            report.generation,
            controller_name,
            &now,
        ));
    }

    Some(PolicyStatus { ancestors })
}

fn render_gateway_like(
    report: &GatewayReport,
    existing_conditions: &[Condition],
    existing_listeners: &[ListenerStatus],
    with_port: bool,
    now: &Time,
) -> (Vec<Condition>, Vec<ListenerStatus>) {
    let conditions = render_conditions(
        report.conditions.with_defaults(GATEWAY_DEFAULTS),
        existing_conditions,
        now,
    );
    let listeners = report
        .listeners
        .iter()
        .map(|(name, listener)| {
            let prior = existing_listeners
                .iter()
                .find(|l| l.name == *name)
                .map(|l| l.conditions.as_slice())
                .unwrap_or_default();
            render_listener(name, listener, with_port, prior, now)
        })
        .collect();
    (conditions, listeners)
}

fn render_listener(
    name: &str,
    report: &ListenerReport,
    with_port: bool,
    prior: &[Condition],
    now: &Time,
) -> ListenerStatus {
    ListenerStatus {
        name: name.to_string(),
        port: report.port.filter(|_| with_port).map(i32::from),
        supported_kinds: report
            .supported_kinds
            .iter()
            .map(|gk| RouteGroupKind {
                group: Some(gk.group.to_string()),
                kind: gk.kind.to_string(),
            })
            .collect(),
        attached_routes: report.attached_routes,
        conditions: render_conditions(report.conditions.with_defaults(LISTENER_DEFAULTS), prior, now),
    }
}

fn render_ancestor(
    ancestor: &ParentRef,
    conds: &Conditions,
    existing: &[PolicyAncestorStatus],
    controller_name: &str,
    now: &Time,
) -> PolicyAncestorStatus {
    let ancestor_ref = ParentReference::from(ancestor);
    let prior = existing
        .iter()
        .find(|a| a.controller_name == controller_name && a.ancestor_ref == ancestor_ref)
        .map(|a| a.conditions.as_slice())
        .unwrap_or_default();
    PolicyAncestorStatus {
        conditions: render_conditions(conds.with_defaults(POLICY_ANCESTOR_DEFAULTS), prior, now),
        ancestor_ref,
        controller_name: controller_name.to_string(),
    }
}

/// Summarizes the ancestors that did not fit. The prior summary's transition time is kept until
/// its counts change.
fn summary_entry(
    omitted: &[PolicyAncestorStatus],
    existing: &[PolicyAncestorStatus],
    generation: i64,
    controller_name: &str,
    now: &Time,
) -> PolicyAncestorStatus {
    let rejected = omitted
        .iter()
        .filter(|a| {
            a.conditions
                .iter()
                .any(|c| c.type_ == conditions::ACCEPTED && c.status != "True")
        })
        .count();
    let group = controller_name
        .split_once('/')
        .map(|(domain, _)| domain)
        .unwrap_or(controller_name);
    let ancestor_ref = ParentReference {
        group: Some(group.to_string()),
        kind: Some(STATUS_SUMMARY.to_string()),
        name: STATUS_SUMMARY.to_string(),
        ..Default::default()
    };

    let summarized = ConditionReport {
        observed_generation: generation,
        ..ConditionReport::new(STATUS_SUMMARIZED, true, STATUS_SUMMARY).with_message(format!(
            "{} more ancestors: {} accepted, {} rejected",
            omitted.len(),
            omitted.len() - rejected,
            rejected
        ))
    };
    let prior = existing
        .iter()
        .find(|a| a.controller_name == controller_name && a.ancestor_ref == ancestor_ref)
        .map(|a| a.conditions.as_slice())
        .unwrap_or_default()
        .iter()
        .filter(|c| c.message == summarized.message)
        .cloned()
        .collect::<Vec<_>>();

    PolicyAncestorStatus {
        conditions: render_conditions(vec![summarized], &prior, now),
        ancestor_ref,
        controller_name: controller_name.to_string(),
    }
}

/// Converts reported conditions into API conditions, keeping the prior transition time of any
/// condition whose status did not change.
fn render_conditions(conds: Vec<ConditionReport>, prior: &[Condition], now: &Time) -> Vec<Condition> {
    conds
        .into_iter()
        .map(|c| {
            let status = if c.status { "True" } else { "False" }.to_string();
            let last_transition_time = prior
                .iter()
                .find(|p| p.type_ == c.type_ && p.status == status)
                .map(|p| p.last_transition_time.clone())
                .unwrap_or_else(|| now.clone());
            Condition {
                type_: c.type_,
                status,
                reason: c.reason,
                message: c.message,
                observed_generation: Some(c.observed_generation),
                last_transition_time,
            }
        })
        .collect()
}
