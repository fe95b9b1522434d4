use gateway_xds_controller_core::{GroupKind, ObjectSource, ParentRef};
use std::collections::{btree_map::Entry, BTreeMap};

/// A condition recorded during translation, not yet rendered onto an object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConditionReport {
    pub type_: String,
    pub status: bool,
    pub reason: String,
    pub message: String,
    pub observed_generation: i64,
}

/// An object's conditions, at most one per type.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Conditions {
    generation: i64,
    items: Vec<ConditionReport>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GatewayReport {
    pub generation: i64,
    pub conditions: Conditions,
    pub listeners: BTreeMap<String, ListenerReport>,
}

pub type ListenerSetReport = GatewayReport;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListenerReport {
    pub conditions: Conditions,
    pub port: Option<u16>,
    pub supported_kinds: Vec<GroupKind>,
    pub attached_routes: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouteReport {
    pub generation: i64,
    pub parents: BTreeMap<ParentRef, Conditions>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PolicyReport {
    pub generation: i64,
    pub ancestors: BTreeMap<ParentRef, Conditions>,
}

/// Findings of one translation pass, keyed by object.
///
/// Only exceptional findings are recorded; conditions that were never set render with their
/// healthy value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReportMap {
    pub gateways: BTreeMap<ObjectSource, GatewayReport>,
    pub listener_sets: BTreeMap<ObjectSource, ListenerSetReport>,
    pub routes: BTreeMap<ObjectSource, RouteReport>,
    pub policies: BTreeMap<ObjectSource, PolicyReport>,
}

// === impl ConditionReport ===

impl ConditionReport {
    pub fn new(type_: impl ToString, status: bool, reason: impl ToString) -> Self {
        Self {
            type_: type_.to_string(),
            status,
            reason: reason.to_string(),
            message: String::new(),
            observed_generation: 0,
        }
    }

    pub fn with_message(mut self, message: impl ToString) -> Self {
        self.message = message.to_string();
        self
    }
}

// === impl Conditions ===

impl Conditions {
    pub fn new(generation: i64) -> Self {
        Self {
            generation,
            items: vec![],
        }
    }

    /// Sets a condition, replacing any prior condition of the same type.
    pub fn set(&mut self, mut condition: ConditionReport) {
        condition.observed_generation = self.generation;
        self.upsert(condition);
    }

    pub fn get(&self, type_: &str) -> Option<&ConditionReport> {
        self.items.iter().find(|c| c.type_ == type_)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConditionReport> {
        self.items.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the conditions with every missing default filled in. Defaults come first, in the
    /// given order, followed by any other conditions in the order they were set.
    pub fn with_defaults(&self, defaults: &[(&str, bool, &str)]) -> Vec<ConditionReport> {
        let mut out = defaults
            .iter()
            .map(|(type_, status, reason)| match self.get(type_) {
                Some(c) => c.clone(),
                None => ConditionReport {
                    observed_generation: self.generation,
                    ..ConditionReport::new(type_, *status, reason)
                },
            })
            .collect::<Vec<_>>();
        out.extend(
            self.items
                .iter()
                .filter(|c| !defaults.iter().any(|(t, _, _)| *t == c.type_))
                .cloned(),
        );
        out
    }

    fn merge(&mut self, other: Conditions) {
        self.generation = self.generation.max(other.generation);
        for c in other.items {
            self.upsert(c);
        }
    }

    fn upsert(&mut self, condition: ConditionReport) {
        match self.items.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) => *existing = condition,
            None => self.items.push(condition),
        }
    }
}

// === impl GatewayReport ===

impl GatewayReport {
    fn new(generation: i64) -> Self {
        Self {
            generation,
            conditions: Conditions::new(generation),
            listeners: BTreeMap::new(),
        }
    }

    pub fn listener(&mut self, name: &str) -> &mut ListenerReport {
        let generation = self.generation;
        self.listeners
            .entry(name.to_string())
            .or_insert_with(|| ListenerReport {
                conditions: Conditions::new(generation),
                ..Default::default()
            })
    }
}

// === impl ReportMap ===

impl ReportMap {
    pub fn is_empty(&self) -> bool {
        self.gateways.is_empty()
            && self.listener_sets.is_empty()
            && self.routes.is_empty()
            && self.policies.is_empty()
    }

    pub fn gateway(&mut self, gateway: &ObjectSource, generation: i64) -> &mut GatewayReport {
        self.gateways
            .entry(gateway.clone())
            .or_insert_with(|| GatewayReport::new(generation))
    }

    pub fn listener_set(
        &mut self,
        listener_set: &ObjectSource,
        generation: i64,
    ) -> &mut ListenerSetReport {
        self.listener_sets
            .entry(listener_set.clone())
            .or_insert_with(|| GatewayReport::new(generation))
    }

    /// The report for a listener declared by either a Gateway or a ListenerSet.
    pub fn listener(
        &mut self,
        parent: &ObjectSource,
        parent_generation: i64,
        name: &str,
    ) -> &mut ListenerReport {
        if parent.group_kind == GroupKind::LISTENER_SET {
            self.listener_set(parent, parent_generation).listener(name)
        } else {
            self.gateway(parent, parent_generation).listener(name)
        }
    }

    pub fn route(&mut self, route: &ObjectSource, generation: i64) -> &mut RouteReport {
        self.routes.entry(route.clone()).or_insert_with(|| RouteReport {
            generation,
            parents: BTreeMap::new(),
        })
    }

    pub fn route_parent(
        &mut self,
        route: &ObjectSource,
        generation: i64,
        parent: &ParentRef,
    ) -> &mut Conditions {
        let report = self.route(route, generation);
        let generation = report.generation;
        report
            .parents
            .entry(parent.clone())
            .or_insert_with(|| Conditions::new(generation))
    }

    pub fn policy(&mut self, policy: &ObjectSource, generation: i64) -> &mut PolicyReport {
        self.policies
            .entry(policy.clone())
            .or_insert_with(|| PolicyReport {
                generation,
                ancestors: BTreeMap::new(),
            })
    }

    pub fn policy_ancestor(
        &mut self,
        policy: &ObjectSource,
        generation: i64,
        ancestor: &ParentRef,
    ) -> &mut Conditions {
        let report = self.policy(policy, generation);
        let generation = report.generation;
        report
            .ancestors
            .entry(ancestor.clone())
            .or_insert_with(|| Conditions::new(generation))
    }

    /// Folds another pass's reports into this one.
    ///
    /// Gateway and ListenerSet reports are owned by a single translation and are replaced. Route
    /// and policy reports are unioned per parent, so an object attached to several gateways
    /// reflects all of them.
    pub fn merge(&mut self, other: ReportMap) {
        self.gateways.extend(other.gateways);
        self.listener_sets.extend(other.listener_sets);

        for (id, route) in other.routes {
            match self.routes.entry(id) {
                Entry::Vacant(entry) => {
                    entry.insert(route);
                }
                Entry::Occupied(mut entry) => {
                    let existing = entry.get_mut();
                    existing.generation = existing.generation.max(route.generation);
                    merge_parents(&mut existing.parents, route.parents);
                }
            }
        }

        for (id, policy) in other.policies {
            match self.policies.entry(id) {
                Entry::Vacant(entry) => {
                    entry.insert(policy);
                }
                Entry::Occupied(mut entry) => {
                    let existing = entry.get_mut();
                    existing.generation = existing.generation.max(policy.generation);
                    merge_parents(&mut existing.ancestors, policy.ancestors);
                }
            }
        }
    }
}

fn merge_parents(into: &mut BTreeMap<ParentRef, Conditions>, from: BTreeMap<ParentRef, Conditions>) {
    for (parent, conditions) in from {
        match into.entry(parent) {
            Entry::Vacant(entry) => {
                entry.insert(conditions);
            }
            Entry::Occupied(mut entry) => entry.get_mut().merge(conditions),
        }
    }
}
