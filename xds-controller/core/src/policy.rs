use crate::{Error, GroupKind, ObjectSource};
use std::{any::Any, collections::BTreeMap, fmt, sync::Arc};

/// A plugin-specific, already-validated policy payload.
pub trait PolicyIr: Any + fmt::Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;

    /// Content equality against another payload of (possibly) another type.
    fn equals(&self, other: &dyn PolicyIr) -> bool;
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PolicyRef {
    pub group_kind: GroupKind,
    pub namespace: String,
    pub name: String,
    pub section_name: Option<String>,
}

/// A policy attached to some object.
#[derive(Clone, Debug)]
pub struct PolicyAtt {
    pub group_kind: GroupKind,

    /// The policy object this attachment came from. Built-in attachments synthesized from route
    /// filters have no policy object and are never reported.
    pub policy_ref: Option<PolicyRef>,

    pub generation: i64,

    /// The plugin's IR. `None` when the policy could not be converted.
    pub ir: Option<Arc<dyn PolicyIr>>,

    /// Errors encountered while building the IR. A policy carrying errors is reported as
    /// not accepted but does not prevent translation of the object it is attached to.
    pub errors: Vec<Error>,

    /// Higher values take precedence. Used to order policies inherited through delegation.
    pub hierarchical_priority: i32,
}

/// Policies attached to an object, grouped by kind.
///
/// Within each kind, policies are ordered highest priority first.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AttachedPolicies {
    policies: BTreeMap<GroupKind, Vec<PolicyAtt>>,
}

// === impl PolicyRef ===

impl PolicyRef {
    pub fn new(group_kind: GroupKind, namespace: impl ToString, name: impl ToString) -> Self {
        Self {
            group_kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
            section_name: None,
        }
    }

    pub fn object(&self) -> ObjectSource {
        ObjectSource::new(self.group_kind.clone(), &self.namespace, &self.name)
    }
}

impl fmt::Display for PolicyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.group_kind, self.namespace, self.name)
    }
}

// === impl PolicyAtt ===

impl PolicyAtt {
    pub fn new(policy_ref: PolicyRef, generation: i64, ir: Arc<dyn PolicyIr>) -> Self {
        Self {
            group_kind: policy_ref.group_kind.clone(),
            policy_ref: Some(policy_ref),
            generation,
            ir: Some(ir),
            errors: vec![],
            hierarchical_priority: 0,
        }
    }

    /// Builds an attachment for a policy whose IR could not be constructed.
    pub fn invalid(policy_ref: PolicyRef, generation: i64, errors: Vec<Error>) -> Self {
        Self {
            group_kind: policy_ref.group_kind.clone(),
            policy_ref: Some(policy_ref),
            generation,
            ir: None,
            errors,
            hierarchical_priority: 0,
        }
    }

    pub fn with_hierarchical_priority(mut self, priority: i32) -> Self {
        self.hierarchical_priority = priority;
        self
    }

    pub fn ir_as<T: PolicyIr>(&self) -> Option<&T> {
        self.ir.as_deref()?.as_any().downcast_ref::<T>()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

impl PartialEq for PolicyAtt {
    fn eq(&self, other: &Self) -> bool {
        let ir_eq = match (&self.ir, &other.ir) {
            (Some(a), Some(b)) => a.equals(b.as_ref()),
            (None, None) => true,
            _ => false,
        };
        ir_eq
            && self.group_kind == other.group_kind
            && self.policy_ref == other.policy_ref
            && self.generation == other.generation
            && self.errors == other.errors
            && self.hierarchical_priority == other.hierarchical_priority
    }
}

// === impl AttachedPolicies ===

impl AttachedPolicies {
    pub fn is_empty(&self) -> bool {
        self.policies.values().all(Vec::is_empty)
    }

    /// Adds a policy with lower priority than every policy of its kind already present.
    pub fn push(&mut self, policy: PolicyAtt) {
        self.policies
            .entry(policy.group_kind.clone())
            .or_default()
            .push(policy);
    }

    /// Appends `other` with lower priority than the policies already present.
    pub fn append(&mut self, other: &AttachedPolicies) {
        for (gk, policies) in &other.policies {
            self.policies
                .entry(gk.clone())
                .or_default()
                .extend(policies.iter().cloned());
        }
    }

    pub fn get(&self, group_kind: &GroupKind) -> &[PolicyAtt] {
        self.policies
            .get(group_kind)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn group_kinds(&self) -> impl Iterator<Item = &GroupKind> {
        self.policies.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&GroupKind, &[PolicyAtt])> {
        self.policies.iter().map(|(gk, p)| (gk, p.as_slice()))
    }

    /// Every attached policy, across all kinds.
    pub fn all(&self) -> impl Iterator<Item = &PolicyAtt> {
        self.policies.values().flatten()
    }

    /// Re-orders each kind by hierarchical priority, preserving declaration order among equals.
    pub fn sorted(mut self) -> Self {
        for policies in self.policies.values_mut() {
            policies.sort_by(|a, b| b.hierarchical_priority.cmp(&a.hierarchical_priority));
        }
        self
    }
}

impl FromIterator<PolicyAtt> for AttachedPolicies {
    fn from_iter<T: IntoIterator<Item = PolicyAtt>>(iter: T) -> Self {
        let mut policies = Self::default();
        for p in iter {
            policies.push(p);
        }
        policies
    }
}
