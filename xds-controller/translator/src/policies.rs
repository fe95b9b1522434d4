use gateway_xds_controller_core::{policy::PolicyAtt, ObjectSource, ParentRef};
use gateway_xds_controller_reports::{
    conditions::{self, reason},
    ConditionReport, ReportMap,
};
use std::collections::{btree_map::Entry, BTreeMap};

/// Collects one finding per (policy, ancestor) pair seen during a translation.
#[derive(Debug, Default)]
pub(crate) struct PolicyReporter {
    ancestors: BTreeMap<(ObjectSource, ParentRef), Finding>,
}

#[derive(Debug)]
struct Finding {
    generation: i64,
    errors: Vec<String>,
}

impl PolicyReporter {
    /// Records that `policies` were attached somewhere under `ancestor`. Built-in attachments
    /// without a policy object are ignored.
    pub(crate) fn observe<'p>(
        &mut self,
        policies: impl IntoIterator<Item = &'p PolicyAtt>,
        ancestor: &ParentRef,
    ) {
        for att in policies {
            let Some(policy) = &att.policy_ref else {
                continue;
            };
            let finding = self
                .ancestors
                .entry((policy.object(), ancestor.clone()))
                .or_insert_with(|| Finding {
                    generation: att.generation,
                    errors: vec![],
                });
            for e in &att.errors {
                finding.push(e.to_string());
            }
        }
    }

    /// Records an error hit while applying `att` under `ancestor`.
    pub(crate) fn error(&mut self, att: &PolicyAtt, ancestor: &ParentRef, error: impl ToString) {
        let Some(policy) = &att.policy_ref else {
            return;
        };
        match self.ancestors.entry((policy.object(), ancestor.clone())) {
            Entry::Vacant(e) => {
                e.insert(Finding {
                    generation: att.generation,
                    errors: vec![error.to_string()],
                });
            }
            Entry::Occupied(mut e) => e.get_mut().push(error.to_string()),
        }
    }

    pub(crate) fn report(self, reports: &mut ReportMap) {
        for ((policy, ancestor), finding) in self.ancestors {
            let condition = if finding.errors.is_empty() {
                ConditionReport::new(conditions::ACCEPTED, true, reason::VALID)
                    .with_message("Policy accepted")
            } else {
                tracing::info!(%policy, %ancestor, errors = ?finding.errors, "Policy rejected");
                ConditionReport::new(conditions::ACCEPTED, false, reason::INVALID)
                    .with_message(finding.errors.join("; "))
            };
            reports
                .policy_ancestor(&policy, finding.generation, &ancestor)
                .set(condition);
        }
    }
}

impl Finding {
    fn push(&mut self, error: String) {
        if !self.errors.contains(&error) {
            self.errors.push(error);
        }
    }
}
