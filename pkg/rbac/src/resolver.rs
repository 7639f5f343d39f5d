use std::collections::BTreeMap;

use tracing::{debug, trace};

use pkg_types::rbac::{PolicyRule, RoleRef, Subject, SubjectKind};

use crate::describe::describe_binding;
use crate::store::{Permissions, Scope};

/// A rule together with the role reference(s) that granted it.
#[derive(Debug, Clone, PartialEq)]
pub struct SourcedRule {
    pub rule: PolicyRule,
    pub originated_from: Vec<RoleRef>,
}

/// Everything one subject may do, keyed by the scope of the granting binding.
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectPermissions {
    pub subject: Subject,
    pub rules: BTreeMap<Scope, Vec<SourcedRule>>,
}

/// Join bindings to their roles and subjects.
///
/// Bindings whose role does not exist are skipped without error; a snapshot
/// may be taken mid-change. Rules are keyed by the binding's scope, so a
/// ClusterRole granted through a RoleBinding only applies in that namespace.
/// The result is sorted by subject identity.
pub fn resolve(permissions: &Permissions) -> Vec<SubjectPermissions> {
    let mut subjects: BTreeMap<String, SubjectPermissions> = BTreeMap::new();

    for binding in permissions.bindings() {
        let Some(role) = permissions.role_for(binding) else {
            debug!(
                "Skipping binding {}/{}: {} {:?} not found",
                binding.scope, binding.name, binding.role_ref.kind, binding.role_ref.name
            );
            continue;
        };

        for subject in &binding.subjects {
            let mut subject = subject.clone();
            if subject.kind == SubjectKind::ServiceAccount
                && subject.namespace.is_empty()
                && !binding.scope.is_cluster()
            {
                subject.namespace = binding.scope.namespace().to_string();
            }

            trace!("{}", describe_binding(binding, &subject));

            let entry = subjects
                .entry(subject.identity())
                .or_insert_with(|| SubjectPermissions {
                    subject: subject.clone(),
                    rules: BTreeMap::new(),
                });
            entry
                .rules
                .entry(binding.scope.clone())
                .or_default()
                .extend(role.rules.iter().map(|rule| SourcedRule {
                    rule: rule.clone(),
                    originated_from: vec![binding.role_ref.clone()],
                }));
        }
    }

    subjects.into_values().collect()
}
