//! Subject to role lookup straight from the binding graph.

use regex::Regex;
use serde::Serialize;
use tracing::debug;

use pkg_constants::rbac::{KIND_CLUSTER_ROLE_BINDING, KIND_ROLE_BINDING};
use pkg_types::rbac::{RoleRefKind, Subject};

use crate::store::{Permissions, ScopedBinding};

/// One subject's link to a role through a binding.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectBinding {
    pub subject: Subject,
    pub role_kind: RoleRefKind,
    pub role_name: String,
    /// Binding namespace; empty for a ClusterRoleBinding.
    pub namespace: String,
    pub binding_kind: String,
    pub binding_name: String,
}

impl SubjectBinding {
    fn new(subject: &Subject, binding: &ScopedBinding) -> Self {
        let binding_kind = if binding.scope.is_cluster() {
            KIND_CLUSTER_ROLE_BINDING
        } else {
            KIND_ROLE_BINDING
        };
        Self {
            subject: subject.clone(),
            role_kind: binding.role_ref.kind,
            role_name: binding.role_ref.name.clone(),
            namespace: binding.scope.namespace().to_string(),
            binding_kind: binding_kind.to_string(),
            binding_name: binding.name.clone(),
        }
    }

    fn sort_key(&self) -> (&str, &str, &str, &str, &str) {
        (
            self.subject.name.as_str(),
            self.namespace.as_str(),
            self.binding_kind.as_str(),
            self.role_name.as_str(),
            self.binding_name.as_str(),
        )
    }
}

/// Every subject of every binding whose name matches `pattern` (or, with
/// `inverse`, does not), ordered by subject, namespace and binding kind.
/// Bindings whose role does not exist are left out.
pub fn lookup_bindings(
    permissions: &Permissions,
    pattern: &Regex,
    inverse: bool,
) -> Vec<SubjectBinding> {
    let mut found = Vec::new();
    for binding in permissions.bindings() {
        if permissions.role_for(binding).is_none() {
            debug!(
                "Skipping binding {}/{}: {} {} not found",
                binding.scope, binding.name, binding.role_ref.kind, binding.role_ref.name
            );
            continue;
        }
        for subject in &binding.subjects {
            if pattern.is_match(&subject.name) != inverse {
                found.push(SubjectBinding::new(subject, binding));
            }
        }
    }
    found.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    found
}
