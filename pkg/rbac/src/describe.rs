//! Human-readable one-liners for subjects, bindings and rule origins.

use std::collections::BTreeSet;

use pkg_types::rbac::{RoleRef, RoleRefKind, Subject, SubjectKind};

use crate::store::{Scope, ScopedBinding};

/// `ServiceAccount "name/ns"` or `User "name"`. A service account without a
/// namespace borrows the binding's.
pub fn describe_subject(subject: &Subject, binding_namespace: &str) -> String {
    match subject.kind {
        SubjectKind::ServiceAccount => {
            let ns = if subject.namespace.is_empty() {
                binding_namespace
            } else {
                &subject.namespace
            };
            format!("{} {:?}", subject.kind, format!("{}/{}", subject.name, ns))
        }
        _ => format!("{} {:?}", subject.kind, subject.name),
    }
}

/// e.g. `RoleBinding "rb/ns1" of ClusterRole "view" to ServiceAccount "sa1/ns1"`.
pub fn describe_binding(binding: &ScopedBinding, subject: &Subject) -> String {
    match &binding.scope {
        Scope::Cluster => format!(
            "ClusterRoleBinding {:?} of {} {:?} to {}",
            binding.name,
            binding.role_ref.kind,
            binding.role_ref.name,
            describe_subject(subject, "")
        ),
        Scope::Namespaced(ns) => format!(
            "RoleBinding {:?} of {} {:?} to {}",
            format!("{}/{}", binding.name, ns),
            binding.role_ref.kind,
            binding.role_ref.name,
            describe_subject(subject, ns)
        ),
    }
}

/// Compact origin column: `ClusterRoles>>a,b` then `Roles>>ns/x`, each list
/// sorted and deduplicated. Namespaced roles are qualified with `namespace`.
pub fn render_originated_from(namespace: &str, refs: &[RoleRef]) -> String {
    let mut cluster_roles = BTreeSet::new();
    let mut roles = BTreeSet::new();
    for r in refs {
        match r.kind {
            RoleRefKind::ClusterRole => {
                cluster_roles.insert(r.name.clone());
            }
            RoleRefKind::Role => {
                roles.insert(format!("{}/{}", namespace, r.name));
            }
        }
    }

    let mut parts = Vec::new();
    if !cluster_roles.is_empty() {
        parts.push(format!(
            "ClusterRoles>>{}",
            cluster_roles.into_iter().collect::<Vec<_>>().join(",")
        ));
    }
    if !roles.is_empty() {
        parts.push(format!(
            "Roles>>{}",
            roles.into_iter().collect::<Vec<_>>().join(",")
        ));
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describes_subjects() {
        let sa = Subject::service_account("", "builder");
        assert_eq!(describe_subject(&sa, "ci"), r#"ServiceAccount "builder/ci""#);
        let sa = Subject::service_account("prod", "builder");
        assert_eq!(describe_subject(&sa, "ci"), r#"ServiceAccount "builder/prod""#);
        assert_eq!(describe_subject(&Subject::user("alice"), "ci"), r#"User "alice""#);
    }

    #[test]
    fn describes_bindings() {
        let binding = ScopedBinding {
            scope: Scope::from_namespace("ns1"),
            name: "rb".to_string(),
            role_ref: RoleRef::new(RoleRefKind::ClusterRole, "view"),
            subjects: vec![],
        };
        let sa = Subject::service_account("", "sa1");
        assert_eq!(
            describe_binding(&binding, &sa),
            r#"RoleBinding "rb/ns1" of ClusterRole "view" to ServiceAccount "sa1/ns1""#
        );

        let crb = ScopedBinding {
            scope: Scope::Cluster,
            ..binding
        };
        assert_eq!(
            describe_binding(&crb, &Subject::group("devs")),
            r#"ClusterRoleBinding "rb" of ClusterRole "view" to Group "devs""#
        );
    }

    #[test]
    fn renders_origins_sorted_and_deduplicated() {
        let refs = vec![
            RoleRef::new(RoleRefKind::Role, "x"),
            RoleRef::new(RoleRefKind::ClusterRole, "view"),
            RoleRef::new(RoleRefKind::ClusterRole, "admin"),
            RoleRef::new(RoleRefKind::ClusterRole, "view"),
        ];
        assert_eq!(
            render_originated_from("ns1", &refs),
            "ClusterRoles>>admin,view Roles>>ns1/x"
        );
        assert_eq!(render_originated_from("ns1", &[]), "");
    }
}
